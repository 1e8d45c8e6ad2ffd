//! CSV datasource for `play --datasource`

use macro_engine::RowsDataSource;
use std::path::Path;

use crate::errors::DatasourceFileError;

/// Read every record of a CSV file; rows may have differing widths
pub fn load_csv(path: &Path, delimiter: u8) -> Result<RowsDataSource, DatasourceFileError> {
    let read_err = |source| DatasourceFileError::Read {
        path: path.display().to_string(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)
        .map_err(read_err)?;

    let rows = reader
        .records()
        .map(|record| record.map(|r| r.iter().map(str::to_string).collect::<Vec<_>>()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    Ok(RowsDataSource::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use macro_engine::{DataSource, VariableStore};
    use std::io::Write;

    #[tokio::test]
    async fn test_load_csv_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "alice,\"x, y\"\nbob\n").unwrap();

        let source = load_csv(file.path(), b',').unwrap();
        assert_eq!(source.len(), 2);

        let mut vars = VariableStore::new();
        assert!(source.load_row(1, &mut vars).await.unwrap());
        assert_eq!(vars.get_string("!COL2"), "x, y");
        assert!(source.load_row(2, &mut vars).await.unwrap());
        assert_eq!(vars.get_string("!COL1"), "bob");
        assert!(!source.load_row(3, &mut vars).await.unwrap());
    }

    #[test]
    fn test_missing_file() {
        let err = load_csv(Path::new("/no/such/rows.csv"), b',').unwrap_err();
        assert!(err.to_string().contains("/no/such/rows.csv"));
    }
}
