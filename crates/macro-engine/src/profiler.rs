//! Profiler CSV rendering

use chrono::{TimeZone, Utc};

use crate::types::ProfilerRecord;
use crate::variables::{VariableStore, FILE_PROFILER};

pub const PROFILE_COLUMNS: [&str; 4] = ["Line", "Command", "Duration_ms", "Timestamp"];

/// True while `!FILE_PROFILER` holds something other than empty or `NO`
pub fn profiling_enabled(variables: &VariableStore) -> bool {
    let value = variables.get_string(FILE_PROFILER);
    let value = value.trim();
    !value.is_empty() && !value.eq_ignore_ascii_case("NO")
}

/// Where the profile goes: `YES` means `<macro>.profile.csv`, anything else is
/// taken as the target itself
pub fn profile_target(variables: &VariableStore, macro_name: &str) -> Option<String> {
    if !profiling_enabled(variables) {
        return None;
    }
    let value = variables.get_string(FILE_PROFILER);
    let value = value.trim();
    if value.eq_ignore_ascii_case("YES") {
        Some(format!("{}.profile.csv", macro_name))
    } else {
        Some(value.to_string())
    }
}

/// Render the profile: one header line naming the macro and status, the
/// column header, then one row per record
pub fn render_profile(
    macro_name: &str,
    status: &str,
    records: &[ProfilerRecord],
) -> Result<String, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());

    writer.write_record([format!("Macro: {}", macro_name), format!("Status: {}", status)])?;
    writer.write_record(PROFILE_COLUMNS)?;
    for record in records {
        let timestamp = Utc
            .timestamp_millis_opt(record.timestamp_ms)
            .single()
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| record.timestamp_ms.to_string());
        writer.write_record([
            record.line.to_string(),
            record.raw_command.clone(),
            record.duration_ms.to_string(),
            timestamp,
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_resolution() {
        let mut store = VariableStore::new();
        assert_eq!(profile_target(&store, "demo"), None);
        store.set("!FILE_PROFILER", "NO").unwrap();
        assert!(!profiling_enabled(&store));
        store.set("!FILE_PROFILER", "yes").unwrap();
        assert_eq!(profile_target(&store, "demo").as_deref(), Some("demo.profile.csv"));
        store.set("!FILE_PROFILER", "runs/p.csv").unwrap();
        assert_eq!(profile_target(&store, "demo").as_deref(), Some("runs/p.csv"));
    }

    #[test]
    fn test_render_profile_layout() {
        let records = vec![ProfilerRecord {
            line: 3,
            command_name: "TAG".into(),
            raw_command: "TAG POS=1 TYPE=A ATTR=TXT:a,b".into(),
            duration_ms: 12,
            timestamp_ms: 0,
        }];
        let csv = render_profile("demo", "OK (1)", &records).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Macro: demo,Status: OK (1)");
        assert_eq!(lines[1], "Line,Command,Duration_ms,Timestamp");
        assert_eq!(
            lines[2],
            "3,\"TAG POS=1 TYPE=A ATTR=TXT:a,b\",12,1970-01-01T00:00:00+00:00"
        );
    }
}
