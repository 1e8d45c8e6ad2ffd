//! Collaborator ports the engine is wired with

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::CommandError;
use crate::variables::{VariableStore, DATASOURCE_LINE};

/// Row provider for datasource-driven loops
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Load the row for `iteration` (1-based) into `!COL1`, `!COL2`, ...
    ///
    /// `Ok(false)` or `Err(CommandError::DatasourceEnd)` ends the run as
    /// completed; any other error aborts it.
    async fn load_row(
        &self,
        iteration: u32,
        variables: &mut VariableStore,
    ) -> Result<bool, CommandError>;
}

/// File-append collaborator used for profiler output
#[async_trait]
pub trait ProfileSink: Send + Sync {
    async fn append(&self, target: &str, contents: &str) -> anyhow::Result<()>;
}

/// Datasource over rows already held in memory
#[derive(Debug, Default)]
pub struct RowsDataSource {
    rows: Vec<Vec<String>>,
}

impl RowsDataSource {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl DataSource for RowsDataSource {
    async fn load_row(
        &self,
        iteration: u32,
        variables: &mut VariableStore,
    ) -> Result<bool, CommandError> {
        let Some(row) = self.rows.get(iteration.saturating_sub(1) as usize) else {
            return Ok(false);
        };
        variables.set(DATASOURCE_LINE, i64::from(iteration))?;
        for (idx, column) in row.iter().enumerate() {
            variables.set(&format!("!COL{}", idx + 1), column.as_str())?;
        }
        Ok(true)
    }
}

/// Profile sink that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryProfileSink {
    writes: Mutex<Vec<(String, String)>>,
}

impl MemoryProfileSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(target, contents)` pairs in write order
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl ProfileSink for MemoryProfileSink {
    async fn append(&self, target: &str, contents: &str) -> anyhow::Result<()> {
        self.writes
            .lock()
            .push((target.to_string(), contents.to_string()));
        Ok(())
    }
}
