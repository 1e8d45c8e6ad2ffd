//! File-backed profile sink

use async_trait::async_trait;
use macro_engine::ProfileSink;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Appends profiler CSV to files; relative targets resolve under `base_dir`
#[derive(Debug, Clone, Default)]
pub struct FileProfileSink {
    base_dir: Option<PathBuf>,
}

impl FileProfileSink {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self { base_dir }
    }

    pub fn resolve(&self, target: &str) -> PathBuf {
        let target = Path::new(target);
        match &self.base_dir {
            Some(base) if target.is_relative() => base.join(target),
            _ => target.to_path_buf(),
        }
    }
}

#[async_trait]
impl ProfileSink for FileProfileSink {
    async fn append(&self, target: &str, contents: &str) -> anyhow::Result<()> {
        let path = self.resolve(target);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %path.display(), bytes = contents.len(), "profile appended");
        Ok(())
    }
}
