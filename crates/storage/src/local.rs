use std::path::{Path, PathBuf};

use async_trait::async_trait;
use matte_core::types::JobId;

use crate::error::StorageError;
use crate::sink::ResultSink;

/// Writes results into a local directory.
///
/// Returns `{base_url}/{job_id}.png` when the directory is served over
/// HTTP, otherwise a `file://` URL.
#[derive(Debug, Clone)]
pub struct LocalResultSink {
    dir: PathBuf,
    base_url: Option<String>,
}

impl LocalResultSink {
    pub fn new(dir: impl AsRef<Path>, base_url: Option<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    fn url_for(&self, job_id: JobId, path: &Path) -> String {
        match &self.base_url {
            Some(base) => format!("{base}/{job_id}.png"),
            None => format!("file://{}", path.display()),
        }
    }
}

#[async_trait]
impl ResultSink for LocalResultSink {
    async fn store(&self, job_id: JobId, artifact: &[u8]) -> Result<String, StorageError> {
        let unavailable = |e: std::io::Error| StorageError::Unavailable(e.to_string());

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(unavailable)?;
        let dir = tokio::fs::canonicalize(&self.dir)
            .await
            .map_err(unavailable)?;

        // Write then rename so readers never see a partial file.
        let path = dir.join(format!("{job_id}.png"));
        let tmp = dir.join(format!(".{job_id}.png.part"));
        tokio::fs::write(&tmp, artifact).await.map_err(unavailable)?;
        tokio::fs::rename(&tmp, &path).await.map_err(unavailable)?;

        tracing::debug!(job_id = %job_id, path = %path.display(), "Result stored locally");
        Ok(self.url_for(job_id, &path))
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}
