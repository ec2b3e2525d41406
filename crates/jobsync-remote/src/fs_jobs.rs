//! Job configurations read from a CI server's job directory on disk.
//!
//! Layout: `<root>/<job name>/config.xml`, one level deep. Directories
//! without a `config.xml` are not jobs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use jobsync_core::{JobConfigSource, JobRef, RemoteError, RemoteResult};
use tracing::debug;

const CONFIG_FILE: &str = "config.xml";

#[derive(Debug, Clone)]
pub struct FsJobSource {
    root: PathBuf,
}

impl FsJobSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl JobConfigSource for FsJobSource {
    async fn list_jobs(&self) -> RemoteResult<Vec<JobRef>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let config = entry.path().join(CONFIG_FILE);
            if !tokio::fs::try_exists(&config).await? {
                debug!(path = %entry.path().display(), "no config.xml, skipping");
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                debug!(path = %entry.path().display(), "job directory name is not UTF-8");
                continue;
            };
            jobs.push(JobRef {
                url: config.display().to_string(),
                name,
            });
        }
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(jobs)
    }

    async fn job_config_xml(&self, job_name: &str) -> RemoteResult<String> {
        if job_name.is_empty() || job_name.contains(['/', '\\']) || job_name == ".." {
            return Err(RemoteError::Url(format!("invalid job name {job_name:?}")));
        }
        let path = self.root.join(job_name).join(CONFIG_FILE);
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_path_escapes() {
        let source = FsJobSource::new("/nonexistent");
        for name in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                source.job_config_xml(name).await,
                Err(RemoteError::Url(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsJobSource::new(dir.path().join("absent"));
        let err = source.list_jobs().await.unwrap_err();
        assert!(matches!(err, RemoteError::Io(_)));
        assert!(!err.is_transient());
    }
}
