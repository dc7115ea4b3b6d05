use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::metadata::FileMetadata;
use crate::paths::PathError;
use crate::state::RequestState;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote entry not found: {0}")]
    NotFound(String),
    #[error("remote entry already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("local file error at {path:?}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("remote storage I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("batch job {job} failed: {reason}")]
    Job { job: String, reason: String },
    #[error("remote call did not complete")]
    Interrupted,
}

impl RemoteError {
    pub fn local(path: &Path, source: io::Error) -> Self {
        RemoteError::LocalFile {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn request_state(&self) -> RequestState {
        match self {
            RemoteError::NotFound(_) => RequestState::FileNotFound,
            RemoteError::AlreadyExists(_)
            | RemoteError::InvalidParam(_)
            | RemoteError::Path(_) => RequestState::InvalidParam,
            RemoteError::LocalFile { .. } => RequestState::LocalFileError,
            RemoteError::Io(_) | RemoteError::Job { .. } | RemoteError::Interrupted => {
                RequestState::Unclassified
            }
        }
    }
}

/// One async call per remote operation. Each call yields exactly one result.
///
/// `destination` for move and copy is a full remote path; `new_name` for
/// rename, mkdir and buffer uploads is a single entry name.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list(&self, path: &str) -> Result<Vec<FileMetadata>, RemoteError>;

    async fn delete(&self, path: &str) -> Result<(), RemoteError>;

    async fn move_entry(&self, path: &str, destination: &str)
    -> Result<FileMetadata, RemoteError>;

    async fn copy(&self, path: &str, destination: &str) -> Result<FileMetadata, RemoteError>;

    async fn rename(&self, path: &str, new_name: &str) -> Result<FileMetadata, RemoteError>;

    async fn mkdir(&self, path: &str, new_name: &str) -> Result<FileMetadata, RemoteError>;

    async fn upload_file(&self, path: &str, local_file: &Path)
    -> Result<FileMetadata, RemoteError>;

    async fn upload_buffer(
        &self,
        path: &str,
        bytes: &[u8],
        new_name: &str,
    ) -> Result<FileMetadata, RemoteError>;

    async fn download_file(&self, local_dest: &Path, path: &str) -> Result<(), RemoteError>;

    async fn download_buffer(&self, path: &str) -> Result<Vec<u8>, RemoteError>;

    async fn run_batch_job(
        &self,
        job: &str,
        params: &BTreeMap<String, String>,
        target: &str,
    ) -> Result<serde_json::Value, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors_into_request_states() {
        assert_eq!(
            RemoteError::NotFound("/a".into()).request_state(),
            RequestState::FileNotFound
        );
        assert_eq!(
            RemoteError::AlreadyExists("/a".into()).request_state(),
            RequestState::InvalidParam
        );
        assert_eq!(
            RemoteError::local(Path::new("/tmp/x"), io::Error::other("denied")).request_state(),
            RequestState::LocalFileError
        );
        assert_eq!(
            RemoteError::Io(io::Error::other("disk")).request_state(),
            RequestState::Unclassified
        );
    }
}
