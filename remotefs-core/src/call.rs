use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::api::{RemoteApi, RemoteError};
use crate::metadata::FileMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRequest {
    List {
        path: String,
    },
    Delete {
        path: String,
    },
    Move {
        path: String,
        destination: String,
    },
    Copy {
        path: String,
        destination: String,
    },
    Rename {
        path: String,
        new_name: String,
    },
    Mkdir {
        path: String,
        new_name: String,
    },
    UploadFile {
        path: String,
        local_file: PathBuf,
    },
    UploadBuffer {
        path: String,
        bytes: Vec<u8>,
        new_name: String,
    },
    DownloadFile {
        local_dest: PathBuf,
        path: String,
    },
    DownloadBuffer {
        path: String,
    },
    RunBatchJob {
        job: String,
        params: BTreeMap<String, String>,
        target: String,
    },
}

impl RemoteRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteRequest::List { .. } => "list",
            RemoteRequest::Delete { .. } => "delete",
            RemoteRequest::Move { .. } => "move",
            RemoteRequest::Copy { .. } => "copy",
            RemoteRequest::Rename { .. } => "rename",
            RemoteRequest::Mkdir { .. } => "mkdir",
            RemoteRequest::UploadFile { .. } => "upload_file",
            RemoteRequest::UploadBuffer { .. } => "upload_buffer",
            RemoteRequest::DownloadFile { .. } => "download_file",
            RemoteRequest::DownloadBuffer { .. } => "download_buffer",
            RemoteRequest::RunBatchJob { .. } => "run_batch_job",
        }
    }

    pub async fn execute(&self, api: &dyn RemoteApi) -> Result<ReplyPayload, RemoteError> {
        match self {
            RemoteRequest::List { path } => api.list(path).await.map(ReplyPayload::Listing),
            RemoteRequest::Delete { path } => api.delete(path).await.map(|()| ReplyPayload::Empty),
            RemoteRequest::Move { path, destination } => api
                .move_entry(path, destination)
                .await
                .map(ReplyPayload::Entry),
            RemoteRequest::Copy { path, destination } => {
                api.copy(path, destination).await.map(ReplyPayload::Entry)
            }
            RemoteRequest::Rename { path, new_name } => {
                api.rename(path, new_name).await.map(ReplyPayload::Entry)
            }
            RemoteRequest::Mkdir { path, new_name } => {
                api.mkdir(path, new_name).await.map(ReplyPayload::Entry)
            }
            RemoteRequest::UploadFile { path, local_file } => api
                .upload_file(path, local_file)
                .await
                .map(ReplyPayload::Entry),
            RemoteRequest::UploadBuffer {
                path,
                bytes,
                new_name,
            } => api
                .upload_buffer(path, bytes, new_name)
                .await
                .map(ReplyPayload::Entry),
            RemoteRequest::DownloadFile { local_dest, path } => api
                .download_file(local_dest, path)
                .await
                .map(|()| ReplyPayload::Empty),
            RemoteRequest::DownloadBuffer { path } => {
                api.download_buffer(path).await.map(ReplyPayload::Buffer)
            }
            RemoteRequest::RunBatchJob {
                job,
                params,
                target,
            } => api
                .run_batch_job(job, params, target)
                .await
                .map(ReplyPayload::Job),
        }
    }
}

/// A request tagged with the id its reply will carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub id: CallId,
    pub request: RemoteRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPayload {
    Empty,
    Listing(Vec<FileMetadata>),
    Entry(FileMetadata),
    Buffer(Vec<u8>),
    Job(serde_json::Value),
}

#[derive(Debug)]
pub struct RemoteReply {
    pub id: CallId,
    pub result: Result<ReplyPayload, RemoteError>,
}

impl RemoteReply {
    pub fn ok(id: CallId, payload: ReplyPayload) -> Self {
        Self {
            id,
            result: Ok(payload),
        }
    }

    pub fn err(id: CallId, error: RemoteError) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}
