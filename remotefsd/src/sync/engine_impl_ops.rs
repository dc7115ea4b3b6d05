use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use remotefs_core::{CallId, RemoteError, RemoteRequest, ReplyPayload, RequestState, paths};
use tracing::{info, warn};

use super::{CallRoute, EngineError, EngineEvent, SyncEngine};
use crate::mirror::{NodeId, NodeRef};
use crate::sync::lock::FlightGuard;

/// A top-level operation waiting for its reply, with what its follow-up
/// refreshes need to know.
#[derive(Debug)]
pub(super) enum PendingOp {
    Delete { path: String },
    Move { from: String, to: String },
    Copy { from: String, to: String },
    Rename { from: String, to: String },
    Mkdir { parent: String, name: String },
    Upload { folder: String, name: String },
    Download { path: String, local: PathBuf },
    Compress { path: String },
    Decompress { path: String },
}

impl PendingOp {
    fn started(&self) -> String {
        match self {
            PendingOp::Delete { path } => format!("Deleting {path}"),
            PendingOp::Move { from, to } => format!("Moving {from} to {to}"),
            PendingOp::Copy { from, to } => format!("Copying {from} to {to}"),
            PendingOp::Rename { from, to } => format!("Renaming {from} to {to}"),
            PendingOp::Mkdir { parent, name } => format!("Creating folder {name} in {parent}"),
            PendingOp::Upload { folder, name } => format!("Uploading {name} to {folder}"),
            PendingOp::Download { path, local } => {
                format!("Downloading {path} to {}", local.display())
            }
            PendingOp::Compress { path } => format!("Compressing {path}"),
            PendingOp::Decompress { path } => format!("Extracting {path}"),
        }
    }

    fn succeeded(&self) -> String {
        match self {
            PendingOp::Delete { path } => format!("File successfully deleted: {path}"),
            PendingOp::Move { from, to } => format!("File successfully moved from {from} to {to}"),
            PendingOp::Copy { to, .. } => format!("File successfully copied: {to}"),
            PendingOp::Rename { from, to } => {
                format!("File successfully renamed from {from} to {to}")
            }
            PendingOp::Mkdir { parent, name } => {
                format!("New folder created at {}", paths::join(parent, name))
            }
            PendingOp::Upload { folder, name } => {
                format!("File successfully uploaded to {}", paths::join(folder, name))
            }
            PendingOp::Download { local, .. } => {
                format!("Download complete to {}", local.display())
            }
            PendingOp::Compress { path } => format!("Compress job finished for {path}"),
            PendingOp::Decompress { path } => format!("Extract job finished for {path}"),
        }
    }

    fn failure_context(&self) -> &'static str {
        match self {
            PendingOp::Delete { .. } => "Unable to delete file",
            PendingOp::Move { .. } => "Unable to move file",
            PendingOp::Copy { .. } => "Unable to copy file",
            PendingOp::Rename { .. } => "Unable to rename file",
            PendingOp::Mkdir { .. } => "Unable to create remote folder",
            PendingOp::Upload { .. } => "Unable to upload file",
            PendingOp::Download { .. } => "Unable to download requested file",
            PendingOp::Compress { .. } => "Unable to compress folder",
            PendingOp::Decompress { .. } => "Unable to extract archive",
        }
    }
}

impl SyncEngine {
    pub fn delete_node(&mut self, target: &NodeRef) -> Result<CallId, EngineError> {
        let (guard, id) = self.claim_target(target)?;
        if id == self.tree.root() {
            return Err(self.reject(guard, invalid("The root folder cannot be deleted.")));
        }
        let path = self.path_of(id);
        Ok(self.dispatch(
            guard,
            PendingOp::Delete { path: path.clone() },
            RemoteRequest::Delete { path },
        ))
    }

    /// Moves `target` so that it ends up at `destination` (a full path).
    pub fn move_node(&mut self, target: &NodeRef, destination: &str) -> Result<CallId, EngineError> {
        let (guard, id) = self.claim_target(target)?;
        let (from, to) = match self.relocation(id, destination) {
            Ok(pair) => pair,
            Err(err) => return Err(self.reject(guard, err)),
        };
        Ok(self.dispatch(
            guard,
            PendingOp::Move {
                from: from.clone(),
                to: to.clone(),
            },
            RemoteRequest::Move {
                path: from,
                destination: to,
            },
        ))
    }

    pub fn copy_node(&mut self, target: &NodeRef, destination: &str) -> Result<CallId, EngineError> {
        let (guard, id) = self.claim_target(target)?;
        let (from, to) = match self.relocation(id, destination) {
            Ok(pair) => pair,
            Err(err) => return Err(self.reject(guard, err)),
        };
        Ok(self.dispatch(
            guard,
            PendingOp::Copy {
                from: from.clone(),
                to: to.clone(),
            },
            RemoteRequest::Copy {
                path: from,
                destination: to,
            },
        ))
    }

    pub fn rename_node(&mut self, target: &NodeRef, new_name: &str) -> Result<CallId, EngineError> {
        let (guard, id) = self.claim_target(target)?;
        if id == self.tree.root() {
            return Err(self.reject(guard, invalid("The root folder cannot be renamed.")));
        }
        if paths::validate_name(new_name).is_err() {
            return Err(self.reject(guard, invalid(format!("Invalid name: {new_name:?}"))));
        }
        let from = self.path_of(id);
        let to = paths::join(&paths::parent(&from).unwrap_or_default(), new_name);
        Ok(self.dispatch(
            guard,
            PendingOp::Rename {
                from: from.clone(),
                to,
            },
            RemoteRequest::Rename {
                path: from,
                new_name: new_name.to_string(),
            },
        ))
    }

    pub fn mkdir(&mut self, folder: &NodeRef, new_name: &str) -> Result<CallId, EngineError> {
        let (guard, id) = self.claim_target(folder)?;
        if let Err(err) = self.check_new_child(id, new_name) {
            return Err(self.reject(guard, err));
        }
        let parent = self.path_of(id);
        Ok(self.dispatch(
            guard,
            PendingOp::Mkdir {
                parent: parent.clone(),
                name: new_name.to_string(),
            },
            RemoteRequest::Mkdir {
                path: parent,
                new_name: new_name.to_string(),
            },
        ))
    }

    pub fn upload_file(&mut self, folder: &NodeRef, local_file: &Path) -> Result<CallId, EngineError> {
        let (guard, id) = self.claim_target(folder)?;
        if !self.tree.node(id).is_some_and(|node| node.is_dir()) {
            return Err(self.reject(guard, invalid("The destination for an upload must be a folder.")));
        }
        if !local_file.is_file() {
            return Err(self.reject(
                guard,
                EngineError::LocalFile(format!(
                    "Unable to read local file {}",
                    local_file.display()
                )),
            ));
        }
        let Some(name) = local_file.file_name().and_then(|name| name.to_str()) else {
            return Err(self.reject(guard, invalid("Cannot upload a file without a name.")));
        };
        let folder_path = self.path_of(id);
        Ok(self.dispatch(
            guard,
            PendingOp::Upload {
                folder: folder_path.clone(),
                name: name.to_string(),
            },
            RemoteRequest::UploadFile {
                path: folder_path,
                local_file: local_file.to_path_buf(),
            },
        ))
    }

    pub fn upload_buffer(
        &mut self,
        folder: &NodeRef,
        bytes: Vec<u8>,
        new_name: &str,
    ) -> Result<CallId, EngineError> {
        let (guard, id) = self.claim_target(folder)?;
        if !self.tree.node(id).is_some_and(|node| node.is_dir()) {
            return Err(self.reject(guard, invalid("The destination for an upload must be a folder.")));
        }
        if paths::validate_name(new_name).is_err() {
            return Err(self.reject(guard, invalid(format!("Invalid name: {new_name:?}"))));
        }
        let folder_path = self.path_of(id);
        Ok(self.dispatch(
            guard,
            PendingOp::Upload {
                folder: folder_path.clone(),
                name: new_name.to_string(),
            },
            RemoteRequest::UploadBuffer {
                path: folder_path,
                bytes,
                new_name: new_name.to_string(),
            },
        ))
    }

    pub fn download_file(&mut self, target: &NodeRef, local_dest: &Path) -> Result<CallId, EngineError> {
        let (guard, id) = self.claim_target(target)?;
        if !self.tree.node(id).is_some_and(|node| node.is_file()) {
            return Err(self.reject(guard, invalid("Only files can be downloaded.")));
        }
        let parent_ok = match local_dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.is_dir(),
            _ => true,
        };
        if !parent_ok || local_dest.is_dir() {
            return Err(self.reject(
                guard,
                EngineError::LocalFile(format!(
                    "Download destination {} is not writable",
                    local_dest.display()
                )),
            ));
        }
        let path = self.path_of(id);
        Ok(self.dispatch(
            guard,
            PendingOp::Download {
                path: path.clone(),
                local: local_dest.to_path_buf(),
            },
            RemoteRequest::DownloadFile {
                local_dest: local_dest.to_path_buf(),
                path,
            },
        ))
    }

    pub fn compress_folder(&mut self, folder: &NodeRef) -> Result<CallId, EngineError> {
        let (guard, id) = self.claim_target(folder)?;
        if !self.tree.node(id).is_some_and(|node| node.is_dir()) {
            return Err(self.reject(guard, invalid("Only folders can be compressed.")));
        }
        let path = self.path_of(id);
        let mut params = BTreeMap::new();
        params.insert("compression_type".to_string(), "tgz".to_string());
        Ok(self.dispatch(
            guard,
            PendingOp::Compress { path: path.clone() },
            RemoteRequest::RunBatchJob {
                job: "compress".into(),
                params,
                target: path,
            },
        ))
    }

    pub fn decompress_file(&mut self, archive: &NodeRef) -> Result<CallId, EngineError> {
        let (guard, id) = self.claim_target(archive)?;
        if self.tree.node(id).is_none_or(|node| node.is_dir()) {
            return Err(self.reject(guard, invalid("Folders cannot be extracted.")));
        }
        let path = self.path_of(id);
        let mut params = BTreeMap::new();
        params.insert("inputFile".to_string(), path.clone());
        Ok(self.dispatch(
            guard,
            PendingOp::Decompress { path },
            RemoteRequest::RunBatchJob {
                job: "extract".into(),
                params,
                target: String::new(),
            },
        ))
    }

    pub(super) fn on_operation_reply(
        &mut self,
        op: PendingOp,
        guard: FlightGuard,
        result: Result<ReplyPayload, RemoteError>,
    ) {
        guard.release();
        match result {
            Ok(_) => {
                match &op {
                    PendingOp::Delete { path } => self.refresh_parent_of(path),
                    PendingOp::Move { from, to } | PendingOp::Rename { from, to } => {
                        self.refresh_parent_of(from);
                        self.refresh_closest(to);
                    }
                    PendingOp::Copy { to, .. } => self.refresh_closest(to),
                    PendingOp::Mkdir { parent, .. } => self.refresh_closest(parent),
                    PendingOp::Upload { folder, name } => {
                        self.refresh_parent_of(&paths::join(folder, name))
                    }
                    PendingOp::Download { .. }
                    | PendingOp::Compress { .. }
                    | PendingOp::Decompress { .. } => {}
                }
                let message = op.succeeded();
                info!("{message}");
                self.emit(EngineEvent::OperationFinished {
                    state: RequestState::Good,
                    message,
                });
            }
            Err(err) => {
                let state = err.request_state();
                warn!(error = %err, "{}", op.failure_context());
                self.emit(EngineEvent::OperationFinished {
                    state,
                    message: format!("{}: {}", op.failure_context(), state.describe()),
                });
            }
        }
    }

    /// Claims the operation lock and resolves `target`. A busy lock is
    /// returned silently; a stale target is reported like any other
    /// validation failure.
    pub(super) fn claim_target(&mut self, target: &NodeRef) -> Result<(FlightGuard, NodeId), EngineError> {
        let guard = self.op_lock.try_claim().ok_or(EngineError::NotReady)?;
        match self.resolve_ref(target, true) {
            Some(id) => Ok((guard, id)),
            None => Err(self.reject(guard, EngineError::NodeNotFound(target.path().to_string()))),
        }
    }

    /// Releases a claimed lock and reports a validation failure.
    pub(super) fn reject(&mut self, guard: FlightGuard, err: EngineError) -> EngineError {
        guard.release();
        warn!(error = %err, "operation rejected");
        self.emit(EngineEvent::OperationFinished {
            state: err.request_state(),
            message: format!("ERROR: {err}"),
        });
        err
    }

    pub(super) fn path_of(&self, id: NodeId) -> String {
        self.tree
            .node(id)
            .map(|node| node.path().to_string())
            .unwrap_or_default()
    }

    fn dispatch(&mut self, guard: FlightGuard, op: PendingOp, request: RemoteRequest) -> CallId {
        let started = op.started();
        info!(kind = request.kind(), "{started}");
        self.emit(EngineEvent::OperationStarted(started));
        let call = self.calls.push(request);
        self.in_flight.insert(call, CallRoute::Operation { op, guard });
        call
    }

    fn relocation(&self, id: NodeId, destination: &str) -> Result<(String, String), EngineError> {
        if id == self.tree.root() {
            return Err(invalid("The root folder cannot be moved or copied."));
        }
        let from = self.path_of(id);
        let to = paths::normalize(destination);
        let name = paths::file_name(&to).unwrap_or_default();
        if paths::validate_name(name).is_err() {
            return Err(invalid(format!("Invalid destination: {destination}")));
        }
        if to == from || to.starts_with(&format!("{from}/")) {
            return Err(invalid("An entry cannot be placed inside itself."));
        }
        Ok((from, to))
    }

    fn check_new_child(&self, folder: NodeId, name: &str) -> Result<(), EngineError> {
        let Some(node) = self.tree.node(folder) else {
            return Err(EngineError::NodeNotFound(self.path_of(folder)));
        };
        if !node.is_dir() {
            return Err(invalid("New folders can only be created inside folders."));
        }
        if paths::validate_name(name).is_err() {
            return Err(invalid(format!("Invalid name: {name:?}")));
        }
        if node.is_loaded() && self.tree.child_by_name(folder, name).is_some() {
            return Err(invalid(format!("{name} already exists in {}", node.path())));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidParam(message.into())
}
