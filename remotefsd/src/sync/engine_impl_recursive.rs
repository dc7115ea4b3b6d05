use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use remotefs_core::{FileType, RemoteError, RemoteRequest, ReplyPayload, RequestState, paths};
use tracing::{debug, info, warn};

use super::{CallRoute, EngineError, EngineEvent, SyncEngine};
use crate::mirror::{NodeId, NodeRef};
use crate::sync::lock::FlightGuard;

/// The folder transfer currently driving the engine. Holding the task holds
/// the top-level operation lock.
pub(super) enum RecursiveTask {
    Download {
        remote: String,
        local: PathBuf,
        _guard: FlightGuard,
    },
    Upload {
        local: PathBuf,
        remote_parent: String,
        _guard: FlightGuard,
    },
}

impl RecursiveTask {
    pub(super) fn failure_context(&self) -> &'static str {
        match self {
            RecursiveTask::Download { .. } => "Folder download failed",
            RecursiveTask::Upload { .. } => "Folder upload failed",
        }
    }

    /// Whether a failure at `path` breaks this walk.
    fn touches(&self, path: &str) -> bool {
        match self {
            RecursiveTask::Download { remote, .. } => within(path, remote),
            RecursiveTask::Upload {
                local,
                remote_parent,
                ..
            } => {
                path == remote_parent
                    || local
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| within(path, &paths::join(remote_parent, name)))
            }
        }
    }
}

/// One mkdir or upload issued by a folder upload.
#[derive(Debug)]
pub(super) enum Step {
    Mkdir { parent: String, name: String },
    Upload { folder: String, local: PathBuf },
}

impl Step {
    fn request(&self) -> RemoteRequest {
        match self {
            Step::Mkdir { parent, name } => RemoteRequest::Mkdir {
                path: parent.clone(),
                new_name: name.clone(),
            },
            Step::Upload { folder, local } => RemoteRequest::UploadFile {
                path: folder.clone(),
                local_file: local.clone(),
            },
        }
    }

    fn failure_context(&self) -> &'static str {
        match self {
            Step::Mkdir { .. } => "Folder upload failed to create new remote folder",
            Step::Upload { .. } => "Folder upload failed to upload file",
        }
    }
}

#[derive(Debug)]
enum WalkFailure {
    LostFile,
    TypeMismatch,
    Local(io::Error),
}

impl WalkFailure {
    fn state(&self) -> RequestState {
        match self {
            WalkFailure::LostFile => RequestState::LostFile,
            WalkFailure::TypeMismatch => RequestState::TypeMismatch,
            WalkFailure::Local(_) => RequestState::LocalFileError,
        }
    }

    fn message(&self) -> String {
        match self {
            WalkFailure::LostFile => {
                "Internal error: an entry disappeared during the transfer. Files may have changed outside of this program.".into()
            }
            WalkFailure::TypeMismatch => {
                "Internal error: type mismatch in transferred data. Files may have changed outside of this program.".into()
            }
            WalkFailure::Local(err) => format!(
                "Unable to access local files for the transfer, please check folder permissions: {err}"
            ),
        }
    }
}

impl From<io::Error> for WalkFailure {
    fn from(err: io::Error) -> Self {
        WalkFailure::Local(err)
    }
}

struct LocalEntry {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

impl SyncEngine {
    pub fn performing_recursive_download(&self) -> bool {
        matches!(self.recursive, Some(RecursiveTask::Download { .. }))
    }

    pub fn performing_recursive_upload(&self) -> bool {
        matches!(self.recursive, Some(RecursiveTask::Upload { .. }))
    }

    /// Copies the remote folder `target` into a new folder of the same name
    /// under `local_parent`. Nothing is written locally until every file of
    /// the subtree is buffered.
    pub fn download_folder(&mut self, target: &NodeRef, local_parent: &Path) -> Result<(), EngineError> {
        if self.recursive.is_some() {
            return Err(EngineError::NotReady);
        }
        let (guard, id) = self.claim_target(target)?;
        let Some(node) = self.tree.node(id) else {
            return Err(self.reject(guard, EngineError::NodeNotFound(target.path().to_string())));
        };
        if !node.is_dir() {
            return Err(self.reject(
                guard,
                EngineError::InvalidParam("Only folders can be downloaded recursively.".into()),
            ));
        }
        let remote = node.path().to_string();
        let name = node.name().to_string();

        if !local_parent.is_dir() {
            return Err(self.reject(
                guard,
                EngineError::LocalFile("Download destination does not exist.".into()),
            ));
        }
        let local = local_parent.join(&name);
        if name.is_empty() || local.symlink_metadata().is_ok() {
            return Err(self.reject(
                guard,
                EngineError::LocalFile("Download destination already occupied.".into()),
            ));
        }
        if let Err(err) = fs::create_dir(&local) {
            return Err(self.reject(
                guard,
                EngineError::LocalFile(format!(
                    "Unable to create local destination for download: {err}"
                )),
            ));
        }

        let started = format!("Downloading folder {remote} to {}", local.display());
        info!("{started}");
        self.emit(EngineEvent::OperationStarted(started));
        self.recursive = Some(RecursiveTask::Download {
            remote,
            local,
            _guard: guard,
        });
        self.continue_recursive();
        Ok(())
    }

    /// Recreates the local folder `local_dir` under the remote folder
    /// `destination`, one mkdir or upload at a time.
    pub fn upload_folder(&mut self, destination: &NodeRef, local_dir: &Path) -> Result<(), EngineError> {
        if self.recursive.is_some() {
            return Err(EngineError::NotReady);
        }
        let (guard, id) = self.claim_target(destination)?;
        if self.step_lock.is_held() {
            return Err(self.reject(guard, EngineError::CleaningUp));
        }
        if !local_dir.is_dir() {
            return Err(self.reject(
                guard,
                EngineError::InvalidParam("The folder to upload does not exist.".into()),
            ));
        }
        if fs::read_dir(local_dir).is_err() {
            return Err(self.reject(
                guard,
                EngineError::LocalFile(
                    "Unable to read from local folder to upload, please check that you have permissions to read the specified folder.".into(),
                ),
            ));
        }
        let name = match local_dir.file_name().and_then(|name| name.to_str()) {
            Some(name) if paths::validate_name(name).is_ok() => name.to_string(),
            _ => {
                return Err(self.reject(
                    guard,
                    EngineError::InvalidParam("Cannot upload unnamed or root folders.".into()),
                ));
            }
        };
        let Some(node) = self.tree.node(id) else {
            return Err(self.reject(guard, EngineError::NodeNotFound(destination.path().to_string())));
        };
        if !node.is_dir() {
            return Err(self.reject(
                guard,
                EngineError::InvalidParam("The destination for an upload must be a folder.".into()),
            ));
        }
        if !node.is_loaded() {
            return Err(self.reject(
                guard,
                EngineError::InvalidParam(
                    "The destination for an upload must be fully loaded.".into(),
                ),
            ));
        }
        if self.tree.child_by_name(id, &name).is_some() {
            return Err(self.reject(
                guard,
                EngineError::InvalidParam(
                    "The destination for the upload is already occupied.".into(),
                ),
            ));
        }
        let remote_parent = node.path().to_string();

        let started = format!("Uploading folder {} to {remote_parent}", local_dir.display());
        info!("{started}");
        self.emit(EngineEvent::OperationStarted(started));
        self.recursive = Some(RecursiveTask::Upload {
            local: local_dir.to_path_buf(),
            remote_parent,
            _guard: guard,
        });
        self.continue_recursive();
        Ok(())
    }

    /// Stops the running folder transfer. Completed remote work stays.
    pub fn abort_recursive(&mut self) -> Result<(), EngineError> {
        let message = match &self.recursive {
            Some(RecursiveTask::Download { .. }) => "Folder download stopped by user.",
            Some(RecursiveTask::Upload { .. }) => "Folder upload stopped by user.",
            None => return Err(EngineError::NoRecursiveTask),
        };
        self.finish_recursive(RequestState::StoppedByUser, message.to_string());
        Ok(())
    }

    pub(super) fn continue_recursive(&mut self) {
        match &self.recursive {
            Some(RecursiveTask::Download { remote, local, .. }) => {
                let (remote, local) = (remote.clone(), local.clone());
                self.download_retry(&remote, &local);
            }
            Some(RecursiveTask::Upload {
                local,
                remote_parent,
                ..
            }) => {
                let (local, remote_parent) = (local.clone(), remote_parent.clone());
                self.upload_retry(&local, &remote_parent);
            }
            None => {}
        }
    }

    pub(super) fn finish_recursive(&mut self, state: RequestState, message: String) {
        let Some(task) = self.recursive.take() else {
            return;
        };
        drop(task);
        if state.is_good() {
            info!("{message}");
        } else {
            warn!(%state, "{message}");
        }
        self.emit(EngineEvent::OperationFinished { state, message });
    }

    pub(super) fn abort_walk_touching(&mut self, path: &str, state: RequestState) {
        let Some(task) = &self.recursive else {
            return;
        };
        if !task.touches(path) {
            return;
        }
        let context = task.failure_context();
        self.finish_recursive(state, format!("{context}: {}", state.describe()));
    }

    fn download_retry(&mut self, remote: &str, local: &Path) {
        let Some(head) = self.tree.resolve(remote) else {
            self.fail_walk(WalkFailure::LostFile);
            return;
        };
        if !self.fetch_missing(head) {
            return;
        }
        match self.write_local(head, local) {
            Ok(()) => self.finish_recursive(RequestState::Good, "Remote folder downloaded.".into()),
            Err(failure) => self.fail_walk(failure),
        }
    }

    /// Requests whatever is still unknown below `id`. Returns true once every
    /// folder is loaded and every file is buffered.
    fn fetch_missing(&mut self, id: NodeId) -> bool {
        let Some(node) = self.tree.node(id) else {
            return true;
        };
        match node.kind() {
            FileType::File => {
                if node.buffer().is_some() {
                    return true;
                }
                self.request_buffer(id);
                false
            }
            FileType::Dir => {
                let mut complete = true;
                if !node.is_loaded() || node.pending_list().is_some() {
                    complete = false;
                    self.refresh_node(id);
                }
                for child in self.tree.children(id) {
                    if !self.fetch_missing(child) {
                        complete = false;
                    }
                }
                complete
            }
            FileType::Unknown => true,
        }
    }

    fn write_local(&self, id: NodeId, dir: &Path) -> Result<(), WalkFailure> {
        let node = self.tree.node(id).ok_or(WalkFailure::LostFile)?;
        if !node.is_dir() {
            return Err(WalkFailure::TypeMismatch);
        }
        if !dir.is_dir() {
            return Err(WalkFailure::LostFile);
        }
        for child in self.tree.children(id) {
            let child_node = self.tree.node(child).ok_or(WalkFailure::LostFile)?;
            let target = dir.join(child_node.name());
            match child_node.kind() {
                FileType::Dir => {
                    fs::create_dir(&target)?;
                    self.write_local(child, &target)?;
                }
                FileType::File => {
                    let bytes = child_node.buffer().ok_or(WalkFailure::LostFile)?;
                    let mut file = OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .open(&target)?;
                    file.write_all(bytes)?;
                }
                FileType::Unknown => {}
            }
        }
        Ok(())
    }

    fn upload_retry(&mut self, local: &Path, remote_parent: &str) {
        if self.step_lock.is_held() {
            return;
        }
        let Some(parent) = self.tree.resolve(remote_parent) else {
            self.fail_walk(WalkFailure::LostFile);
            return;
        };
        if !self.settled_folder(parent) {
            return;
        }
        let name = local
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        let Some(head) = self.tree.child_by_name(parent, &name) else {
            self.send_step(Step::Mkdir {
                parent: remote_parent.to_string(),
                name,
            });
            return;
        };
        match self.upload_walk(head, local) {
            Ok(true) => self.finish_recursive(RequestState::Good, "Folder uploaded.".into()),
            Ok(false) => {}
            Err(failure) => self.fail_walk(failure),
        }
    }

    /// Whether a folder's children can be trusted right now. Asks for a
    /// listing when they cannot.
    fn settled_folder(&mut self, id: NodeId) -> bool {
        let Some(node) = self.tree.node(id) else {
            return false;
        };
        if node.is_loaded() && node.pending_list().is_none() {
            return true;
        }
        self.refresh_node(id);
        false
    }

    fn upload_walk(&mut self, id: NodeId, local: &Path) -> Result<bool, WalkFailure> {
        if self.step_lock.is_held() {
            return Ok(false);
        }
        let node = self.tree.node(id).ok_or(WalkFailure::LostFile)?;
        if !node.is_dir() {
            return Err(WalkFailure::TypeMismatch);
        }
        let remote = node.path().to_string();
        if !self.settled_folder(id) {
            return Ok(false);
        }

        for entry in local_entries(local)? {
            let child = self.tree.child_by_name(id, &entry.name);
            if entry.is_dir {
                let Some(child) = child else {
                    self.send_step(Step::Mkdir {
                        parent: remote,
                        name: entry.name,
                    });
                    return Ok(false);
                };
                if !self.upload_walk(child, &entry.path)? {
                    return Ok(false);
                }
            } else {
                let Some(child) = child else {
                    self.send_step(Step::Upload {
                        folder: remote,
                        local: entry.path,
                    });
                    return Ok(false);
                };
                if !self.tree.node(child).is_some_and(|node| node.is_file()) {
                    return Err(WalkFailure::TypeMismatch);
                }
            }
        }
        Ok(true)
    }

    fn send_step(&mut self, step: Step) -> bool {
        let Some(guard) = self.step_lock.try_claim() else {
            return false;
        };
        let request = step.request();
        let call = self.calls.push(request);
        debug!(%call, ?step, "folder upload step issued");
        self.in_flight.insert(call, CallRoute::Step { step, guard });
        true
    }

    pub(super) fn on_step_reply(
        &mut self,
        step: Step,
        guard: FlightGuard,
        result: Result<ReplyPayload, RemoteError>,
    ) {
        guard.release();
        let active = self.performing_recursive_upload();
        match result {
            Ok(_) => {
                let folder = match &step {
                    Step::Mkdir { parent, .. } => self.closest_id(parent),
                    Step::Upload { folder, local } => {
                        let name = local
                            .file_name()
                            .and_then(|name| name.to_str())
                            .unwrap_or_default();
                        self.parent_id_of(&paths::join(folder, name))
                    }
                };
                // A listing sent before this step landed cannot show its result.
                self.relist_node(folder);
                if !active {
                    debug!(?step, "folder upload step finished after cancellation");
                }
            }
            Err(err) => {
                warn!(?step, error = %err, "folder upload step failed");
                if active {
                    let state = err.request_state();
                    self.finish_recursive(
                        state,
                        format!("{}: {}", step.failure_context(), state.describe()),
                    );
                }
            }
        }
    }

    fn fail_walk(&mut self, failure: WalkFailure) {
        self.finish_recursive(failure.state(), failure.message());
    }
}

fn within(path: &str, root: &str) -> bool {
    path == root || root == "/" || path.starts_with(&format!("{root}/"))
}

/// Local children sorted by name. Symlinks and special files are skipped.
fn local_entries(dir: &Path) -> io::Result<Vec<LocalEntry>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let kind = entry.file_type()?;
        if !kind.is_dir() && !kind.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        out.push(LocalEntry {
            name,
            path: entry.path(),
            is_dir: kind.is_dir(),
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}
