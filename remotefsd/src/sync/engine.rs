use std::collections::HashMap;

use remotefs_core::{
    CallId, FileType, RemoteCall, RemoteError, RemoteReply, RemoteRequest, ReplyPayload,
    RequestState, paths,
};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::calls::CallQueue;
use super::lock::{FlightGuard, SingleFlight};
use crate::mirror::{MirrorTree, NodeId, NodeRef, NodeState};

#[path = "engine_impl_ops.rs"]
mod ops;
#[path = "engine_impl_recursive.rs"]
mod recursive;

use ops::PendingOp;
use recursive::{RecursiveTask, Step};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("entry not found in mirror: {0}")]
    NodeNotFound(String),
    #[error("another operation is still in progress")]
    NotReady,
    #[error("still cleaning up tasks from the last folder upload, please wait")]
    CleaningUp,
    #[error("{0}")]
    InvalidParam(String),
    #[error("{0}")]
    LocalFile(String),
    #[error("no folder transfer is running")]
    NoRecursiveTask,
}

impl EngineError {
    pub fn request_state(&self) -> RequestState {
        match self {
            EngineError::NodeNotFound(_) => RequestState::FileNotFound,
            EngineError::NotReady | EngineError::CleaningUp => RequestState::NotReady,
            EngineError::InvalidParam(_) | EngineError::NoRecursiveTask => {
                RequestState::InvalidParam
            }
            EngineError::LocalFile(_) => RequestState::LocalFileError,
        }
    }
}

/// Notifications for whoever presents the mirror.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    NodeChanged(NodeRef),
    OperationStarted(String),
    OperationFinished { state: RequestState, message: String },
    MirrorReset,
    Fatal(String),
}

enum CallRoute {
    Listing { path: String },
    Buffer { path: String },
    Operation { op: PendingOp, guard: FlightGuard },
    Step { step: Step, guard: FlightGuard },
}

/// Single-owner state machine over the mirror.
///
/// The engine never performs I/O against the remote store. Calls are queued
/// and collected with [`SyncEngine::take_calls`]; each result comes back
/// through [`SyncEngine::handle_reply`].
pub struct SyncEngine {
    root_path: String,
    tree: MirrorTree,
    calls: CallQueue,
    in_flight: HashMap<CallId, CallRoute>,
    op_lock: SingleFlight,
    step_lock: SingleFlight,
    recursive: Option<RecursiveTask>,
    events: UnboundedSender<EngineEvent>,
    root_loaded: bool,
    reset_attempted: bool,
    fatal: bool,
}

impl SyncEngine {
    pub fn new(root_path: &str, events: UnboundedSender<EngineEvent>) -> Self {
        let root_path = paths::normalize(root_path);
        Self {
            tree: MirrorTree::new(&root_path),
            root_path,
            calls: CallQueue::default(),
            in_flight: HashMap::new(),
            op_lock: SingleFlight::new("operation"),
            step_lock: SingleFlight::new("folder-upload-step"),
            recursive: None,
            events,
            root_loaded: false,
            reset_attempted: false,
            fatal: false,
        }
    }

    pub fn take_calls(&mut self) -> Vec<RemoteCall> {
        self.calls.drain()
    }

    pub fn has_queued_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    pub fn calls_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn root_loaded(&self) -> bool {
        self.root_loaded
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Tears the mirror down and issues a fresh root listing.
    pub fn reset(&mut self) {
        self.reset_attempted = false;
        self.fatal = false;
        self.rebuild();
    }

    fn rebuild(&mut self) {
        if let Some(task) = &self.recursive {
            let context = task.failure_context();
            self.finish_recursive(
                RequestState::Unclassified,
                format!("{context}: the mirror was reset"),
            );
        }
        self.tree = MirrorTree::new(&self.root_path);
        self.root_loaded = false;
        info!(root = %self.root_path, "mirror reset");
        self.emit(EngineEvent::MirrorReset);
        let root = self.tree.root();
        self.refresh_node(root);
    }

    pub fn handle_reply(&mut self, reply: RemoteReply) {
        let Some(route) = self.in_flight.remove(&reply.id) else {
            warn!(call = %reply.id, "reply for unknown call ignored");
            return;
        };
        match route {
            CallRoute::Listing { path } => self.on_listing_reply(reply.id, &path, reply.result),
            CallRoute::Buffer { path } => self.on_buffer_reply(reply.id, &path, reply.result),
            CallRoute::Operation { op, guard } => self.on_operation_reply(op, guard, reply.result),
            CallRoute::Step { step, guard } => self.on_step_reply(step, guard, reply.result),
        }
    }

    fn on_listing_reply(
        &mut self,
        call: CallId,
        path: &str,
        result: Result<ReplyPayload, RemoteError>,
    ) {
        let node = self
            .tree
            .resolve(path)
            .filter(|id| self.tree.end_listing(*id, call));
        let Some(node) = node else {
            debug!(%call, path, "stale listing reply dropped");
            return;
        };

        match result {
            Ok(ReplyPayload::Listing(entries)) => {
                self.tree.set_children(node, entries);
                if node == self.tree.root() {
                    self.root_loaded = true;
                    self.reset_attempted = false;
                }
                debug!(path, "listing applied");
                self.notify(node);
            }
            Ok(other) => {
                warn!(path, ?other, "listing reply carried an unexpected payload");
                if node == self.tree.root() {
                    self.recover_root(RequestState::Unclassified);
                } else {
                    self.listing_failed(node, path, RequestState::Unclassified, false);
                }
            }
            Err(err) => {
                warn!(path, error = %err, "listing failed");
                let not_found = matches!(err, RemoteError::NotFound(_));
                self.listing_failed(node, path, err.request_state(), not_found);
            }
        }
        self.continue_recursive();
    }

    /// A loaded root that fails to relist keeps its contents; only a root
    /// that never loaded or has vanished is rebuilt.
    fn listing_failed(&mut self, node: NodeId, path: &str, state: RequestState, not_found: bool) {
        if node == self.tree.root() && (!self.root_loaded || not_found) {
            self.recover_root(state);
            return;
        }
        if not_found {
            self.forget(node);
        } else {
            self.notify(node);
        }
        self.abort_walk_touching(path, state);
    }

    fn recover_root(&mut self, state: RequestState) {
        if self.reset_attempted {
            let message = format!("Unable to load the remote file listing: {}", state.describe());
            error!(root = %self.root_path, "{message}");
            self.fatal = true;
            self.emit(EngineEvent::Fatal(message));
            return;
        }
        warn!(root = %self.root_path, "root listing failed, rebuilding mirror");
        self.reset_attempted = true;
        self.rebuild();
    }

    fn on_buffer_reply(
        &mut self,
        call: CallId,
        path: &str,
        result: Result<ReplyPayload, RemoteError>,
    ) {
        let node = self
            .tree
            .resolve(path)
            .filter(|id| self.tree.end_buffer(*id, call));
        let Some(node) = node else {
            debug!(%call, path, "stale buffer reply dropped");
            return;
        };

        match result {
            Ok(ReplyPayload::Buffer(bytes)) => {
                debug!(path, len = bytes.len(), "buffer stored");
                self.tree.set_buffer(node, bytes);
                self.notify(node);
            }
            Ok(other) => {
                warn!(path, ?other, "buffer reply carried an unexpected payload");
                self.notify(node);
                self.abort_walk_touching(path, RequestState::Unclassified);
            }
            Err(err) => {
                warn!(path, error = %err, "buffer fetch failed");
                if matches!(err, RemoteError::NotFound(_)) {
                    self.forget(node);
                } else {
                    self.notify(node);
                }
                self.abort_walk_touching(path, err.request_state());
            }
        }
        self.continue_recursive();
    }

    /// Drops a node the remote store no longer has.
    fn forget(&mut self, node: NodeId) {
        let parent = self.tree.node(node).and_then(|n| n.parent());
        let removed = self.tree.delete_subtree(node);
        debug!(removed, "removed vanished entries");
        if let Some(parent) = parent {
            self.notify(parent);
        }
    }

    pub fn download_buffer(&mut self, target: &NodeRef) -> Result<bool, EngineError> {
        let id = self
            .resolve_ref(target, true)
            .ok_or_else(|| EngineError::NodeNotFound(target.path().to_string()))?;
        if !self.tree.node(id).is_some_and(|node| node.is_file()) {
            return Err(EngineError::InvalidParam(format!(
                "{} is not a file",
                target.path()
            )));
        }
        Ok(self.request_buffer(id))
    }

    pub fn refresh_folder(&mut self, target: &NodeRef, clear_data: bool) -> Result<bool, EngineError> {
        let id = self
            .resolve_ref(target, false)
            .ok_or_else(|| EngineError::NodeNotFound(target.path().to_string()))?;
        if clear_data {
            self.tree.clear_contents(id);
            self.notify(id);
        }
        Ok(self.refresh_node(id))
    }

    fn refresh_node(&mut self, id: NodeId) -> bool {
        let Some(node) = self.tree.node(id) else {
            return false;
        };
        if let Some(pending) = node.pending_list() {
            debug!(path = node.path(), %pending, "listing already pending");
            return false;
        }
        let path = node.path().to_string();
        let call = self.calls.push(RemoteRequest::List { path: path.clone() });
        debug!(%call, path, "listing requested");
        self.tree.begin_listing(id, call);
        self.in_flight.insert(call, CallRoute::Listing { path });
        true
    }

    fn request_buffer(&mut self, id: NodeId) -> bool {
        let Some(node) = self.tree.node(id) else {
            return false;
        };
        if let Some(pending) = node.pending_buffer() {
            debug!(path = node.path(), %pending, "buffer fetch already pending");
            return false;
        }
        let path = node.path().to_string();
        let call = self
            .calls
            .push(RemoteRequest::DownloadBuffer { path: path.clone() });
        debug!(%call, path, "buffer requested");
        self.tree.begin_buffer(id, call);
        self.in_flight.insert(call, CallRoute::Buffer { path });
        true
    }

    /// Lists `id` again even when a listing is already out. The outstanding
    /// reply may predate a change we just made, so it is dropped on arrival.
    fn relist_node(&mut self, id: NodeId) -> bool {
        if let Some(stale) = self.tree.supersede_listing(id) {
            debug!(%stale, "pending listing superseded");
        }
        self.refresh_node(id)
    }

    fn closest_id(&self, path: &str) -> NodeId {
        self.tree.closest_node(path).unwrap_or(self.tree.root())
    }

    fn parent_id_of(&self, path: &str) -> NodeId {
        match paths::parent(path).and_then(|parent| self.tree.resolve(&parent)) {
            Some(parent) => parent,
            None => self.tree.closest_loaded_ancestor(path),
        }
    }

    /// Refreshes the deepest known node on `path`.
    fn refresh_closest(&mut self, path: &str) {
        let id = self.closest_id(path);
        self.refresh_node(id);
    }

    /// Refreshes the folder holding `path`, falling back to the closest
    /// loaded ancestor when that folder is unknown.
    fn refresh_parent_of(&mut self, path: &str) {
        let id = self.parent_id_of(path);
        self.refresh_node(id);
    }

    /// Creates placeholder entries down to `full_path` when its ancestors are
    /// not loaded yet, then asks for whatever confirms the target.
    pub fn speculate(&mut self, full_path: &str, folder: bool) -> NodeRef {
        let Some(base) = self.tree.closest_node(full_path) else {
            return NodeRef::nil();
        };
        let Some(base_path) = self.tree.node(base).map(|node| node.path().to_string()) else {
            return NodeRef::nil();
        };
        let known = paths::segments(&base_path).count();
        let rest: Vec<String> = paths::segments(full_path)
            .skip(known)
            .map(str::to_string)
            .collect();
        self.speculate_from(base, &rest, folder)
    }

    pub fn speculate_under(&mut self, base: &NodeRef, added_path: &str, folder: bool) -> NodeRef {
        let Some(base) = self.resolve_ref(base, false) else {
            return NodeRef::nil();
        };
        let rest: Vec<String> = paths::segments(added_path).map(str::to_string).collect();
        self.speculate_from(base, &rest, folder)
    }

    fn speculate_from(&mut self, base: NodeId, parts: &[String], folder: bool) -> NodeRef {
        let mut current = base;
        for (idx, part) in parts.iter().enumerate() {
            if let Some(next) = self.tree.child_by_name(current, part) {
                current = next;
                continue;
            }
            let Some(node) = self.tree.node(current) else {
                return NodeRef::nil();
            };
            if !node.is_dir() {
                debug!(path = node.path(), part = %part, "speculation through a file");
                return NodeRef::nil();
            }
            if node.is_loaded() {
                return NodeRef::nil();
            }
            let kind = if idx + 1 == parts.len() && !folder {
                FileType::File
            } else {
                FileType::Dir
            };
            let Some(next) = self.tree.insert_provisional(current, part, kind) else {
                return NodeRef::nil();
            };
            self.refresh_node(current);
            current = next;
        }

        let Some(node) = self.tree.node(current) else {
            return NodeRef::nil();
        };
        if folder {
            if node.is_dir() && !node.is_loaded() {
                self.refresh_node(current);
            }
        } else if node.is_file() && node.buffer().is_none() {
            self.request_buffer(current);
        }
        self.tree.snapshot(current)
    }

    fn resolve_ref(&self, target: &NodeRef, verify_timestamp: bool) -> Option<NodeId> {
        if target.is_nil() {
            return None;
        }
        let id = self.tree.resolve(target.path())?;
        let node = self.tree.node(id)?;
        if verify_timestamp && node.meta().modified != target.modified() {
            return None;
        }
        Some(id)
    }

    pub fn node_extant(&self, target: &NodeRef) -> bool {
        self.resolve_ref(target, true).is_some()
    }

    pub fn node_state(&self, target: &NodeRef) -> NodeState {
        match self.resolve_ref(target, false) {
            Some(id) => self.tree.state(id),
            None => NodeState::NonExtant,
        }
    }

    pub fn parent_of(&self, target: &NodeRef) -> NodeRef {
        self.resolve_ref(target, false)
            .and_then(|id| self.tree.node(id)?.parent())
            .map(|parent| self.tree.snapshot(parent))
            .unwrap_or_default()
    }

    pub fn children_of(&self, target: &NodeRef) -> Vec<NodeRef> {
        let Some(id) = self.resolve_ref(target, false) else {
            return Vec::new();
        };
        self.tree
            .children(id)
            .into_iter()
            .map(|child| self.tree.snapshot(child))
            .collect()
    }

    pub fn child_with_name(&self, target: &NodeRef, name: &str) -> NodeRef {
        self.resolve_ref(target, false)
            .and_then(|id| self.tree.child_by_name(id, name))
            .map(|child| self.tree.snapshot(child))
            .unwrap_or_default()
    }

    pub fn file_buffer(&self, target: &NodeRef) -> Option<&[u8]> {
        let id = self.resolve_ref(target, true)?;
        self.tree.node(id)?.buffer()
    }

    pub fn set_file_buffer(&mut self, target: &NodeRef, bytes: Vec<u8>) -> bool {
        let Some(id) = self.resolve_ref(target, true) else {
            return false;
        };
        if !self.tree.set_buffer(id, bytes) {
            return false;
        }
        self.notify(id);
        true
    }

    pub fn is_root(&self, target: &NodeRef) -> bool {
        self.resolve_ref(target, false) == Some(self.tree.root())
    }

    pub fn is_ancestor_of(&self, ancestor: &NodeRef, descendant: &NodeRef) -> bool {
        match (
            self.resolve_ref(ancestor, false),
            self.resolve_ref(descendant, false),
        ) {
            (Some(a), Some(d)) => self.tree.is_ancestor(a, d),
            _ => false,
        }
    }

    pub fn operation_pending(&self) -> bool {
        self.op_lock.is_held()
    }

    pub fn ref_for_path(&self, path: &str) -> NodeRef {
        self.tree
            .resolve(path)
            .map(|id| self.tree.snapshot(id))
            .unwrap_or_default()
    }

    pub fn root_ref(&self) -> NodeRef {
        self.tree.snapshot(self.tree.root())
    }

    pub fn closest_loaded_ancestor(&self, path: &str) -> NodeRef {
        self.tree.snapshot(self.tree.closest_loaded_ancestor(path))
    }

    fn notify(&self, id: NodeId) {
        self.emit(EngineEvent::NodeChanged(self.tree.snapshot(id)));
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

#[cfg(test)]
#[path = "engine_tests/mod.rs"]
mod tests;
