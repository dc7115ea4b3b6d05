use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use remotefs_core::{RemoteApi, RemoteReply, RequestState, paths};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error};

use crate::mirror::{NodeRef, NodeState};
use crate::sync::{EngineError, EngineEvent, SyncEngine};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("timed out after {0:?} waiting for the remote store")]
    Timeout(Duration),
    #[error("nothing is in flight and the awaited condition cannot change")]
    Stalled,
    #[error("{0}")]
    Fatal(String),
    #[error("remote entry not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RuntimeError {
    pub fn request_state(&self) -> RequestState {
        match self {
            RuntimeError::NotFound(_) => RequestState::FileNotFound,
            RuntimeError::Engine(err) => err.request_state(),
            RuntimeError::Timeout(_) | RuntimeError::Stalled | RuntimeError::Fatal(_) => {
                RequestState::Unclassified
            }
        }
    }
}

/// Outcome of one top-level or folder operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub state: RequestState,
    pub message: String,
}

/// Owns a [`SyncEngine`] and carries its calls to a [`RemoteApi`].
///
/// Each drained call runs on its own tokio task; replies come back over a
/// channel and are fed to the engine one at a time, so the engine itself is
/// never shared.
pub struct MirrorRuntime {
    engine: SyncEngine,
    api: Arc<dyn RemoteApi>,
    replies_tx: UnboundedSender<RemoteReply>,
    replies: UnboundedReceiver<RemoteReply>,
    events: UnboundedReceiver<EngineEvent>,
    backlog: VecDeque<EngineEvent>,
    in_flight: usize,
    fatal: Option<String>,
}

impl MirrorRuntime {
    pub fn new(api: Arc<dyn RemoteApi>, root_path: &str) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (replies_tx, replies) = mpsc::unbounded_channel();
        Self {
            engine: SyncEngine::new(root_path, events_tx),
            api,
            replies_tx,
            replies,
            events,
            backlog: VecDeque::new(),
            in_flight: 0,
            fatal: None,
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SyncEngine {
        &mut self.engine
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Events received so far, oldest first.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        self.pump_events();
        self.backlog.drain(..).collect()
    }

    fn dispatch(&mut self) {
        for call in self.engine.take_calls() {
            debug!(call = %call.id, kind = call.request.kind(), "dispatching remote call");
            let api = Arc::clone(&self.api);
            let tx = self.replies_tx.clone();
            self.in_flight += 1;
            tokio::spawn(async move {
                let result = call.request.execute(api.as_ref()).await;
                if tx.send(RemoteReply { id: call.id, result }).is_err() {
                    debug!(call = %call.id, "runtime dropped before reply");
                }
            });
        }
    }

    fn pump_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            if let EngineEvent::Fatal(message) = &event {
                error!("{message}");
                self.fatal = Some(message.clone());
            }
            self.backlog.push_back(event);
        }
    }

    fn take_finished(&mut self) -> Option<Finished> {
        let idx = self
            .backlog
            .iter()
            .position(|event| matches!(event, EngineEvent::OperationFinished { .. }))?;
        match self.backlog.remove(idx) {
            Some(EngineEvent::OperationFinished { state, message }) => {
                Some(Finished { state, message })
            }
            _ => None,
        }
    }

    /// Waits for one reply and hands it to the engine. Returns `false` when
    /// nothing is in flight.
    pub async fn step(&mut self, limit: Duration) -> Result<bool, RuntimeError> {
        self.dispatch();
        if self.in_flight == 0 {
            return Ok(false);
        }
        self.receive(Instant::now() + limit, limit).await?;
        self.dispatch();
        self.pump_events();
        Ok(true)
    }

    async fn receive(&mut self, deadline: Instant, limit: Duration) -> Result<(), RuntimeError> {
        let reply = match timeout_at(deadline, self.replies.recv()).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return Err(RuntimeError::Stalled),
            Err(_) => return Err(RuntimeError::Timeout(limit)),
        };
        self.in_flight -= 1;
        self.engine.handle_reply(reply);
        Ok(())
    }

    /// Pumps replies until `done` holds.
    pub async fn run_until<F>(&mut self, limit: Duration, mut done: F) -> Result<(), RuntimeError>
    where
        F: FnMut(&mut Self) -> bool,
    {
        let deadline = Instant::now() + limit;
        loop {
            self.dispatch();
            self.pump_events();
            if let Some(message) = &self.fatal {
                return Err(RuntimeError::Fatal(message.clone()));
            }
            if done(self) {
                return Ok(());
            }
            if self.in_flight == 0 {
                return Err(RuntimeError::Stalled);
            }
            self.receive(deadline, limit).await?;
        }
    }

    /// Pumps replies until nothing is in flight.
    pub async fn settle(&mut self, limit: Duration) -> Result<(), RuntimeError> {
        self.run_until(limit, |rt| rt.in_flight == 0).await
    }

    /// Pumps replies until the next operation reports its outcome.
    pub async fn wait_for_finish(&mut self, limit: Duration) -> Result<Finished, RuntimeError> {
        let mut finished = None;
        self.run_until(limit, |rt| {
            finished = rt.take_finished();
            finished.is_some()
        })
        .await?;
        finished.ok_or(RuntimeError::Stalled)
    }

    /// Rebuilds the mirror and waits for the root listing.
    pub async fn load_root(&mut self, limit: Duration) -> Result<(), RuntimeError> {
        self.engine.reset();
        self.run_until(limit, |rt| rt.engine.root_loaded()).await
    }

    /// Finds `path` in the mirror, loading whatever lies on the way. A folder
    /// is returned listed; a file is returned with its contents buffered.
    pub async fn locate(
        &mut self,
        path: &str,
        folder: bool,
        limit: Duration,
    ) -> Result<NodeRef, RuntimeError> {
        let path = paths::normalize(path);
        let target = self.engine.speculate(&path, folder);
        if target.is_nil() {
            return Err(RuntimeError::NotFound(path));
        }
        self.run_until(limit, |rt| {
            let current = rt.engine.ref_for_path(&path);
            !matches!(
                rt.engine.node_state(&current),
                NodeState::Provisional | NodeState::FolderListing | NodeState::FileBufferLoading
            )
        })
        .await?;
        let found = self.engine.ref_for_path(&path);
        if found.is_nil() {
            return Err(RuntimeError::NotFound(path));
        }
        Ok(found)
    }

    /// Finds an entry of unknown kind by listing its parent.
    pub async fn find(&mut self, path: &str, limit: Duration) -> Result<NodeRef, RuntimeError> {
        let path = paths::normalize(path);
        let root = self.engine.root_ref();
        if path == root.path() {
            return Ok(root);
        }
        let (Some(parent), Some(name)) = (paths::parent(&path), paths::file_name(&path)) else {
            return Err(RuntimeError::NotFound(path.clone()));
        };
        let folder = self.locate(&parent, true, limit).await?;
        let found = self.engine.child_with_name(&folder, name);
        if found.is_nil() {
            return Err(RuntimeError::NotFound(path));
        }
        Ok(found)
    }
}
