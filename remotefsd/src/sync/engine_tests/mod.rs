use remotefs_core::FileMetadata;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use super::*;

mod part1;
mod part2;
mod part3a;
mod part3b;

struct Harness {
    engine: SyncEngine,
    events: UnboundedReceiver<EngineEvent>,
}

impl Harness {
    fn new(root: &str) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            engine: SyncEngine::new(root, tx),
            events: rx,
        }
    }

    /// Engine whose root listing has been answered with `entries`.
    fn loaded(root: &str, entries: Vec<FileMetadata>) -> Self {
        let mut harness = Self::new(root);
        harness.engine.reset();
        let call = harness.single_call();
        harness.listing(&call, entries);
        harness.drain_events();
        harness
    }

    fn calls(&mut self) -> Vec<RemoteCall> {
        self.engine.take_calls()
    }

    fn single_call(&mut self) -> RemoteCall {
        let mut calls = self.calls();
        assert_eq!(calls.len(), 1, "expected exactly one call, got {calls:?}");
        calls.remove(0)
    }

    fn listing(&mut self, call: &RemoteCall, entries: Vec<FileMetadata>) {
        self.engine
            .handle_reply(RemoteReply::ok(call.id, ReplyPayload::Listing(entries)));
    }

    fn ok(&mut self, call: &RemoteCall, payload: ReplyPayload) {
        self.engine.handle_reply(RemoteReply::ok(call.id, payload));
    }

    fn fail(&mut self, call: &RemoteCall, error: RemoteError) {
        self.engine.handle_reply(RemoteReply::err(call.id, error));
    }

    /// Lists `path` through the engine and answers with `entries`.
    fn load_folder(&mut self, path: &str, entries: Vec<FileMetadata>) {
        let folder = self.node(path);
        assert_eq!(self.engine.refresh_folder(&folder, false), Ok(true));
        let call = self.single_call();
        self.listing(&call, entries);
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn finished(&mut self) -> Vec<(RequestState, String)> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::OperationFinished { state, message } => Some((state, message)),
                _ => None,
            })
            .collect()
    }

    fn node(&self, path: &str) -> NodeRef {
        self.engine.ref_for_path(path)
    }
}

fn dir(path: &str) -> FileMetadata {
    FileMetadata::new(path, FileType::Dir)
}

fn file(path: &str, modified: i64) -> FileMetadata {
    FileMetadata::new(path, FileType::File)
        .with_size(2)
        .with_modified(modified)
}

fn listed_path(call: &RemoteCall) -> Option<&str> {
    match &call.request {
        RemoteRequest::List { path } => Some(path),
        _ => None,
    }
}

fn listed_paths(calls: &[RemoteCall]) -> Vec<&str> {
    calls.iter().filter_map(listed_path).collect()
}
