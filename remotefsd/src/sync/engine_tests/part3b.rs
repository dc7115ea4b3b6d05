use std::fs;

use super::*;

#[test]
fn cancelled_upload_waits_for_in_flight_step() {
    let mut h = Harness::loaded("/home", Vec::new());
    let tmp = tempfile::tempdir().unwrap();
    let proj = tmp.path().join("proj");
    fs::create_dir(&proj).unwrap();
    fs::write(proj.join("x.txt"), b"x").unwrap();
    let root = h.engine.root_ref();
    h.engine.upload_folder(&root, &proj).unwrap();
    let step = h.single_call();

    assert_eq!(h.engine.abort_recursive(), Ok(()));
    assert!(!h.engine.operation_pending());
    assert_eq!(
        h.finished(),
        vec![(
            RequestState::StoppedByUser,
            "Folder upload stopped by user.".to_string()
        )]
    );

    assert_eq!(
        h.engine.upload_folder(&root, &proj),
        Err(EngineError::CleaningUp)
    );
    assert_eq!(h.finished()[0].0, RequestState::NotReady);
    assert!(!h.engine.operation_pending());

    h.ok(&step, ReplyPayload::Entry(dir("/home/proj")));
    let refresh = h.single_call();
    assert_eq!(listed_path(&refresh), Some("/home"));
    h.listing(&refresh, vec![dir("/home/proj")]);

    assert!(h.calls().is_empty());
    assert!(h.finished().is_empty());

    let root = h.engine.root_ref();
    let err = h.engine.upload_folder(&root, &proj).unwrap_err();
    assert_eq!(err.request_state(), RequestState::InvalidParam);
}

#[test]
fn abort_without_transfer_is_an_error() {
    let mut h = Harness::loaded("/home", Vec::new());
    assert_eq!(h.engine.abort_recursive(), Err(EngineError::NoRecursiveTask));
    assert!(h.drain_events().is_empty());
}

#[test]
fn reset_ends_a_running_transfer() {
    let mut h = Harness::loaded("/alice", vec![dir("/alice/r")]);
    let tmp = tempfile::tempdir().unwrap();
    let r = h.node("/alice/r");
    h.engine.download_folder(&r, tmp.path()).unwrap();
    h.calls();

    h.engine.reset();

    assert!(!h.engine.performing_recursive_download());
    assert!(!h.engine.operation_pending());
    assert_eq!(
        h.finished(),
        vec![(
            RequestState::Unclassified,
            "Folder download failed: the mirror was reset".to_string()
        )]
    );
    assert_eq!(listed_paths(&h.calls()), ["/alice"]);
}

#[test]
fn speculation_builds_provisional_chain() {
    let mut h = Harness::loaded("/alice", vec![dir("/alice/a")]);

    let target = h.engine.speculate("/alice/a/up/new.txt", false);

    assert_eq!(target.path(), "/alice/a/up/new.txt");
    assert_eq!(h.engine.node_state(&target), NodeState::Provisional);
    let calls = h.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(listed_paths(&calls), ["/alice/a", "/alice/a/up"]);
    assert_eq!(
        calls[2].request,
        RemoteRequest::DownloadBuffer {
            path: "/alice/a/up/new.txt".into()
        }
    );

    h.listing(&calls[0], vec![dir("/alice/a/up")]);
    assert_eq!(
        h.engine.node_state(&h.node("/alice/a/up")),
        NodeState::FolderListing
    );
    assert_eq!(h.engine.node_state(&target), NodeState::Provisional);

    h.listing(&calls[1], vec![file("/alice/a/up/new.txt", 7)]);
    let confirmed = h.node("/alice/a/up/new.txt");
    assert_eq!(confirmed.modified(), Some(7));
    assert_eq!(h.engine.node_state(&confirmed), NodeState::FileBufferLoading);

    h.ok(&calls[2], ReplyPayload::Buffer(b"data".to_vec()));
    assert_eq!(h.engine.file_buffer(&confirmed), Some(&b"data"[..]));
}

#[test]
fn disproved_speculation_is_removed() {
    let mut h = Harness::loaded("/alice", vec![dir("/alice/a")]);
    let ghost = h.engine.speculate("/alice/a/ghost", true);
    let calls = h.calls();
    assert_eq!(listed_paths(&calls), ["/alice/a", "/alice/a/ghost"]);

    h.listing(&calls[0], Vec::new());
    assert!(h.node("/alice/a/ghost").is_nil());
    assert_eq!(h.engine.node_state(&ghost), NodeState::NonExtant);

    h.fail(&calls[1], RemoteError::NotFound("/alice/a/ghost".into()));
    assert!(h.calls().is_empty());
    assert_eq!(
        h.engine.node_state(&h.node("/alice/a")),
        NodeState::FolderLoaded
    );
}

#[test]
fn speculation_stops_at_authoritative_folders() {
    let mut h = Harness::loaded("/alice", vec![dir("/alice/a"), file("/alice/b.txt", 1)]);

    assert!(h.engine.speculate("/alice/ghost/x", true).is_nil());
    assert!(h.engine.speculate("/alice/b.txt/x", true).is_nil());
    assert!(h.engine.speculate("/elsewhere/x", true).is_nil());
    assert!(h.calls().is_empty());
}

#[test]
fn speculating_a_known_folder_loads_it() {
    let mut h = Harness::loaded("/alice", vec![dir("/alice/a")]);

    let a = h.engine.speculate("/alice/a", true);

    assert_eq!(a, h.node("/alice/a"));
    assert_eq!(listed_paths(&h.calls()), ["/alice/a"]);
}

#[test]
fn speculate_under_is_relative_to_base() {
    let mut h = Harness::loaded("/alice", vec![dir("/alice/a")]);
    let a = h.node("/alice/a");

    let up = h.engine.speculate_under(&a, "up", true);

    assert_eq!(up.path(), "/alice/a/up");
    assert_eq!(listed_paths(&h.calls()), ["/alice/a", "/alice/a/up"]);
    assert!(h.engine.speculate_under(&NodeRef::nil(), "up", true).is_nil());
}
