use std::fs;
use std::sync::Arc;
use std::time::Duration;

use remotefs_core::{LoopbackStore, RequestState};
use remotefsd::mirror::NodeState;
use remotefsd::runtime::{MirrorRuntime, RuntimeError};
use remotefsd::sync::EngineEvent;
use tempfile::TempDir;

const LIMIT: Duration = Duration::from_secs(10);

fn seeded_store() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("alice/docs")).unwrap();
    fs::write(dir.path().join("alice/docs/a.txt"), b"hello").unwrap();
    fs::write(dir.path().join("alice/b.txt"), b"hi").unwrap();
    dir
}

async fn loaded_runtime(store: &TempDir) -> MirrorRuntime {
    let api = Arc::new(LoopbackStore::new(store.path()));
    let mut rt = MirrorRuntime::new(api, "/alice");
    rt.load_root(LIMIT).await.unwrap();
    rt
}

#[tokio::test]
async fn locate_loads_ancestors_and_buffers_files() {
    let store = seeded_store();
    let mut rt = loaded_runtime(&store).await;
    let docs = rt.engine().ref_for_path("/alice/docs");
    assert_eq!(rt.engine().node_state(&docs), NodeState::FolderUnloaded);

    let file = rt.locate("/alice/docs/a.txt", false, LIMIT).await.unwrap();

    assert_eq!(rt.engine().file_buffer(&file), Some(&b"hello"[..]));
    let docs = rt.engine().ref_for_path("/alice/docs");
    assert_eq!(rt.engine().node_state(&docs), NodeState::FolderLoaded);
}

#[tokio::test]
async fn locate_reports_missing_entries() {
    let store = seeded_store();
    let mut rt = loaded_runtime(&store).await;

    let err = rt.locate("/alice/docs/nope", false, LIMIT).await.unwrap_err();
    assert!(matches!(err, RuntimeError::NotFound(ref path) if path == "/alice/docs/nope"));
    assert_eq!(err.request_state(), RequestState::FileNotFound);

    let err = rt.find("/alice/ghost", LIMIT).await.unwrap_err();
    assert!(matches!(err, RuntimeError::NotFound(_)));
}

#[tokio::test]
async fn missing_root_goes_fatal_after_one_reset() {
    let store = tempfile::tempdir().unwrap();
    let mut rt = MirrorRuntime::new(Arc::new(LoopbackStore::new(store.path())), "/alice");

    let err = rt.load_root(LIMIT).await.unwrap_err();

    assert!(matches!(err, RuntimeError::Fatal(_)));
    assert!(rt.engine().is_fatal());
    let resets = rt
        .take_events()
        .iter()
        .filter(|event| **event == EngineEvent::MirrorReset)
        .count();
    assert_eq!(resets, 2);
}

#[tokio::test]
async fn single_operations_round_trip_through_the_store() {
    let store = seeded_store();
    let mut rt = loaded_runtime(&store).await;
    let root = rt.engine().root_ref();

    rt.engine_mut().mkdir(&root, "proj").unwrap();
    let finished = rt.wait_for_finish(LIMIT).await.unwrap();
    assert_eq!(finished.state, RequestState::Good);
    assert_eq!(finished.message, "New folder created at /alice/proj");
    rt.settle(LIMIT).await.unwrap();
    assert!(!rt.engine().ref_for_path("/alice/proj").is_nil());

    let b = rt.find("/alice/b.txt", LIMIT).await.unwrap();
    rt.engine_mut().rename_node(&b, "c.txt").unwrap();
    assert!(rt.wait_for_finish(LIMIT).await.unwrap().state.is_good());
    rt.settle(LIMIT).await.unwrap();
    assert!(rt.engine().ref_for_path("/alice/b.txt").is_nil());
    assert!(store.path().join("alice/c.txt").is_file());

    let c = rt.engine().ref_for_path("/alice/c.txt");
    rt.engine_mut().delete_node(&c).unwrap();
    assert!(rt.wait_for_finish(LIMIT).await.unwrap().state.is_good());
    rt.settle(LIMIT).await.unwrap();
    assert!(!store.path().join("alice/c.txt").exists());
    assert!(!rt.engine().node_extant(&c));
}

#[tokio::test]
async fn failed_operation_reports_remote_status() {
    let store = seeded_store();
    let mut rt = loaded_runtime(&store).await;
    let b = rt.engine().ref_for_path("/alice/b.txt");
    fs::remove_file(store.path().join("alice/b.txt")).unwrap();

    rt.engine_mut().delete_node(&b).unwrap();
    let finished = rt.wait_for_finish(LIMIT).await.unwrap();

    assert_eq!(finished.state, RequestState::FileNotFound);
    assert!(finished.message.starts_with("Unable to delete file: "));
    assert!(!rt.engine().operation_pending());
}

#[tokio::test]
async fn pushed_folder_can_be_pulled_back() {
    let store = seeded_store();
    let mut rt = loaded_runtime(&store).await;
    let local = tempfile::tempdir().unwrap();
    let proj = local.path().join("proj");
    fs::create_dir_all(proj.join("sub/deeper")).unwrap();
    fs::write(proj.join("x.txt"), b"x").unwrap();
    fs::write(proj.join("sub/y.txt"), b"y").unwrap();

    let root = rt.engine().root_ref();
    rt.engine_mut().upload_folder(&root, &proj).unwrap();
    let finished = rt.wait_for_finish(LIMIT).await.unwrap();
    assert_eq!(finished.message, "Folder uploaded.");
    assert_eq!(fs::read(store.path().join("alice/proj/sub/y.txt")).unwrap(), b"y");
    assert!(store.path().join("alice/proj/sub/deeper").is_dir());

    let back = tempfile::tempdir().unwrap();
    let remote = rt.locate("/alice/proj", true, LIMIT).await.unwrap();
    rt.engine_mut().download_folder(&remote, back.path()).unwrap();
    let finished = rt.wait_for_finish(LIMIT).await.unwrap();

    assert_eq!(finished.state, RequestState::Good);
    assert_eq!(fs::read(back.path().join("proj/x.txt")).unwrap(), b"x");
    assert_eq!(fs::read(back.path().join("proj/sub/y.txt")).unwrap(), b"y");
    assert!(back.path().join("proj/sub/deeper").is_dir());
    assert!(!rt.engine().operation_pending());
}

#[tokio::test]
async fn compress_then_extract_round_trip() {
    let store = seeded_store();
    let mut rt = loaded_runtime(&store).await;
    let docs = rt.engine().ref_for_path("/alice/docs");

    rt.engine_mut().compress_folder(&docs).unwrap();
    assert!(rt.wait_for_finish(LIMIT).await.unwrap().state.is_good());
    assert!(store.path().join("alice/docs.tgz").is_file());

    // Batch jobs leave refreshing to the caller.
    assert!(rt.engine().ref_for_path("/alice/docs.tgz").is_nil());
    fs::remove_dir_all(store.path().join("alice/docs")).unwrap();
    let root = rt.engine().root_ref();
    rt.engine_mut().refresh_folder(&root, false).unwrap();
    rt.settle(LIMIT).await.unwrap();
    assert!(rt.engine().ref_for_path("/alice/docs").is_nil());

    let archive = rt.engine().ref_for_path("/alice/docs.tgz");
    rt.engine_mut().decompress_file(&archive).unwrap();
    assert!(rt.wait_for_finish(LIMIT).await.unwrap().state.is_good());
    assert_eq!(
        fs::read(store.path().join("alice/docs/a.txt")).unwrap(),
        b"hello"
    );
}

#[tokio::test]
async fn step_is_idle_without_calls() {
    let store = seeded_store();
    let mut rt = loaded_runtime(&store).await;
    assert!(!rt.step(LIMIT).await.unwrap());

    let root = rt.engine().root_ref();
    rt.engine_mut().refresh_folder(&root, false).unwrap();
    assert!(rt.step(LIMIT).await.unwrap());
    assert_eq!(rt.in_flight(), 0);
}
