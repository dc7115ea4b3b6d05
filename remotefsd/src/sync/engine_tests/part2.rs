use std::fs;
use std::path::Path;

use super::*;

fn with_folder() -> Harness {
    Harness::loaded("/alice", vec![dir("/alice/r"), file("/alice/b.txt", 100)])
}

fn is_buffer_call(call: &RemoteCall, path: &str) -> bool {
    call.request == RemoteRequest::DownloadBuffer { path: path.into() }
}

fn local_is_empty(dir: &Path) -> bool {
    fs::read_dir(dir).unwrap().next().is_none()
}

#[test]
fn downloads_whole_tree_once_everything_is_buffered() {
    let mut h = with_folder();
    let tmp = tempfile::tempdir().unwrap();
    let local = tmp.path().join("r");
    let r = h.node("/alice/r");

    h.engine.download_folder(&r, tmp.path()).unwrap();
    assert!(h.engine.performing_recursive_download());
    assert!(h.engine.operation_pending());
    assert!(local.is_dir());

    let list_r = h.single_call();
    assert_eq!(listed_path(&list_r), Some("/alice/r"));
    h.listing(&list_r, vec![file("/alice/r/f1.txt", 1), dir("/alice/r/s")]);

    let calls = h.calls();
    assert_eq!(calls.len(), 2);
    assert!(is_buffer_call(&calls[0], "/alice/r/f1.txt"));
    assert_eq!(listed_path(&calls[1]), Some("/alice/r/s"));

    h.ok(&calls[0], ReplyPayload::Buffer(b"one".to_vec()));
    assert!(h.calls().is_empty());
    assert!(local_is_empty(&local));

    h.listing(&calls[1], vec![file("/alice/r/s/g.txt", 1)]);
    let fetch_g = h.single_call();
    assert!(is_buffer_call(&fetch_g, "/alice/r/s/g.txt"));
    assert!(local_is_empty(&local));

    h.ok(&fetch_g, ReplyPayload::Buffer(b"two".to_vec()));

    assert_eq!(fs::read(local.join("f1.txt")).unwrap(), b"one");
    assert_eq!(fs::read(local.join("s").join("g.txt")).unwrap(), b"two");
    assert!(!h.engine.performing_recursive_download());
    assert!(!h.engine.operation_pending());
    assert_eq!(
        h.finished(),
        vec![(RequestState::Good, "Remote folder downloaded.".to_string())]
    );
}

#[test]
fn repeated_listing_does_not_refetch_satisfied_entries() {
    let mut h = with_folder();
    let tmp = tempfile::tempdir().unwrap();
    let r = h.node("/alice/r");
    h.engine.download_folder(&r, tmp.path()).unwrap();
    let list_r = h.single_call();
    h.listing(&list_r, vec![file("/alice/r/f1.txt", 1), dir("/alice/r/s")]);
    let calls = h.calls();
    let list_s = calls[1].clone();
    h.ok(&calls[0], ReplyPayload::Buffer(b"one".to_vec()));
    assert!(h.calls().is_empty());

    let r = h.node("/alice/r");
    assert_eq!(h.engine.refresh_folder(&r, false), Ok(true));
    let relist = h.single_call();
    h.listing(&relist, vec![file("/alice/r/f1.txt", 1), dir("/alice/r/s")]);

    assert!(h.calls().is_empty());
    assert!(h.engine.performing_recursive_download());

    h.listing(&list_s, Vec::new());

    assert!(h.calls().is_empty());
    assert_eq!(fs::read(tmp.path().join("r/f1.txt")).unwrap(), b"one");
    let finished = h.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].0, RequestState::Good);
}

#[test]
fn stale_parent_listing_keeps_one_refresh_per_subfolder() {
    let mut h = with_folder();
    let tmp = tempfile::tempdir().unwrap();
    let r = h.node("/alice/r");
    h.engine.download_folder(&r, tmp.path()).unwrap();
    let list_r = h.single_call();
    h.listing(&list_r, vec![dir("/alice/r/s")]);

    let list_s = h.single_call();
    assert_eq!(listed_path(&list_s), Some("/alice/r/s"));

    let r = h.node("/alice/r");
    h.engine.refresh_folder(&r, false).unwrap();
    let relist = h.single_call();
    h.listing(&relist, vec![dir("/alice/r/s")]);

    assert!(h.calls().is_empty());
    assert_eq!(
        h.engine.node_state(&h.node("/alice/r/s")),
        NodeState::FolderListing
    );

    h.listing(&list_s, Vec::new());

    assert!(tmp.path().join("r/s").is_dir());
    assert_eq!(h.finished()[0].0, RequestState::Good);
}

#[test]
fn vanished_subfolder_aborts_the_download() {
    let mut h = with_folder();
    let tmp = tempfile::tempdir().unwrap();
    let r = h.node("/alice/r");
    h.engine.download_folder(&r, tmp.path()).unwrap();
    let list_r = h.single_call();
    h.listing(&list_r, vec![dir("/alice/r/s")]);
    let list_s = h.single_call();

    h.fail(&list_s, RemoteError::NotFound("/alice/r/s".into()));

    assert!(!h.engine.performing_recursive_download());
    assert!(!h.engine.operation_pending());
    assert!(h.node("/alice/r/s").is_nil());
    assert!(local_is_empty(&tmp.path().join("r")));
    assert_eq!(
        h.finished(),
        vec![(
            RequestState::FileNotFound,
            "Folder download failed: Remote file or folder does not exist".to_string()
        )]
    );
}

#[test]
fn local_write_failure_aborts_the_download() {
    let mut h = with_folder();
    let tmp = tempfile::tempdir().unwrap();
    let r = h.node("/alice/r");
    h.engine.download_folder(&r, tmp.path()).unwrap();
    let list_r = h.single_call();
    h.listing(&list_r, vec![file("/alice/r/f1.txt", 1)]);
    let fetch = h.single_call();
    fs::write(tmp.path().join("r/f1.txt"), b"old").unwrap();

    h.ok(&fetch, ReplyPayload::Buffer(b"new".to_vec()));

    assert_eq!(fs::read(tmp.path().join("r/f1.txt")).unwrap(), b"old");
    assert!(!h.engine.operation_pending());
    assert_eq!(h.finished()[0].0, RequestState::LocalFileError);
}

#[test]
fn download_validation_releases_the_lock() {
    let mut h = with_folder();
    let tmp = tempfile::tempdir().unwrap();
    let r = h.node("/alice/r");
    let b = h.node("/alice/b.txt");

    let err = h.engine.download_folder(&b, tmp.path()).unwrap_err();
    assert_eq!(err.request_state(), RequestState::InvalidParam);

    let err = h
        .engine
        .download_folder(&r, &tmp.path().join("missing"))
        .unwrap_err();
    assert_eq!(err.request_state(), RequestState::LocalFileError);

    fs::create_dir(tmp.path().join("r")).unwrap();
    assert_eq!(
        h.engine.download_folder(&r, tmp.path()),
        Err(EngineError::LocalFile(
            "Download destination already occupied.".into()
        ))
    );

    assert!(!h.engine.operation_pending());
    assert!(h.calls().is_empty());
    assert_eq!(h.finished().len(), 3);
}

#[test]
fn download_waits_for_the_operation_lock() {
    let mut h = with_folder();
    let tmp = tempfile::tempdir().unwrap();
    let r = h.node("/alice/r");
    let b = h.node("/alice/b.txt");
    h.engine.delete_node(&b).unwrap();
    h.calls();

    assert_eq!(
        h.engine.download_folder(&r, tmp.path()),
        Err(EngineError::NotReady)
    );
    assert!(!tmp.path().join("r").exists());
}

#[test]
fn cancelled_download_writes_nothing() {
    let mut h = with_folder();
    let tmp = tempfile::tempdir().unwrap();
    let r = h.node("/alice/r");
    h.engine.download_folder(&r, tmp.path()).unwrap();
    let list_r = h.single_call();
    h.listing(&list_r, vec![file("/alice/r/f1.txt", 1)]);
    let fetch = h.single_call();

    assert_eq!(h.engine.abort_recursive(), Ok(()));
    assert!(!h.engine.operation_pending());
    assert_eq!(
        h.finished(),
        vec![(
            RequestState::StoppedByUser,
            "Folder download stopped by user.".to_string()
        )]
    );

    h.ok(&fetch, ReplyPayload::Buffer(b"one".to_vec()));

    let f1 = h.node("/alice/r/f1.txt");
    assert_eq!(h.engine.file_buffer(&f1), Some(&b"one"[..]));
    assert!(local_is_empty(&tmp.path().join("r")));
    assert!(h.finished().is_empty());
    assert_eq!(h.engine.abort_recursive(), Err(EngineError::NoRecursiveTask));
}
