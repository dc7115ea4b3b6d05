use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::*;

/// `proj/` holding `x.txt` and an empty `sub/`.
fn local_project() -> (TempDir, PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let proj = tmp.path().join("proj");
    fs::create_dir_all(proj.join("sub")).unwrap();
    fs::write(proj.join("x.txt"), b"x").unwrap();
    (tmp, proj)
}

fn mkdir_call(parent: &str, name: &str) -> RemoteRequest {
    RemoteRequest::Mkdir {
        path: parent.into(),
        new_name: name.into(),
    }
}

fn steps_in(calls: &[RemoteCall]) -> usize {
    calls
        .iter()
        .filter(|call| {
            matches!(
                call.request,
                RemoteRequest::Mkdir { .. } | RemoteRequest::UploadFile { .. }
            )
        })
        .count()
}

fn start_upload(h: &mut Harness, local: &Path) {
    let root = h.engine.root_ref();
    h.engine.upload_folder(&root, local).unwrap();
}

#[test]
fn uploads_one_step_at_a_time() {
    let mut h = Harness::loaded("/home", Vec::new());
    let (_tmp, proj) = local_project();
    start_upload(&mut h, &proj);
    assert!(h.engine.performing_recursive_upload());

    let step = h.single_call();
    assert_eq!(step.request, mkdir_call("/home", "proj"));
    h.ok(&step, ReplyPayload::Entry(dir("/home/proj")));

    let call = h.single_call();
    assert_eq!(listed_path(&call), Some("/home"));
    h.listing(&call, vec![dir("/home/proj")]);

    let call = h.single_call();
    assert_eq!(listed_path(&call), Some("/home/proj"));
    h.listing(&call, Vec::new());

    let step = h.single_call();
    assert_eq!(step.request, mkdir_call("/home/proj", "sub"));
    h.ok(&step, ReplyPayload::Entry(dir("/home/proj/sub")));

    let call = h.single_call();
    assert_eq!(listed_path(&call), Some("/home/proj"));
    h.listing(&call, vec![dir("/home/proj/sub")]);

    let call = h.single_call();
    assert_eq!(listed_path(&call), Some("/home/proj/sub"));
    h.listing(&call, Vec::new());

    let step = h.single_call();
    assert_eq!(
        step.request,
        RemoteRequest::UploadFile {
            path: "/home/proj".into(),
            local_file: proj.join("x.txt"),
        }
    );
    h.ok(&step, ReplyPayload::Entry(file("/home/proj/x.txt", 5)));

    let call = h.single_call();
    assert_eq!(listed_path(&call), Some("/home/proj"));
    assert!(h.finished().is_empty());
    h.listing(
        &call,
        vec![dir("/home/proj/sub"), file("/home/proj/x.txt", 5)],
    );

    assert!(h.calls().is_empty());
    assert!(!h.engine.performing_recursive_upload());
    assert!(!h.engine.operation_pending());
    assert!(!h.node("/home/proj/sub").is_nil());
    assert!(!h.node("/home/proj/x.txt").is_nil());
    assert_eq!(
        h.finished(),
        vec![(RequestState::Good, "Folder uploaded.".to_string())]
    );
}

#[test]
fn refresh_while_step_pending_issues_no_second_step() {
    let mut h = Harness::loaded("/home", Vec::new());
    let (_tmp, proj) = local_project();
    start_upload(&mut h, &proj);
    let step = h.single_call();

    let root = h.engine.root_ref();
    h.engine.refresh_folder(&root, false).unwrap();
    let relist = h.single_call();
    h.listing(&relist, Vec::new());

    assert_eq!(steps_in(&h.calls()), 0);

    h.ok(&step, ReplyPayload::Entry(dir("/home/proj")));
    let calls = h.calls();
    assert_eq!(steps_in(&calls), 0);
    assert_eq!(listed_paths(&calls), ["/home"]);
}

#[test]
fn listing_sent_before_step_landed_is_not_trusted() {
    let mut h = Harness::loaded("/home", Vec::new());
    let tmp = tempfile::tempdir().unwrap();
    let proj = tmp.path().join("proj");
    fs::create_dir(&proj).unwrap();
    start_upload(&mut h, &proj);
    let step = h.single_call();

    let root = h.engine.root_ref();
    h.engine.refresh_folder(&root, false).unwrap();
    let early = h.single_call();

    h.ok(&step, ReplyPayload::Entry(dir("/home/proj")));
    let fresh = h.single_call();
    assert_eq!(listed_path(&fresh), Some("/home"));

    h.listing(&early, Vec::new());
    assert!(h.calls().is_empty());
    assert!(h.engine.performing_recursive_upload());

    h.listing(&fresh, vec![dir("/home/proj")]);
    let call = h.single_call();
    assert_eq!(listed_path(&call), Some("/home/proj"));
    h.listing(&call, Vec::new());

    assert!(h.calls().is_empty());
    assert_eq!(
        h.finished(),
        vec![(RequestState::Good, "Folder uploaded.".to_string())]
    );
}

#[test]
fn remote_type_mismatch_aborts_the_upload() {
    let mut h = Harness::loaded("/home", Vec::new());
    let tmp = tempfile::tempdir().unwrap();
    let proj = tmp.path().join("proj");
    fs::create_dir(&proj).unwrap();
    fs::write(proj.join("x.txt"), b"x").unwrap();
    start_upload(&mut h, &proj);

    let step = h.single_call();
    h.ok(&step, ReplyPayload::Entry(dir("/home/proj")));
    let call = h.single_call();
    h.listing(&call, vec![dir("/home/proj")]);
    let call = h.single_call();
    h.listing(&call, vec![dir("/home/proj/x.txt")]);

    assert!(h.calls().is_empty());
    assert!(!h.engine.operation_pending());
    let finished = h.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].0, RequestState::TypeMismatch);
}

#[test]
fn failed_step_aborts_the_upload() {
    let mut h = Harness::loaded("/home", Vec::new());
    let (_tmp, proj) = local_project();
    start_upload(&mut h, &proj);
    let step = h.single_call();

    h.fail(&step, RemoteError::AlreadyExists("/home/proj".into()));

    assert!(h.calls().is_empty());
    assert!(!h.engine.performing_recursive_upload());
    assert!(!h.engine.operation_pending());
    assert_eq!(
        h.finished(),
        vec![(
            RequestState::InvalidParam,
            "Folder upload failed to create new remote folder: Invalid parameters passed to task"
                .to_string()
        )]
    );
}

#[test]
fn upload_destination_is_validated() {
    let mut h = Harness::loaded("/home", vec![dir("/home/d"), dir("/home/proj"), file("/home/f", 1)]);
    let (tmp, proj) = local_project();
    let root = h.engine.root_ref();

    let unloaded = h.node("/home/d");
    let err = h.engine.upload_folder(&unloaded, &proj).unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidParam("The destination for an upload must be fully loaded.".into())
    );

    let err = h.engine.upload_folder(&root, &proj).unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidParam("The destination for the upload is already occupied.".into())
    );

    let target_file = h.node("/home/f");
    let err = h.engine.upload_folder(&target_file, &proj).unwrap_err();
    assert_eq!(err.request_state(), RequestState::InvalidParam);

    let err = h
        .engine
        .upload_folder(&root, &tmp.path().join("nope"))
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidParam("The folder to upload does not exist.".into())
    );

    assert!(h.calls().is_empty());
    assert!(!h.engine.operation_pending());
    assert_eq!(h.finished().len(), 4);
}
