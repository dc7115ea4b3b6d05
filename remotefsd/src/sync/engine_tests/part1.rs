use std::collections::BTreeMap;
use std::io;

use super::*;

fn seeded() -> Harness {
    Harness::loaded("/alice", vec![dir("/alice/a"), file("/alice/b.txt", 100)])
}

#[test]
fn root_listing_populates_mirror() {
    let mut h = Harness::new("/alice");
    h.engine.reset();
    let call = h.single_call();
    assert_eq!(call.request, RemoteRequest::List { path: "/alice".into() });
    assert_eq!(
        h.engine.node_state(&h.engine.root_ref()),
        NodeState::FolderListing
    );

    h.listing(&call, vec![dir("/alice/a"), file("/alice/b.txt", 100)]);

    assert!(h.engine.root_loaded());
    assert_eq!(h.engine.node_state(&h.node("/alice/a")), NodeState::FolderUnloaded);
    assert_eq!(h.engine.node_state(&h.node("/alice/b.txt")), NodeState::FileKnown);
    let names: Vec<String> = h
        .engine
        .children_of(&h.engine.root_ref())
        .iter()
        .map(|child| child.name().to_string())
        .collect();
    assert_eq!(names, ["a", "b.txt"]);

    let events = h.drain_events();
    assert_eq!(events[0], EngineEvent::MirrorReset);
    assert!(events.contains(&EngineEvent::NodeChanged(h.engine.root_ref())));
}

#[test]
fn buffer_fetch_is_suppressed_while_pending() {
    let mut h = seeded();
    let b = h.node("/alice/b.txt");

    assert_eq!(h.engine.download_buffer(&b), Ok(true));
    let call = h.single_call();
    assert_eq!(
        call.request,
        RemoteRequest::DownloadBuffer {
            path: "/alice/b.txt".into()
        }
    );
    assert_eq!(h.engine.download_buffer(&b), Ok(false));
    assert!(h.calls().is_empty());
    assert_eq!(h.engine.node_state(&b), NodeState::FileBufferLoading);

    h.ok(&call, ReplyPayload::Buffer(b"hi".to_vec()));

    assert_eq!(h.engine.file_buffer(&b), Some(&b"hi"[..]));
    assert_eq!(h.engine.node_state(&b), NodeState::FileBufferLoaded);
}

#[test]
fn download_buffer_rejects_folders() {
    let mut h = seeded();
    let a = h.node("/alice/a");

    assert!(matches!(
        h.engine.download_buffer(&a),
        Err(EngineError::InvalidParam(_))
    ));
    assert!(h.calls().is_empty());
}

#[test]
fn second_operation_is_rejected_while_lock_is_held() {
    let mut h = seeded();
    let a = h.node("/alice/a");
    let b = h.node("/alice/b.txt");

    let delete = h.engine.delete_node(&b).unwrap();
    let call = h.single_call();
    assert_eq!(call.id, delete);
    assert!(h.engine.operation_pending());

    assert_eq!(h.engine.mkdir(&a, "new"), Err(EngineError::NotReady));
    assert!(h.calls().is_empty());

    h.ok(&call, ReplyPayload::Empty);

    assert!(!h.engine.operation_pending());
    let refresh = h.single_call();
    assert_eq!(listed_path(&refresh), Some("/alice"));
    assert_eq!(
        h.finished(),
        vec![(
            RequestState::Good,
            "File successfully deleted: /alice/b.txt".to_string()
        )]
    );

    h.listing(&refresh, vec![dir("/alice/a")]);
    assert!(!h.engine.node_extant(&b));
}

#[test]
fn failed_delete_leaves_mirror_untouched() {
    let mut h = seeded();
    let b = h.node("/alice/b.txt");
    h.engine.delete_node(&b).unwrap();
    let call = h.single_call();

    h.fail(&call, RemoteError::InvalidParam("denied".into()));

    assert!(h.calls().is_empty());
    assert!(h.engine.node_extant(&b));
    assert!(!h.engine.operation_pending());
    assert_eq!(
        h.finished(),
        vec![(
            RequestState::InvalidParam,
            "Unable to delete file: Invalid parameters passed to task".to_string()
        )]
    );
}

#[test]
fn stale_reference_is_rejected() {
    let mut h = seeded();
    let stale = h.node("/alice/b.txt");
    let root = h.engine.root_ref();
    h.engine.refresh_folder(&root, false).unwrap();
    let call = h.single_call();
    h.listing(&call, vec![dir("/alice/a"), file("/alice/b.txt", 200)]);

    assert_eq!(
        h.engine.delete_node(&stale),
        Err(EngineError::NodeNotFound("/alice/b.txt".into()))
    );
    assert!(!h.engine.node_extant(&stale));
    assert!(!h.engine.operation_pending());
    assert!(h.calls().is_empty());
    assert_eq!(
        h.finished(),
        vec![(
            RequestState::FileNotFound,
            "ERROR: entry not found in mirror: /alice/b.txt".to_string()
        )]
    );

    let fresh = h.node("/alice/b.txt");
    assert_eq!(fresh.modified(), Some(200));
    assert!(h.engine.delete_node(&fresh).is_ok());
}

#[test]
fn deleting_a_folder_invalidates_descendant_refs() {
    let mut h = seeded();
    h.load_folder("/alice/a", vec![dir("/alice/a/s")]);
    h.load_folder("/alice/a/s", vec![file("/alice/a/s/deep.txt", 1)]);
    let deep = h.node("/alice/a/s/deep.txt");
    assert!(h.engine.node_extant(&deep));
    assert!(h.engine.is_ancestor_of(&h.node("/alice/a"), &deep));

    h.load_folder("/alice", vec![file("/alice/b.txt", 100)]);

    assert!(!h.engine.node_extant(&deep));
    assert_eq!(h.engine.node_state(&deep), NodeState::NonExtant);
    assert!(h.node("/alice/a/s").is_nil());
}

#[test]
fn move_refreshes_old_parent_and_new_location() {
    let mut h = seeded();
    h.load_folder("/alice/a", Vec::new());
    let b = h.node("/alice/b.txt");

    h.engine.move_node(&b, "/alice/a/b.txt").unwrap();
    let call = h.single_call();
    assert_eq!(
        call.request,
        RemoteRequest::Move {
            path: "/alice/b.txt".into(),
            destination: "/alice/a/b.txt".into(),
        }
    );

    h.ok(&call, ReplyPayload::Entry(file("/alice/a/b.txt", 100)));

    assert_eq!(listed_paths(&h.calls()), ["/alice", "/alice/a"]);
}

#[test]
fn copy_refreshes_only_the_new_location() {
    let mut h = seeded();
    h.load_folder("/alice/a", Vec::new());
    let b = h.node("/alice/b.txt");

    h.engine.copy_node(&b, "/alice/a/c.txt").unwrap();
    let call = h.single_call();
    h.ok(&call, ReplyPayload::Entry(file("/alice/a/c.txt", 100)));

    assert_eq!(listed_paths(&h.calls()), ["/alice/a"]);
}

#[test]
fn rename_lists_shared_parent_once() {
    let mut h = seeded();
    let b = h.node("/alice/b.txt");

    h.engine.rename_node(&b, "c.txt").unwrap();
    let call = h.single_call();
    assert_eq!(
        call.request,
        RemoteRequest::Rename {
            path: "/alice/b.txt".into(),
            new_name: "c.txt".into(),
        }
    );
    h.ok(&call, ReplyPayload::Entry(file("/alice/c.txt", 100)));

    assert_eq!(listed_paths(&h.calls()), ["/alice"]);
    let finished = h.finished();
    assert_eq!(
        finished[0].1,
        "File successfully renamed from /alice/b.txt to /alice/c.txt"
    );
}

#[test]
fn move_into_itself_is_rejected_after_claim() {
    let mut h = seeded();
    let a = h.node("/alice/a");

    let err = h.engine.move_node(&a, "/alice/a/inner").unwrap_err();

    assert_eq!(err.request_state(), RequestState::InvalidParam);
    assert!(!h.engine.operation_pending());
    assert!(h.calls().is_empty());
    assert_eq!(h.finished()[0].0, RequestState::InvalidParam);
}

#[test]
fn validation_failure_releases_lock_and_reports() {
    let mut h = seeded();
    let b = h.node("/alice/b.txt");
    let root = h.engine.root_ref();

    let err = h.engine.mkdir(&b, "x").unwrap_err();
    assert_eq!(err.request_state(), RequestState::InvalidParam);
    assert!(!h.engine.operation_pending());

    let err = h.engine.mkdir(&root, "a").unwrap_err();
    assert_eq!(err.request_state(), RequestState::InvalidParam);

    assert!(h.calls().is_empty());
    let finished = h.finished();
    assert_eq!(finished.len(), 2);
    assert!(finished.iter().all(|(state, _)| *state == RequestState::InvalidParam));

    assert!(h.engine.mkdir(&root, "fresh").is_ok());
}

#[test]
fn mkdir_refreshes_containing_folder() {
    let mut h = seeded();
    let root = h.engine.root_ref();

    h.engine.mkdir(&root, "proj").unwrap();
    let call = h.single_call();
    assert_eq!(
        call.request,
        RemoteRequest::Mkdir {
            path: "/alice".into(),
            new_name: "proj".into(),
        }
    );
    h.ok(&call, ReplyPayload::Entry(dir("/alice/proj")));

    assert_eq!(listed_paths(&h.calls()), ["/alice"]);
}

#[test]
fn upload_buffer_refreshes_target_folder() {
    let mut h = seeded();
    let a = h.node("/alice/a");

    h.engine.upload_buffer(&a, b"xyz".to_vec(), "n.bin").unwrap();
    let call = h.single_call();
    h.ok(&call, ReplyPayload::Entry(file("/alice/a/n.bin", 5)));

    assert_eq!(listed_paths(&h.calls()), ["/alice/a"]);
    assert_eq!(h.finished()[0].0, RequestState::Good);
}

#[test]
fn upload_file_requires_a_readable_local_file() {
    let mut h = seeded();
    let a = h.node("/alice/a");
    let dir = tempfile::tempdir().unwrap();

    let err = h
        .engine
        .upload_file(&a, &dir.path().join("missing.bin"))
        .unwrap_err();

    assert_eq!(err.request_state(), RequestState::LocalFileError);
    assert!(h.calls().is_empty());
}

#[test]
fn download_file_reports_without_touching_mirror() {
    let mut h = seeded();
    let b = h.node("/alice/b.txt");
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("b.txt");

    h.engine.download_file(&b, &dest).unwrap();
    let call = h.single_call();
    assert_eq!(
        call.request,
        RemoteRequest::DownloadFile {
            local_dest: dest.clone(),
            path: "/alice/b.txt".into(),
        }
    );
    h.ok(&call, ReplyPayload::Empty);

    assert!(h.calls().is_empty());
    assert_eq!(
        h.finished(),
        vec![(
            RequestState::Good,
            format!("Download complete to {}", dest.display())
        )]
    );
}

#[test]
fn compress_runs_batch_job_without_refresh() {
    let mut h = seeded();
    let a = h.node("/alice/a");

    h.engine.compress_folder(&a).unwrap();
    let call = h.single_call();
    let mut params = BTreeMap::new();
    params.insert("compression_type".to_string(), "tgz".to_string());
    assert_eq!(
        call.request,
        RemoteRequest::RunBatchJob {
            job: "compress".into(),
            params,
            target: "/alice/a".into(),
        }
    );

    h.ok(&call, ReplyPayload::Job(serde_json::json!({ "status": "FINISHED" })));

    assert!(h.calls().is_empty());
    assert_eq!(h.finished()[0].0, RequestState::Good);
}

#[test]
fn decompress_targets_files_only() {
    let mut h = seeded();
    let a = h.node("/alice/a");
    let b = h.node("/alice/b.txt");

    assert!(matches!(
        h.engine.decompress_file(&a),
        Err(EngineError::InvalidParam(_))
    ));

    h.engine.decompress_file(&b).unwrap();
    let call = h.single_call();
    let mut params = BTreeMap::new();
    params.insert("inputFile".to_string(), "/alice/b.txt".to_string());
    assert_eq!(
        call.request,
        RemoteRequest::RunBatchJob {
            job: "extract".into(),
            params,
            target: String::new(),
        }
    );
}

#[test]
fn unknown_and_duplicate_replies_are_ignored() {
    let mut h = seeded();
    h.engine
        .handle_reply(RemoteReply::ok(CallId(999), ReplyPayload::Empty));
    assert!(h.drain_events().is_empty());

    let b = h.node("/alice/b.txt");
    h.engine.download_buffer(&b).unwrap();
    let call = h.single_call();
    h.ok(&call, ReplyPayload::Buffer(b"hi".to_vec()));
    h.drain_events();

    h.ok(&call, ReplyPayload::Buffer(b"other".to_vec()));

    assert_eq!(h.engine.file_buffer(&b), Some(&b"hi"[..]));
    assert!(h.drain_events().is_empty());
}

#[test]
fn listing_not_found_removes_the_folder() {
    let mut h = seeded();
    let a = h.node("/alice/a");
    h.engine.refresh_folder(&a, false).unwrap();
    let call = h.single_call();

    h.fail(&call, RemoteError::NotFound("/alice/a".into()));

    assert!(!h.engine.node_extant(&a));
    assert_eq!(h.engine.children_of(&h.engine.root_ref()).len(), 1);
}

#[test]
fn failed_listing_returns_folder_to_unloaded() {
    let mut h = seeded();
    let a = h.node("/alice/a");
    h.engine.refresh_folder(&a, false).unwrap();
    let call = h.single_call();

    h.fail(&call, RemoteError::Io(io::Error::other("offline")));

    assert_eq!(h.engine.node_state(&a), NodeState::FolderUnloaded);
    assert_eq!(h.engine.refresh_folder(&a, false), Ok(true));
}

#[test]
fn refresh_with_clear_drops_known_contents() {
    let mut h = seeded();
    h.load_folder("/alice/a", vec![file("/alice/a/x", 1)]);
    let a = h.node("/alice/a");
    assert_eq!(h.engine.children_of(&a).len(), 1);

    assert_eq!(h.engine.refresh_folder(&a, true), Ok(true));

    assert!(h.engine.children_of(&a).is_empty());
    assert_eq!(h.engine.node_state(&a), NodeState::FolderListing);
    assert!(h.node("/alice/a/x").is_nil());
    assert_eq!(h.engine.refresh_folder(&a, false), Ok(false));
}

#[test]
fn resolve_tracks_latest_listing() {
    let mut h = Harness::loaded("/alice", Vec::new());
    let listings: [&[&str]; 4] = [&["a", "b"], &["b", "c"], &[], &["a"]];

    for names in listings {
        let entries = names
            .iter()
            .map(|name| file(&format!("/alice/{name}"), 1))
            .collect();
        h.load_folder("/alice", entries);

        for candidate in ["a", "b", "c"] {
            let path = format!("/alice/{candidate}");
            let found = h.node(&path);
            assert_eq!(!found.is_nil(), names.contains(&candidate), "{path}");
            if !found.is_nil() {
                assert_eq!(found.path(), path);
            }
        }
    }
}

#[test]
fn navigation_queries_follow_the_tree() {
    let mut h = seeded();
    let root = h.engine.root_ref();
    let b = h.node("/alice/b.txt");

    assert!(h.engine.is_root(&root));
    assert!(!h.engine.is_root(&b));
    assert_eq!(h.engine.parent_of(&b), root);
    assert!(h.engine.parent_of(&root).is_nil());
    assert_eq!(h.engine.child_with_name(&root, "b.txt"), b);
    assert!(h.engine.child_with_name(&root, "zzz").is_nil());
    assert!(h.engine.is_ancestor_of(&root, &b));
    assert!(!h.engine.is_ancestor_of(&b, &root));
    assert_eq!(h.engine.closest_loaded_ancestor("/alice/a/x/y"), root);

    assert!(h.engine.set_file_buffer(&b, b"local".to_vec()));
    assert_eq!(h.engine.file_buffer(&b), Some(&b"local"[..]));
    let a = h.node("/alice/a");
    assert!(!h.engine.set_file_buffer(&a, Vec::new()));
}

#[test]
fn root_listing_failure_resets_once_then_goes_fatal() {
    let mut h = Harness::new("/alice");
    h.engine.reset();
    let first = h.single_call();
    h.drain_events();

    h.fail(&first, RemoteError::Io(io::Error::other("offline")));

    assert_eq!(h.drain_events(), vec![EngineEvent::MirrorReset]);
    let second = h.single_call();
    assert_eq!(listed_path(&second), Some("/alice"));
    assert!(!h.engine.is_fatal());

    h.fail(&second, RemoteError::Io(io::Error::other("offline")));

    assert!(h.engine.is_fatal());
    assert!(
        h.drain_events()
            .iter()
            .any(|event| matches!(event, EngineEvent::Fatal(_)))
    );
    assert!(h.calls().is_empty());
}

#[test]
fn root_recovers_when_rebuilt_listing_succeeds() {
    let mut h = Harness::new("/alice");
    h.engine.reset();
    let first = h.single_call();
    h.fail(&first, RemoteError::Io(io::Error::other("offline")));
    let second = h.single_call();

    h.listing(&second, vec![dir("/alice/a")]);

    assert!(h.engine.root_loaded());
    assert!(!h.engine.is_fatal());
    assert!(!h.node("/alice/a").is_nil());
}

#[test]
fn failed_relist_of_loaded_root_keeps_the_mirror() {
    let mut h = Harness::loaded("/alice", vec![dir("/alice/a"), file("/alice/b.txt", 1)]);
    let b = h.node("/alice/b.txt");
    assert!(h.engine.set_file_buffer(&b, b"hi".to_vec()));
    h.drain_events();

    let root = h.engine.root_ref();
    h.engine.refresh_folder(&root, false).unwrap();
    let call = h.single_call();
    h.fail(&call, RemoteError::Io(io::Error::other("connection reset")));

    let events = h.drain_events();
    assert!(!events.contains(&EngineEvent::MirrorReset), "{events:?}");
    assert!(h.calls().is_empty());
    assert!(h.engine.root_loaded());
    assert!(!h.engine.is_fatal());
    assert!(!h.node("/alice/a").is_nil());
    assert_eq!(h.engine.file_buffer(&b), Some(&b"hi"[..]));
}

#[test]
fn vanished_root_is_rebuilt_even_after_loading() {
    let mut h = Harness::loaded("/alice", vec![dir("/alice/a")]);

    let root = h.engine.root_ref();
    h.engine.refresh_folder(&root, false).unwrap();
    let call = h.single_call();
    h.fail(&call, RemoteError::NotFound("/alice".into()));

    assert!(h.drain_events().contains(&EngineEvent::MirrorReset));
    assert!(h.node("/alice/a").is_nil());
    assert_eq!(listed_paths(&h.calls()), ["/alice"]);
}
