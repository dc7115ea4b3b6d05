use std::collections::BTreeMap;

use remotefs_core::{
    FileType, LoopbackStore, RemoteApi, RemoteError, RemoteRequest, ReplyPayload, RequestState,
};
use tempfile::tempdir;

fn seeded_store() -> (tempfile::TempDir, LoopbackStore) {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("alice/docs")).unwrap();
    std::fs::write(dir.path().join("alice/b.txt"), b"hi").unwrap();
    let store = LoopbackStore::new(dir.path());
    (dir, store)
}

#[tokio::test]
async fn list_returns_children_sorted_with_types() {
    let (_dir, store) = seeded_store();

    let items = store.list("/alice").await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].path, "/alice/b.txt");
    assert_eq!(items[0].file_type, FileType::File);
    assert_eq!(items[0].size, 2);
    assert!(items[0].modified.is_some());
    assert_eq!(items[1].path, "/alice/docs");
    assert_eq!(items[1].file_type, FileType::Dir);
}

#[tokio::test]
async fn list_of_a_file_reports_the_file_itself() {
    let (_dir, store) = seeded_store();

    let items = store.list("/alice/b.txt").await.unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name, "b.txt");
}

#[tokio::test]
async fn missing_entries_classify_as_not_found() {
    let (_dir, store) = seeded_store();

    let err = store.list("/alice/nope").await.expect_err("missing path");

    assert!(matches!(err, RemoteError::NotFound(ref p) if p == "/alice/nope"));
    assert_eq!(err.request_state(), RequestState::FileNotFound);
}

#[tokio::test]
async fn paths_never_leave_the_store_directory() {
    let outer = tempdir().unwrap();
    std::fs::create_dir(outer.path().join("store")).unwrap();
    std::fs::write(outer.path().join("secret.txt"), b"s").unwrap();
    let store = LoopbackStore::new(outer.path().join("store"));

    let err = store
        .download_buffer("/../secret.txt")
        .await
        .expect_err("escapes the store");
    assert!(matches!(err, RemoteError::Path(_)));
    assert_eq!(err.request_state(), RequestState::InvalidParam);

    assert!(store.delete("/a/../../secret.txt").await.is_err());
    assert!(outer.path().join("secret.txt").is_file());
}

#[tokio::test]
async fn store_root_cannot_be_removed_or_relocated() {
    let (dir, store) = seeded_store();

    for root in ["/", ""] {
        let err = store.delete(root).await.expect_err("root delete");
        assert_eq!(err.request_state(), RequestState::InvalidParam);
    }
    let err = store.copy("/", "/alice/all").await.expect_err("root copy");
    assert_eq!(err.request_state(), RequestState::InvalidParam);
    let err = store.move_entry("/", "/alice/moved").await.expect_err("root move");
    assert_eq!(err.request_state(), RequestState::InvalidParam);

    assert!(dir.path().join("alice/b.txt").is_file());
    assert!(!dir.path().join("alice/all").exists());
}

#[tokio::test]
async fn mkdir_refuses_occupied_names() {
    let (_dir, store) = seeded_store();

    let created = store.mkdir("/alice", "proj").await.unwrap();
    assert_eq!(created.path, "/alice/proj");
    assert_eq!(created.file_type, FileType::Dir);

    let err = store.mkdir("/alice", "proj").await.expect_err("occupied");
    assert!(matches!(err, RemoteError::AlreadyExists(_)));
}

#[tokio::test]
async fn rename_keeps_entry_in_same_folder() {
    let (dir, store) = seeded_store();

    let renamed = store.rename("/alice/b.txt", "c.txt").await.unwrap();

    assert_eq!(renamed.path, "/alice/c.txt");
    assert!(!dir.path().join("alice/b.txt").exists());
    assert_eq!(std::fs::read(dir.path().join("alice/c.txt")).unwrap(), b"hi");
}

#[tokio::test]
async fn copy_duplicates_folders_recursively() {
    let (dir, store) = seeded_store();
    std::fs::write(dir.path().join("alice/docs/n.md"), b"note").unwrap();

    let copied = store.copy("/alice/docs", "/alice/docs2").await.unwrap();

    assert_eq!(copied.file_type, FileType::Dir);
    assert_eq!(
        std::fs::read(dir.path().join("alice/docs2/n.md")).unwrap(),
        b"note"
    );
    assert!(dir.path().join("alice/docs/n.md").exists());
}

#[tokio::test]
async fn upload_file_reports_local_read_failures() {
    let (dir, store) = seeded_store();
    let missing = dir.path().join("not-there.bin");

    let err = store
        .upload_file("/alice", &missing)
        .await
        .expect_err("local file missing");

    assert_eq!(err.request_state(), RequestState::LocalFileError);
}

#[tokio::test]
async fn executes_requests_through_the_trait_object() {
    let (_dir, store) = seeded_store();
    let request = RemoteRequest::UploadBuffer {
        path: "/alice/docs".into(),
        bytes: b"payload".to_vec(),
        new_name: "p.bin".into(),
    };

    let payload = request.execute(&store).await.unwrap();
    let ReplyPayload::Entry(entry) = payload else {
        panic!("expected entry payload");
    };
    assert_eq!(entry.path, "/alice/docs/p.bin");
    assert_eq!(entry.size, 7);

    let fetched = RemoteRequest::DownloadBuffer {
        path: "/alice/docs/p.bin".into(),
    }
    .execute(&store)
    .await
    .unwrap();
    assert_eq!(fetched, ReplyPayload::Buffer(b"payload".to_vec()));
}

#[tokio::test]
async fn compress_then_extract_restores_folder_contents() {
    let (dir, store) = seeded_store();
    std::fs::write(dir.path().join("alice/docs/n.md"), b"note").unwrap();

    let mut params = BTreeMap::new();
    params.insert("compression_type".to_string(), "tgz".to_string());
    let reply = store
        .run_batch_job("compress", &params, "/alice/docs")
        .await
        .unwrap();
    assert_eq!(reply["output"], "/alice/docs.tgz");

    store.delete("/alice/docs").await.unwrap();
    assert!(!dir.path().join("alice/docs").exists());

    let mut params = BTreeMap::new();
    params.insert("inputFile".to_string(), "/alice/docs.tgz".to_string());
    store.run_batch_job("extract", &params, "").await.unwrap();

    assert_eq!(
        std::fs::read(dir.path().join("alice/docs/n.md")).unwrap(),
        b"note"
    );
}

#[tokio::test]
async fn unknown_batch_jobs_are_invalid() {
    let (_dir, store) = seeded_store();

    let err = store
        .run_batch_job("reticulate", &BTreeMap::new(), "/alice")
        .await
        .expect_err("unknown job");

    assert_eq!(err.request_state(), RequestState::InvalidParam);
}
