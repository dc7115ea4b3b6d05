use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn remotefsd(store: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_remotefsd"))
        .arg("--store")
        .arg(store)
        .args(["--user", "alice", "--timeout", "20"])
        .args(args)
        .env("REMOTEFS_LOG", "off")
        .output()
        .expect("failed to run remotefsd")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn file_commands_work_against_a_fresh_store() {
    let store = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let note = local.path().join("note.txt");
    fs::write(&note, b"hello").unwrap();

    let out = remotefsd(store.path(), &["mkdir", "/", "docs"]);
    assert!(out.status.success(), "{out:?}");
    assert!(stdout(&out).contains("New folder created at /alice/docs"));
    assert!(store.path().join("alice/docs").is_dir());

    let out = remotefsd(store.path(), &["put", note.to_str().unwrap(), "docs"]);
    assert!(out.status.success(), "{out:?}");

    let out = remotefsd(store.path(), &["cat", "docs/note.txt"]);
    assert!(out.status.success(), "{out:?}");
    assert_eq!(out.stdout, b"hello");

    let out = remotefsd(store.path(), &["ls", "docs", "--json"]);
    assert!(out.status.success(), "{out:?}");
    let rows: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(rows[0]["name"], "note.txt");
    assert_eq!(rows[0]["type"], "file");
    assert_eq!(rows[0]["size"], 5);

    let out = remotefsd(store.path(), &["rm", "docs/note.txt"]);
    assert!(out.status.success(), "{out:?}");
    assert!(!store.path().join("alice/docs/note.txt").exists());
}

#[test]
fn folder_transfer_commands_round_trip() {
    let store = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let proj = local.path().join("proj");
    fs::create_dir_all(proj.join("sub")).unwrap();
    fs::write(proj.join("sub/y.txt"), b"y").unwrap();

    let out = remotefsd(store.path(), &["push", proj.to_str().unwrap(), "/"]);
    assert!(out.status.success(), "{out:?}");
    assert!(stdout(&out).contains("Folder uploaded."));

    let back = tempfile::tempdir().unwrap();
    let out = remotefsd(store.path(), &["pull", "proj", back.path().to_str().unwrap()]);
    assert!(out.status.success(), "{out:?}");
    assert_eq!(fs::read(back.path().join("proj/sub/y.txt")).unwrap(), b"y");

    let out = remotefsd(store.path(), &["pull", "proj", back.path().to_str().unwrap()]);
    assert!(!out.status.success());
}

#[test]
fn missing_entries_exit_non_zero() {
    let store = tempfile::tempdir().unwrap();

    let out = remotefsd(store.path(), &["rm", "ghost.txt"]);
    assert!(!out.status.success());

    let out = remotefsd(store.path(), &["ls", "/"]);
    assert!(out.status.success(), "{out:?}");
    assert!(stdout(&out).is_empty());
}
