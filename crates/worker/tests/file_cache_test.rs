mod common;

use std::sync::atomic::Ordering;

use common::FakeServer;
use hashfleet_core::models::FileKind;
use hashfleet_core::HashfleetError;
use hashfleet_worker::child::FileCache;

#[tokio::test]
async fn test_unchanged_file_is_not_downloaded_again() {
    let dir = tempfile::tempdir().unwrap();
    let server = FakeServer::new();
    server.add_file("hashes", b"deadbeef\n");
    let cache = FileCache::new(server.clone());

    let first = cache.fetch("hashes", FileKind::Task, dir.path()).await.unwrap();
    let second = cache.fetch("hashes", FileKind::Task, dir.path()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(server.file_transfers.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read(&first).unwrap(), b"deadbeef\n");
}

#[tokio::test]
async fn test_changed_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let server = FakeServer::new();
    server.add_file("hashes", b"old\n");
    let cache = FileCache::new(server.clone());
    let path = cache.fetch("hashes", FileKind::Task, dir.path()).await.unwrap();

    server.add_file("hashes", b"new\n");
    cache.fetch("hashes", FileKind::Task, dir.path()).await.unwrap();

    assert_eq!(server.file_transfers.load(Ordering::SeqCst), 2);
    assert_eq!(std::fs::read(&path).unwrap(), b"new\n");
    assert!(!dir.path().join("hashes.part").exists());
    assert!(!dir.path().join("hashes.lck").exists());
}

#[tokio::test]
async fn test_path_like_file_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FileCache::new(FakeServer::new());

    for id in ["", "../etc/passwd", "a/b", ".hidden"] {
        let err = cache.fetch(id, FileKind::Task, dir.path()).await.unwrap_err();
        assert!(matches!(err, HashfleetError::Validation(_)), "{id}");
    }
}

#[tokio::test]
async fn test_missing_file_leaves_no_lock_behind() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FileCache::new(FakeServer::new());

    let err = cache.fetch("ghost", FileKind::Task, dir.path()).await.unwrap_err();
    assert!(matches!(err, HashfleetError::FileNotFound { .. }));
    assert!(!dir.path().join("ghost.lck").exists());
}
