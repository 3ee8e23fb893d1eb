//! Tests for multipart upload lifecycle and assembly ordering.

use bytes::Bytes;
use http_body_util::Full;
use tempfile::TempDir;

use crate::error::SandbarError;
use crate::filesystem::ObjectStore;
use crate::multipart::MultipartManager;
use crate::paths::PathResolver;

fn setup() -> (MultipartManager, ObjectStore, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let manager = MultipartManager::new(temp_dir.path());
    let resolver = PathResolver::new(temp_dir.path()).expect("Failed to create resolver");
    (manager, ObjectStore::new(resolver), temp_dir)
}

fn body(data: &'static [u8]) -> Full<Bytes> {
    Full::new(Bytes::from_static(data))
}

#[tokio::test]
async fn test_create_upload_registers_id() {
    let (manager, _store, _temp_dir) = setup();

    let upload_id = manager
        .create_upload("bkt", "model.bin")
        .await
        .expect("Should create upload");

    assert!(!upload_id.is_empty());
    assert!(manager.contains(&upload_id).await);
}

#[tokio::test]
async fn test_upload_part_unknown_id() {
    let (manager, _store, _temp_dir) = setup();

    let result = manager.upload_part("nonexistent", 1, body(b"data")).await;
    assert!(matches!(result, Err(SandbarError::NoSuchUpload(_))));
}

#[tokio::test]
async fn test_upload_part_invalid_numbers() {
    let (manager, _store, _temp_dir) = setup();
    let upload_id = manager
        .create_upload("bkt", "model.bin")
        .await
        .expect("Should create upload");

    let result = manager.upload_part(&upload_id, 0, body(b"data")).await;
    assert!(matches!(result, Err(SandbarError::InvalidArgument(_))));

    let result = manager.upload_part(&upload_id, 10001, body(b"data")).await;
    assert!(matches!(result, Err(SandbarError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_part_etag_is_content_md5() {
    let (manager, _store, _temp_dir) = setup();
    let upload_id = manager
        .create_upload("bkt", "model.bin")
        .await
        .expect("Should create upload");

    let etag = manager
        .upload_part(&upload_id, 1, body(b"hello world"))
        .await
        .expect("Should upload part");

    assert_eq!(etag, format!("\"{:x}\"", md5::compute(b"hello world")));
}

#[tokio::test]
async fn test_out_of_order_parts_assemble_ascending() {
    let (manager, store, _temp_dir) = setup();
    let upload_id = manager
        .create_upload("bkt", "model.bin")
        .await
        .expect("Should create upload");

    // Upload in reverse arrival order
    manager
        .upload_part(&upload_id, 3, body(b"-three"))
        .await
        .expect("Should upload part 3");
    manager
        .upload_part(&upload_id, 1, body(b"one"))
        .await
        .expect("Should upload part 1");
    manager
        .upload_part(&upload_id, 2, body(b"-two"))
        .await
        .expect("Should upload part 2");

    let (bucket, key, etag) = manager
        .complete_upload(&upload_id, &store)
        .await
        .expect("Should complete upload");
    assert_eq!(bucket, "bkt");
    assert_eq!(key, "model.bin");

    let expected = b"one-two-three";
    assert_eq!(etag, format!("\"{:x}\"", md5::compute(expected)));

    let metadata = store
        .metadata("bkt", "model.bin")
        .await
        .expect("Object should exist after completion");
    let contents = std::fs::read(&metadata.path).expect("Should read assembled object");
    assert_eq!(contents, expected);
}

#[tokio::test]
async fn test_part_overwrite_is_last_write_wins() {
    let (manager, store, _temp_dir) = setup();
    let upload_id = manager
        .create_upload("bkt", "model.bin")
        .await
        .expect("Should create upload");

    manager
        .upload_part(&upload_id, 1, body(b"first version"))
        .await
        .expect("Should upload part");
    manager
        .upload_part(&upload_id, 1, body(b"second"))
        .await
        .expect("Should overwrite part");

    let (_, _, etag) = manager
        .complete_upload(&upload_id, &store)
        .await
        .expect("Should complete upload");
    assert_eq!(etag, format!("\"{:x}\"", md5::compute(b"second")));
}

#[tokio::test]
async fn test_complete_consumes_upload() {
    let (manager, store, _temp_dir) = setup();
    let upload_id = manager
        .create_upload("bkt", "model.bin")
        .await
        .expect("Should create upload");
    manager
        .upload_part(&upload_id, 1, body(b"data"))
        .await
        .expect("Should upload part");

    manager
        .complete_upload(&upload_id, &store)
        .await
        .expect("Should complete upload");

    assert!(!manager.contains(&upload_id).await);
    let result = manager.complete_upload(&upload_id, &store).await;
    assert!(matches!(result, Err(SandbarError::NoSuchUpload(_))));
}

#[tokio::test]
async fn test_abort_is_terminal() {
    let (manager, store, temp_dir) = setup();
    let upload_id = manager
        .create_upload("bkt", "model.bin")
        .await
        .expect("Should create upload");
    manager
        .upload_part(&upload_id, 1, body(b"data"))
        .await
        .expect("Should upload part");

    manager
        .abort_upload(&upload_id)
        .await
        .expect("Should abort upload");

    // Spool directory is gone along with the registry entry
    assert!(!temp_dir.path().join(".multipart").join(&upload_id).exists());
    assert!(!manager.contains(&upload_id).await);

    let result = manager.upload_part(&upload_id, 2, body(b"late")).await;
    assert!(matches!(result, Err(SandbarError::NoSuchUpload(_))));

    let result = manager.complete_upload(&upload_id, &store).await;
    assert!(matches!(result, Err(SandbarError::NoSuchUpload(_))));
}

#[tokio::test]
async fn test_abort_unknown_id() {
    let (manager, _store, _temp_dir) = setup();
    let result = manager.abort_upload("nonexistent").await;
    assert!(matches!(result, Err(SandbarError::NoSuchUpload(_))));
}
