//! Upload assembler integration tests against a real on-disk store.

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use clipforge_models::UploadId;
use clipforge_store::{Store, StoreConfig, StoreError};

/// A buffer that sniffs as video/mp4 regardless of the rest of its content.
fn mp4_bytes(len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(len);
    data.extend_from_slice(&[0x00, 0x00, 0x00, 0x20]);
    data.extend_from_slice(b"ftypisom");
    data.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]);
    while data.len() < len {
        data.push((data.len() % 251) as u8);
    }
    data.truncate(len);
    data
}

async fn open_store() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(StoreConfig::rooted_at(dir.path())).await.unwrap();
    (dir, store)
}

#[tokio::test]
async fn chunked_upload_roundtrip_matches_digest() {
    let (_dir, store) = open_store().await;
    let data = mp4_bytes(8 * 1024 * 1024);
    let chunk_size = 1024 * 1024;

    let session = store
        .uploads
        .init("user-1", "talk.mp4", data.len() as u64, "video/mp4", Some(chunk_size))
        .await
        .unwrap();
    assert_eq!(session.total_chunks, 8);

    for (i, chunk) in data.chunks(chunk_size as usize).enumerate() {
        store
            .uploads
            .write_chunk("user-1", &session.id, i as u64, chunk)
            .await
            .unwrap();
    }

    let (blob_id, size, content_type) =
        store.uploads.complete("user-1", &session.id).await.unwrap();

    assert_eq!(size, data.len() as u64);
    assert_eq!(content_type, "video/mp4");
    assert_eq!(blob_id.as_str(), hex::encode(Sha256::digest(&data)));

    // Stored bytes equal the original bytes.
    let path = store.blobs.path_for(&blob_id);
    let stored = tokio::fs::read(path).await.unwrap();
    assert_eq!(stored, data);
}

#[tokio::test]
async fn chunk_order_does_not_affect_result() {
    let (_dir, store) = open_store().await;
    let data = mp4_bytes(3 * 700_000);
    let chunk_size = 700_000u64;

    let mut ordered_blob = None;
    for order in [vec![0u64, 1, 2], vec![2, 0, 1]] {
        let session = store
            .uploads
            .init("user-1", "talk.mp4", data.len() as u64, "video/mp4", Some(chunk_size))
            .await
            .unwrap();
        for i in order {
            let start = (i * chunk_size) as usize;
            let end = (start + chunk_size as usize).min(data.len());
            store
                .uploads
                .write_chunk("user-1", &session.id, i, &data[start..end])
                .await
                .unwrap();
        }
        let (blob_id, _, _) = store.uploads.complete("user-1", &session.id).await.unwrap();
        match &ordered_blob {
            None => ordered_blob = Some(blob_id),
            Some(first) => assert_eq!(&blob_id, first),
        }
    }
}

#[tokio::test]
async fn duplicate_chunk_is_idempotent_no_op() {
    let (_dir, store) = open_store().await;
    let data = mp4_bytes(4 * 256 * 1024);
    let chunk_size = 256 * 1024u64;

    let session = store
        .uploads
        .init("user-1", "a.mp4", data.len() as u64, "video/mp4", Some(chunk_size))
        .await
        .unwrap();

    let chunks: Vec<&[u8]> = data.chunks(chunk_size as usize).collect();
    for index in [0usize, 1, 2, 2, 3] {
        let receipt = store
            .uploads
            .write_chunk("user-1", &session.id, index as u64, chunks[index])
            .await
            .unwrap();
        assert_eq!(receipt.total, 4);
    }

    let (blob_id, _, _) = store.uploads.complete("user-1", &session.id).await.unwrap();
    assert_eq!(blob_id.as_str(), hex::encode(Sha256::digest(&data)));
}

#[tokio::test]
async fn wrong_length_rewrite_is_conflict() {
    let (_dir, store) = open_store().await;
    let chunk_size = 128 * 1024u64;
    let data = mp4_bytes(2 * chunk_size as usize);

    let session = store
        .uploads
        .init("user-1", "a.mp4", data.len() as u64, "video/mp4", Some(chunk_size))
        .await
        .unwrap();

    store
        .uploads
        .write_chunk("user-1", &session.id, 0, &data[..chunk_size as usize])
        .await
        .unwrap();

    let err = store
        .uploads
        .write_chunk("user-1", &session.id, 0, &data[..100])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn oversize_boundary() {
    let dir = TempDir::new().unwrap();
    let mut config = StoreConfig::rooted_at(dir.path());
    config.max_upload_bytes = 1024 * 1024;
    let store = Store::open(config).await.unwrap();

    // Exactly at the limit: accepted.
    store
        .uploads
        .init("user-1", "a.mp4", 1024 * 1024, "video/mp4", None)
        .await
        .unwrap();

    // One byte over: rejected, no session created.
    let err = store
        .uploads
        .init("user-1", "b.mp4", 1024 * 1024 + 1, "video/mp4", None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Oversize { .. }));

    // Chunk writes against an arbitrary id report not-found.
    let err = store
        .uploads
        .write_chunk("user-1", &UploadId::new(), 0, &[0u8; 16])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn rejected_extension_and_type() {
    let (_dir, store) = open_store().await;

    let err = store
        .uploads
        .init("user-1", "document.pdf", 1024, "video/mp4", None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::RejectedType(_)));

    let err = store
        .uploads
        .init("user-1", "a.mp4", 1024, "image/png", None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::RejectedType(_)));
}

#[tokio::test]
async fn complete_with_missing_chunks_is_incomplete() {
    let (_dir, store) = open_store().await;
    let chunk_size = 128 * 1024u64;
    let data = mp4_bytes(3 * chunk_size as usize);

    let session = store
        .uploads
        .init("user-1", "a.mp4", data.len() as u64, "video/mp4", Some(chunk_size))
        .await
        .unwrap();

    store
        .uploads
        .write_chunk("user-1", &session.id, 0, &data[..chunk_size as usize])
        .await
        .unwrap();

    let err = store.uploads.complete("user-1", &session.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Incomplete { missing: 2 }));
}

#[tokio::test]
async fn non_video_content_is_rejected_at_complete() {
    let (_dir, store) = open_store().await;
    let data = vec![0x42u8; 64 * 1024];

    let session = store
        .uploads
        .init("user-1", "fake.mp4", data.len() as u64, "video/mp4", Some(64 * 1024))
        .await
        .unwrap();
    store
        .uploads
        .write_chunk("user-1", &session.id, 0, &data)
        .await
        .unwrap();

    let err = store.uploads.complete("user-1", &session.id).await.unwrap_err();
    assert!(matches!(err, StoreError::RejectedType(_)));
}

#[tokio::test]
async fn abort_removes_session() {
    let (_dir, store) = open_store().await;
    let session = store
        .uploads
        .init("user-1", "a.mp4", 1024, "video/mp4", None)
        .await
        .unwrap();

    store.uploads.abort("user-1", &session.id).await.unwrap();

    let err = store.uploads.status("user-1", &session.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn other_principal_is_forbidden() {
    let (_dir, store) = open_store().await;
    let session = store
        .uploads
        .init("user-1", "a.mp4", 1024, "video/mp4", None)
        .await
        .unwrap();

    let err = store
        .uploads
        .write_chunk("user-2", &session.id, 0, &[0u8; 1024])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Forbidden(_)));
}

#[tokio::test]
async fn expired_sessions_are_swept() {
    let dir = TempDir::new().unwrap();
    let mut config = StoreConfig::rooted_at(dir.path());
    config.upload_ttl = std::time::Duration::from_secs(0);
    let store = Store::open(config).await.unwrap();

    let session = store
        .uploads
        .init("user-1", "a.mp4", 1024, "video/mp4", None)
        .await
        .unwrap();

    // TTL of zero: the session is already past its deadline.
    let err = store
        .uploads
        .write_chunk("user-1", &session.id, 0, &[0u8; 1024])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Expired(_)));

    let removed = store.uploads.sweep_expired().await.unwrap();
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn blob_refcount_release() {
    let (_dir, store) = open_store().await;
    let data = mp4_bytes(64 * 1024);

    let session = store
        .uploads
        .init("user-1", "a.mp4", data.len() as u64, "video/mp4", Some(64 * 1024))
        .await
        .unwrap();
    store
        .uploads
        .write_chunk("user-1", &session.id, 0, &data)
        .await
        .unwrap();
    let (blob_id, _, _) = store.uploads.complete("user-1", &session.id).await.unwrap();

    store.blobs.add_ref(&blob_id).await.unwrap();
    assert_eq!(store.blobs.meta(&blob_id).await.unwrap().refcount, 2);

    store.blobs.release(&blob_id).await.unwrap();
    assert!(store.blobs.exists(&blob_id).await.unwrap());

    store.blobs.release(&blob_id).await.unwrap();
    assert!(!store.blobs.exists(&blob_id).await.unwrap());
    assert!(!store.blobs.path_for(&blob_id).exists());
}
