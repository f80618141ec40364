//! Threaded uploads driven through the client facade against in-memory
//! control and storage nodes.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_chunk::UploadLog;
use strata_client::chunker::read_chunk_dir;
use strata_client::error::UploadError;
use strata_client::prepare::FileChunkInfo;
use strata_client::uploader::{MirrorState, ThreadedUploader, UploadConfig};
use strata_client::{Client, UPLOAD_OPTIONS_NAME, UploadOptions};
use strata_types::models::{FLAG_COMPRESSED, MirrorStatus};

use common::*;

fn client(control: &Arc<MockControl>, storage: &Arc<MockStorage>, dir: &Path) -> Client {
    Client::with_apis(control.clone(), storage.clone(), dir).with_upload_config(fast_config())
}

/// A prepared chunk directory for a file of `len` bytes (16-byte chunks).
fn prepared(client: &Client, dir: &Path, len: usize) -> PathBuf {
    let input = dir.join("input.bin");
    fs::write(&input, (0..len).map(|i| i as u8).collect::<Vec<u8>>()).unwrap();
    client.prepare_with(&input, &small_chunks()).unwrap()
}

fn upload(client: &Client, chunk_dir: &Path) -> Result<strata_client::uploader::UploadReport, UploadError> {
    client.upload_file_chunks(chunk_dir, Some("vol"), Some(3), Some("report.bin"), serde_json::Map::new())
}

#[test]
fn uploads_every_chunk_in_batches_of_ten() {
    let dir = tempfile::tempdir().unwrap();
    let control = Arc::new(MockControl::new());
    let storage = Arc::new(MockStorage::new());
    let client = client(&control, &storage, dir.path());
    let chunk_dir = prepared(&client, dir.path(), 25 * 16);

    let report = upload(&client, &chunk_dir).unwrap();
    assert_eq!(report.uploaded, 25);
    assert_eq!(report.mirror, MirrorState::Mirrored { min_count: 1 });
    assert_eq!(storage.stored_sequences(), (1..=25).collect::<Vec<u32>>());
    assert_eq!(control.fresh_batches(), vec![10, 10, 5]);

    let created = control.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].volume_name, "vol");
    assert_eq!(created[0].file_name, "report.bin");
    assert_eq!(created[0].flags, 0);
    // Finished uploads leave nothing behind.
    assert!(!chunk_dir.exists());
}

#[test]
fn flags_reflect_how_the_file_was_prepared() {
    let dir = tempfile::tempdir().unwrap();
    let control = Arc::new(MockControl::new());
    let storage = Arc::new(MockStorage::new());
    let client = client(&control, &storage, dir.path());
    let input = dir.path().join("input.bin");
    fs::write(&input, vec![7u8; 100]).unwrap();
    let opts = strata_client::prepare::PrepareOptions { compress: true, ..small_chunks() };
    let chunk_dir = client.prepare_with(&input, &opts).unwrap();

    upload(&client, &chunk_dir).unwrap();
    assert_eq!(control.created.lock().unwrap()[0].flags, FLAG_COMPRESSED);
}

#[test]
fn failed_store_is_reissued_by_the_control_node() {
    let dir = tempfile::tempdir().unwrap();
    let control = Arc::new(MockControl::new());
    let storage = Arc::new(MockStorage::new().failing(2, 1));
    let client = client(&control, &storage, dir.path());
    let chunk_dir = prepared(&client, dir.path(), 4 * 16);

    let report = upload(&client, &chunk_dir).unwrap();
    assert_eq!(report.uploaded, 4);
    assert_eq!(control.failed_reports.lock().unwrap().len(), 1);
    assert_eq!(storage.stored_sequences(), vec![1, 2, 3, 4]);
}

#[test]
fn expired_transfer_gets_a_fresh_allocation() {
    let dir = tempfile::tempdir().unwrap();
    let mut mock = MockControl::new();
    mock.expire_first.insert(3);
    let control = Arc::new(mock);
    let storage = Arc::new(MockStorage::new());
    let client = client(&control, &storage, dir.path());
    let chunk_dir = prepared(&client, dir.path(), 4 * 16);

    upload(&client, &chunk_dir).unwrap();
    assert!(control.failed_reports.lock().unwrap().is_empty());
    let requests = control.chunk_requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].sequence_number, 3);
    assert!(!requests[0].reuse_transfer);
    assert_eq!(storage.stored_sequences(), vec![1, 2, 3, 4]);
}

#[test]
fn sequence_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut mock = MockControl::new();
    mock.wrong_sequence = true;
    let control = Arc::new(mock);
    let storage = Arc::new(MockStorage::new());
    let client = client(&control, &storage, dir.path());
    let chunk_dir = prepared(&client, dir.path(), 3 * 16);

    let err = upload(&client, &chunk_dir).unwrap_err();
    assert!(matches!(err, UploadError::SequenceMismatch { expected: 1, got: 2 }));
    assert!(storage.stored_sequences().is_empty());
    // Nothing was logged as assigned for the rejected batch.
    assert!(UploadLog::replay(&chunk_dir).unwrap().assigned.is_empty());
}

#[test]
fn chunk_that_keeps_failing_exhausts_its_retries() {
    let dir = tempfile::tempdir().unwrap();
    let control = Arc::new(MockControl::new());
    let storage = Arc::new(MockStorage::new().failing(1, u32::MAX));
    let client = client(&control, &storage, dir.path());
    let chunk_dir = prepared(&client, dir.path(), 2 * 16);

    let err = upload(&client, &chunk_dir).unwrap_err();
    assert!(matches!(err, UploadError::RetriesExhausted { sequence_number: 1, attempts: 5 }));
    // The chunk directory survives for a later resume.
    assert!(chunk_dir.exists());
}

#[test]
fn mirroring_timeout_reports_under_replication() {
    let dir = tempfile::tempdir().unwrap();
    let mut mock = MockControl::new().with_mirror_answers(vec![MirrorStatus { min_count: 0, missing_chunks: vec![] }]);
    mock.unmirrored = vec![2, 4];
    let control = Arc::new(mock);
    let storage = Arc::new(MockStorage::new());
    let client = client(&control, &storage, dir.path());
    let chunk_dir = prepared(&client, dir.path(), 4 * 16);

    let report = upload(&client, &chunk_dir).unwrap();
    assert_eq!(report.mirror, MirrorState::StoredUnderReplicated { unmirrored: vec![2, 4] });
}

#[test]
fn missing_chunks_are_uploaded_again() {
    let dir = tempfile::tempdir().unwrap();
    let control = Arc::new(MockControl::new().with_mirror_answers(vec![
        MirrorStatus { min_count: 0, missing_chunks: vec![2] },
        MirrorStatus { min_count: 2, missing_chunks: vec![] },
    ]));
    let storage = Arc::new(MockStorage::new());
    let client = client(&control, &storage, dir.path());
    let chunk_dir = prepared(&client, dir.path(), 3 * 16);

    let report = upload(&client, &chunk_dir).unwrap();
    assert_eq!(report.uploaded, 4);
    assert_eq!(report.mirror, MirrorState::Mirrored { min_count: 2 });
    assert_eq!(storage.stored_sequences(), vec![1, 2, 2, 3]);
    assert_eq!(control.chunk_requests.lock().unwrap()[0].sequence_number, 2);
}

#[test]
fn resume_uploads_exactly_the_unfinished_chunks() {
    let dir = tempfile::tempdir().unwrap();
    // Chunks 1-3 were allocated by the interrupted run.
    let control = Arc::new(MockControl::new().fresh_from(4));
    let storage = Arc::new(MockStorage::new());
    let client = client(&control, &storage, dir.path());
    let chunk_dir = prepared(&client, dir.path(), 5 * 16);

    let options = UploadOptions {
        volume_name: "vol".into(),
        thread_count: 2,
        file_name: "report.bin".into(),
        metadata: serde_json::Map::new(),
    };
    fs::write(chunk_dir.join(UPLOAD_OPTIONS_NAME), serde_json::to_vec(&options).unwrap()).unwrap();
    {
        let mut log = UploadLog::open(&chunk_dir).unwrap();
        for name in ["chunk_000000001", "chunk_000000002", "chunk_000000003"] {
            log.append_assignment(name).unwrap();
        }
        log.append_complete("chunk_000000001").unwrap();
        log.fsync().unwrap();
    }

    let report = client.resume_upload(&chunk_dir).unwrap();
    assert_eq!(report.uploaded, 4);
    assert_eq!(storage.stored_sequences(), vec![2, 3, 4, 5]);

    let requests = control.chunk_requests.lock().unwrap();
    let mut reused: Vec<(u32, bool)> = requests.iter().map(|r| (r.sequence_number, r.reuse_transfer)).collect();
    reused.sort();
    assert_eq!(reused, vec![(2, true), (3, true)]);
    assert_eq!(control.fresh_batches(), vec![2]);
    assert!(control.created.lock().unwrap().is_empty());
}

#[test]
fn resume_skips_a_chunk_that_completed_after_a_retry() {
    let dir = tempfile::tempdir().unwrap();
    let control = Arc::new(MockControl::new());
    // Chunk 1 fails once and then lands; chunk 2 never does.
    let storage = Arc::new(MockStorage::new().failing(1, 1).failing(2, u32::MAX));
    let client = client(&control, &storage, dir.path());
    let chunk_dir = prepared(&client, dir.path(), 2 * 16);

    let err = upload(&client, &chunk_dir).unwrap_err();
    assert!(matches!(err, UploadError::RetriesExhausted { sequence_number: 2, .. }));
    let state = UploadLog::replay(&chunk_dir).unwrap();
    assert!(state.assigned.iter().filter(|n| *n == "chunk_000000001").count() >= 2);
    assert!(state.is_completed("chunk_000000001"));
    assert_eq!(state.incomplete(), vec!["chunk_000000002"]);

    storage.failures.lock().unwrap().clear();
    control.chunk_requests.lock().unwrap().clear();
    let report = client.resume_upload(&chunk_dir).unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(storage.stored_sequences(), vec![1, 2]);

    let requests = control.chunk_requests.lock().unwrap();
    let reused: Vec<(u32, bool)> = requests.iter().map(|r| (r.sequence_number, r.reuse_transfer)).collect();
    assert_eq!(reused, vec![(2, true)]);
}

#[test]
fn upload_requires_finished_chunking() {
    let dir = tempfile::tempdir().unwrap();
    let control = Arc::new(MockControl::new());
    let storage = Arc::new(MockStorage::new());
    let client = client(&control, &storage, dir.path());
    let chunk_dir = prepared(&client, dir.path(), 32);

    let mut info = FileChunkInfo::load(&chunk_dir).unwrap();
    info.chunking_complete = false;
    info.save(&chunk_dir).unwrap();

    assert!(matches!(upload(&client, &chunk_dir), Err(UploadError::ChunkingIncomplete)));
    assert!(control.created.lock().unwrap().is_empty());
}

#[test]
fn overlong_file_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let control = Arc::new(MockControl::new());
    let storage = Arc::new(MockStorage::new());
    let client = client(&control, &storage, dir.path());
    let chunk_dir = prepared(&client, dir.path(), 32);

    let name = "x".repeat(1025);
    let err = client
        .upload_file_chunks(&chunk_dir, None, None, Some(&name), serde_json::Map::new())
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidFileName { .. }));
}

#[test]
fn uploader_rejects_gaps_in_the_chunk_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let control = Arc::new(MockControl::new());
    let storage = Arc::new(MockStorage::new());
    let client = client(&control, &storage, dir.path());
    let chunk_dir = prepared(&client, dir.path(), 3 * 16);
    fs::remove_file(chunk_dir.join("chunk_000000002")).unwrap();

    let chunks = read_chunk_dir(&chunk_dir).unwrap();
    let result = ThreadedUploader::new(control, storage, "vol", "f", chunks, chunk_dir, UploadConfig::default());
    assert!(matches!(result, Err(UploadError::BadSequence { position: 1, found: 3 })));
}
