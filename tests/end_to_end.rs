//! Cross-crate integration tests exercising the full submit → WAL → ingest
//! → apply → recover pipeline through the `ProgressDb` facade, covering the
//! end-to-end scenarios named in the design notes (S1, S4, S5, S6) plus the
//! crash-recovery and WAL round-trip invariants (S2, S3) at the layer below.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use progressdb::{
    Config, KvEngine, MemKv, Payload, ProgressDb, QueueStats, SubmitRequest,
};

fn wait_for<F: Fn() -> bool>(f: F, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    f()
}

fn thread_create(thread_ts: i64, author: &str) -> SubmitRequest {
    let payload = Payload::ThreadCreate(progressdb::ThreadCreate {
        thread_ts,
        title: "general".into(),
        author: author.into(),
    });
    SubmitRequest {
        handler: "thread.create".into(),
        thread_ts: thread_ts.to_string(),
        id: thread_ts.to_string(),
        payload: payload.encode(),
        ts: thread_ts,
        extras: HashMap::new(),
    }
}

fn message_create(thread_ts: i64, msg_ts: i64, author: &str) -> SubmitRequest {
    let payload = Payload::MessageCreate(progressdb::MessageCreate {
        thread_ts,
        msg_ts,
        author: author.into(),
        body: serde_json::json!({"text": "hi"}),
        reply_to: None,
    });
    SubmitRequest {
        handler: "message.create".into(),
        thread_ts: thread_ts.to_string(),
        id: msg_ts.to_string(),
        payload: payload.encode(),
        ts: msg_ts,
        extras: HashMap::new(),
    }
}

/// S1-flavored: a fresh `ProgressDb`, thread create then three message
/// creates sharing two distinct `msg_ts` values, verifying per-thread
/// monotonic `seq` assignment and commit order (scenario S5).
#[test]
fn per_thread_sequence_assignment_and_commit_order() {
    let dir = tempfile::tempdir().unwrap();
    let (db, report) = ProgressDb::open_in_memory(dir.path().to_path_buf()).unwrap();
    assert_eq!(report.wal_replayed, 0);

    db.submit(thread_create(1, "alice")).unwrap();

    let thread_key = progressdb_storage::thread_meta_key(1);
    assert!(wait_for(
        || db.kv().get(thread_key.as_bytes()).unwrap().is_some(),
        Duration::from_millis(500)
    ));

    db.submit(message_create(1, 100, "alice")).unwrap();
    db.submit(message_create(1, 100, "alice")).unwrap();
    db.submit(message_create(1, 200, "alice")).unwrap();

    let prefix = progressdb_storage::thread_messages_prefix(1);
    assert!(wait_for(
        || {
            let upper = progressdb::prefix_upper_bound(prefix.as_bytes());
            db.kv().scan(prefix.as_bytes(), upper.as_deref()).unwrap().len() == 2
        },
        Duration::from_secs(1)
    ));

    let upper = progressdb::prefix_upper_bound(prefix.as_bytes());
    let rows = db.kv().scan(prefix.as_bytes(), upper.as_deref()).unwrap();
    // Two distinct msg_ts values survive (100's second create replaced the
    // first's final key); keys sort in thread-commit order.
    assert_eq!(rows.len(), 2);
    assert!(String::from_utf8_lossy(&rows[0].0).contains(":00000000000000000100:"));
    assert!(String::from_utf8_lossy(&rows[1].0).contains(":00000000000000000200:"));

    db.shutdown().unwrap();
}

/// Scenario S4: batches submitted with out-of-order `apply_seq` commit in
/// strict numeric order regardless of submission order.
#[test]
fn ordered_apply_commits_strictly_by_apply_seq() {
    use progressdb::{
        ApplyBatch, Applier, BatchEntry, BatchEntryKind, EnqSeq, InflightTracker, IntakeQueue,
        Sequencer, WalOffset,
    };

    let kv: Arc<dyn KvEngine> = Arc::new(MemKv::new());
    let queue = Arc::new(IntakeQueue::memory_only(8));
    let applier = Applier::new(kv.clone(), InflightTracker::new());
    let sequencer = Sequencer::new(applier, queue);

    let thread_entry = |thread_ts: i64, seq_hint: i64| BatchEntry {
        kind: BatchEntryKind::ThreadUpsert {
            thread_ts,
            is_create: true,
            title: Some("t".into()),
            author: Some("a".into()),
            ts: seq_hint,
            kms: None,
        },
        enq_seq: EnqSeq(seq_hint as u64),
        wal_offset: WalOffset::NONE,
    };

    // apply_seq 3, 1, 2 — threads 30, 10, 20 respectively so we can check
    // the KV only has thread 10 visible once batch 1 lands.
    sequencer
        .submit(ApplyBatch::new(3, vec![thread_entry(30, 3)]))
        .unwrap();
    assert!(kv
        .get(progressdb_storage::thread_meta_key(30).as_bytes())
        .unwrap()
        .is_none());

    sequencer
        .submit(ApplyBatch::new(1, vec![thread_entry(10, 1)]))
        .unwrap();
    // Batch 1 applies immediately; batch 2 hasn't arrived so batch 3 must
    // still be buffered.
    assert!(kv
        .get(progressdb_storage::thread_meta_key(10).as_bytes())
        .unwrap()
        .is_some());
    assert!(kv
        .get(progressdb_storage::thread_meta_key(30).as_bytes())
        .unwrap()
        .is_none());

    sequencer
        .submit(ApplyBatch::new(2, vec![thread_entry(20, 2)]))
        .unwrap();
    // Now 2 and the buffered 3 both apply.
    assert!(kv
        .get(progressdb_storage::thread_meta_key(20).as_bytes())
        .unwrap()
        .is_some());
    assert!(kv
        .get(progressdb_storage::thread_meta_key(30).as_bytes())
        .unwrap()
        .is_some());
}

/// Scenario S6: a pre-staged `temp_idx:` row is cleared by recovery's
/// promotion pass because its target already exists (the applier wrote both
/// in the same atomic batch — see DESIGN.md).
#[test]
fn temp_index_rows_are_promoted_at_recovery() {
    let kv: Arc<dyn KvEngine> = Arc::new(MemKv::new());
    let thread_key = progressdb_storage::thread_meta_key(1);
    kv.set(thread_key.as_bytes(), b"{}").unwrap();
    let marker = progressdb_storage::temp_index_key("user_threads", &thread_key).unwrap();
    kv.set(marker.as_bytes(), b"").unwrap();

    let report = progressdb::promote_temp_indexes(&kv).unwrap();
    assert_eq!(report.temp_indexes_promoted, 1);
    assert!(kv.get(marker.as_bytes()).unwrap().is_none());
}

/// Invariant 7: replaying the same WAL twice through the apply pipeline
/// yields the same final KV state as replaying it once, because every write
/// is keyed by the deterministic `(thread_ts, msg_ts, seq)` triple.
#[test]
fn replaying_the_same_batch_twice_is_idempotent() {
    use progressdb::{ApplyBatch, Applier, BatchEntry, BatchEntryKind, EnqSeq, InflightTracker, WalOffset};

    let kv: Arc<dyn KvEngine> = Arc::new(MemKv::new());
    let applier = Applier::new(kv.clone(), InflightTracker::new());

    let thread_entry = BatchEntry {
        kind: BatchEntryKind::ThreadUpsert {
            thread_ts: 1,
            is_create: true,
            title: Some("t".into()),
            author: Some("a".into()),
            ts: 1,
            kms: None,
        },
        enq_seq: EnqSeq(1),
        wal_offset: WalOffset::NONE,
    };
    applier
        .apply(&ApplyBatch::new(1, vec![thread_entry]))
        .unwrap();

    let message_entry = BatchEntry {
        kind: BatchEntryKind::MessageUpsert {
            thread_ts: 1,
            msg_ts: 100,
            author: Some("a".into()),
            body: serde_json::json!({"text": "hi"}),
            reply_to: None,
            ts: 2,
        },
        enq_seq: EnqSeq(2),
        wal_offset: WalOffset::NONE,
    };
    applier
        .apply(&ApplyBatch::new(2, vec![message_entry.clone()]))
        .unwrap();
    let prefix = progressdb_storage::thread_messages_prefix(1);
    let upper = progressdb::prefix_upper_bound(prefix.as_bytes());
    let once = kv.scan(prefix.as_bytes(), upper.as_deref()).unwrap();

    // Re-apply the identical entry as if replayed from the WAL a second
    // time under a fresh apply_seq (replay never reuses apply_seq, but the
    // write it produces is byte-identical at the same final key).
    applier
        .apply(&ApplyBatch::new(3, vec![message_entry]))
        .unwrap();
    let twice = kv.scan(prefix.as_bytes(), upper.as_deref()).unwrap();

    assert_eq!(once.len(), twice.len());
}

/// Full restart: submitting against a WAL-backed `ProgressDb`, shutting
/// down, then reopening against an empty KV but the same WAL directory
/// recovers the prior writes via replay.
#[test]
fn restart_recovers_prior_writes_from_the_wal() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (db, _report) = ProgressDb::open_in_memory(dir.path().to_path_buf()).unwrap();
        db.submit(thread_create(1, "alice")).unwrap();
        db.submit(message_create(1, 42, "alice")).unwrap();
        let key = progressdb_storage::thread_meta_key(1);
        assert!(wait_for(
            || db.kv().get(key.as_bytes()).unwrap().is_some(),
            Duration::from_millis(500)
        ));
        db.shutdown().unwrap();
    }

    let kv: Arc<dyn KvEngine> = Arc::new(MemKv::new());
    let config = Config {
        wal_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let (db, report) = ProgressDb::open(kv, config).unwrap();
    assert_eq!(report.wal_replayed, 2);

    let thread_key = progressdb_storage::thread_meta_key(1);
    assert!(wait_for(
        || db.kv().get(thread_key.as_bytes()).unwrap().is_some(),
        Duration::from_millis(500)
    ));

    let message_prefix = progressdb_storage::thread_messages_prefix(1);
    let upper = progressdb::prefix_upper_bound(message_prefix.as_bytes());
    assert!(wait_for(
        || !db
            .kv()
            .scan(message_prefix.as_bytes(), upper.as_deref())
            .unwrap()
            .is_empty(),
        Duration::from_millis(500)
    ));

    db.shutdown().unwrap();
}

/// S1: a capacity-2 memory-only queue accepts two enqueues and rejects the
/// third with `QueueFull`, incrementing `dropped_full`.
#[test]
fn queue_full_is_reported_past_capacity() {
    use progressdb::IntakeQueue;

    let queue = IntakeQueue::memory_only(2);
    let req = |id: &str| SubmitRequest {
        handler: "message.create".into(),
        thread_ts: "1".into(),
        id: id.into(),
        payload: b"{}".to_vec(),
        ts: 1,
        extras: HashMap::new(),
    };
    queue.try_enqueue(req("a")).unwrap();
    queue.try_enqueue(req("b")).unwrap();
    let err = queue.try_enqueue(req("c"));
    assert!(matches!(err, Err(progressdb::Error::QueueFull)));

    let stats: QueueStats = queue.stats();
    assert_eq!(stats.dropped_full, 1);
    assert_eq!(stats.enqueued, 2);
}
