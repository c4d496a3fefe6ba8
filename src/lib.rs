//! ProgressDB: a durable, append-only chat/thread storage core.
//!
//! This crate is a thin re-export facade over the workspace's layer crates —
//! `progressdb-core` (shared types), `progressdb-storage` (key codec + KV
//! engine trait), `progressdb-durability` (the WAL), `progressdb-concurrency`
//! (intake queue, ingestor, applier), and `progressdb-engine` (handlers,
//! recovery, and the `ProgressDb` facade).

#![warn(missing_docs)]

pub use progressdb_core::batch::{ApplyBatch, BatchEntry, BatchEntryKind};
pub use progressdb_core::error::{Error, Result};
pub use progressdb_core::handler::{
    Handler, HandlerContext, QueueOp, ALL_HANDLER_IDS, HANDLER_MESSAGE_CREATE,
    HANDLER_MESSAGE_DELETE, HANDLER_MESSAGE_UPDATE, HANDLER_REACTION_ADD, HANDLER_REACTION_DELETE,
    HANDLER_THREAD_CREATE, HANDLER_THREAD_DELETE, HANDLER_THREAD_UPDATE,
};
pub use progressdb_core::kms::{KmsProvider, NoopKms};
pub use progressdb_core::model::{KmsEnvelope, Message, MessageTomb, Thread, ThreadTomb, Version};
pub use progressdb_core::payload::{
    MessageCreate, MessageDelete, MessageUpdate, Payload, ReactionAdd, ReactionDelete,
    ThreadCreate, ThreadDelete, ThreadUpdate,
};
pub use progressdb_core::types::{validate_identifier, ApplySeq, EnqSeq, Seq, WalOffset};

pub use progressdb_storage::{
    parse, prefix_upper_bound, Batch, BatchOp, KvEngine, MemKv, ParsedKey,
};

pub use progressdb_durability::{Recovered, RecoveredRecord, WalConfig};

pub use progressdb_concurrency::{
    Applier, HandlerRegistry, Ingestor, IngestorConfig, InflightOutcome, InflightTracker,
    IntakeQueue, ProvisionalKey, QueueStats, Sequencer, SubmitRequest,
};

pub use progressdb_engine::{
    check_schema_version, default_registry, promote_temp_indexes, replay_wal, Config,
    IngestorSettings, KvHandlerContext, ProgressDb, QueueSettings, RecoveryReport,
    RecoverySettings, SecuritySettings, SCHEMA_VERSION,
};
