//! Shared types for the ProgressDB ingest core: the error taxonomy, the
//! sequence/key newtypes, the thread/message/version data model, the tagged
//! payload sum type, the handler trait, and the KMS collaborator seam.
//!
//! Everything downstream (`progressdb-storage`, `progressdb-durability`,
//! `progressdb-concurrency`, `progressdb-engine`) depends on this crate and
//! nothing else in the workspace; it has no dependency back up the stack.

#![warn(missing_docs)]

pub mod batch;
pub mod error;
pub mod handler;
pub mod kms;
pub mod model;
pub mod payload;
pub mod types;

pub use batch::{ApplyBatch, BatchEntry, BatchEntryKind};
pub use error::{Error, Result};
pub use handler::{Handler, HandlerContext, QueueOp, ALL_HANDLER_IDS};
pub use kms::{KmsProvider, NoopKms};
pub use model::{KmsEnvelope, Message, MessageTomb, Thread, ThreadTomb, Version};
pub use payload::Payload;
pub use types::{validate_identifier, ApplySeq, EnqSeq, MsgTs, Seq, ThreadTs, WalOffset, SEQ_PAD, TS_PAD};
