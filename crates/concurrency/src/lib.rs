//! The intake queue, in-flight tracker, ingestor, and applier: the pipeline
//! that turns a submitted op into a committed KV write, sitting between
//! durability and the engine facade.

#![warn(missing_docs)]

pub mod applier;
pub mod inflight;
pub mod ingestor;
pub mod queue;
pub mod wire;

pub use applier::Applier;
pub use inflight::{InflightOutcome, InflightTracker, ProvisionalKey};
pub use ingestor::{HandlerRegistry, Ingestor, IngestorConfig, Sequencer};
pub use queue::{IntakeQueue, QueueStats, SubmitRequest};
