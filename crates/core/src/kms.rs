//! The KMS collaborator interface (§6).
//!
//! Envelope encryption itself is out of scope for the core; this trait is
//! the seam a real KMS integration plugs into. The core never holds a
//! plaintext DEK beyond the single call site on `thread.create`.

use crate::error::{Error, Result};
use crate::model::KmsEnvelope;

/// Mints a wrapped data-encryption key for a newly created thread.
pub trait KmsProvider: Send + Sync {
    /// Returns the envelope to store on the thread record.
    fn create_dek_for_thread(&self, thread_ts: i64) -> Result<KmsEnvelope>;
}

/// The default collaborator when `security.encryption.use = false`: any call
/// is a programming error, since handlers are expected to check the
/// configuration flag before invoking a `KmsProvider` at all.
#[derive(Debug, Default)]
pub struct NoopKms;

impl KmsProvider for NoopKms {
    fn create_dek_for_thread(&self, _thread_ts: i64) -> Result<KmsEnvelope> {
        Err(Error::HandlerError(
            "encryption is disabled; no KmsProvider configured".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_kms_always_errors() {
        let kms = NoopKms;
        assert!(kms.create_dek_for_thread(1).is_err());
    }
}
