//! Write-ahead log: segmented, CRC-protected, crash-recoverable durability
//! for `progressdb-concurrency`'s intake queue.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod format;
pub mod reader;
pub mod segment;
pub mod writer;

pub use config::WalConfig;
pub use error::{Error, Result};
pub use format::{FormatError, SegmentHeader, WalRecord, FLAG_COMPRESSED, MAX_RECORD_LENGTH};
pub use reader::{recover, Recovered, RecoveredRecord, TruncateInfo};
pub use segment::WalSegment;
pub use writer::{decompress_if_needed, ResumePoint, SegmentRanges, WalCounters, WalWriter, WriteMode};

/// Open a WAL rooted at `config.dir`, replaying any existing segments first.
/// Returns the recovered record stream (for replay into the ingestor) and a
/// writer ready to accept new appends.
pub fn open(config: WalConfig) -> Result<(Recovered, WalWriter)> {
    let recovered = recover(&config)?;
    let writer = WalWriter::resume(config, recovered.resume.clone())?;
    Ok((recovered, writer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cfg(dir: &std::path::Path) -> WalConfig {
        WalConfig {
            dir: dir.to_path_buf(),
            ..WalConfig::default()
        }
    }

    #[test]
    fn open_on_fresh_dir_yields_empty_recovery_and_working_writer() {
        let dir = tempdir().unwrap();
        let (recovered, mut writer) = open(cfg(dir.path())).unwrap();
        assert!(recovered.records.is_empty());
        assert_eq!(writer.append(b"hello").unwrap(), 1);
    }

    #[test]
    fn open_after_prior_writes_replays_and_resumes_sequence() {
        let dir = tempdir().unwrap();
        {
            let (_, mut w) = open(cfg(dir.path())).unwrap();
            w.append(b"one").unwrap();
            w.append(b"two").unwrap();
            w.close().unwrap();
        }
        let (recovered, mut writer) = open(cfg(dir.path())).unwrap();
        assert_eq!(recovered.records.len(), 2);
        assert_eq!(writer.append(b"three").unwrap(), 3);
    }
}
