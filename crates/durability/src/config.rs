//! WAL tuning knobs (§6 "Configuration (recognized options)").

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`crate::writer::WalWriter`] / recovery scan.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory holding numbered segment files.
    pub dir: PathBuf,
    /// Rotate to a new segment once the current one would exceed this size.
    pub max_file_size: u64,
    /// `true` to batch appends (group commit) instead of sync-per-append.
    pub enable_batch: bool,
    /// Flush the in-memory batch once it reaches this many entries.
    pub batch_size: usize,
    /// Flush the in-memory batch once this much time has elapsed since the
    /// first unflushed append.
    pub batch_interval: Duration,
    /// `true` to attempt gzip compression on sufficiently large payloads.
    pub enable_compress: bool,
    /// Minimum payload size, in bytes, before compression is attempted.
    pub compress_min_bytes: usize,
    /// Compression is accepted only if `len(compressed) <= ratio * len(raw)`.
    pub compress_min_ratio: f64,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            dir: PathBuf::from("wal"),
            max_file_size: 64 * 1024 * 1024,
            enable_batch: true,
            batch_size: 256,
            batch_interval: Duration::from_millis(10),
            enable_compress: false,
            compress_min_bytes: 4096,
            compress_min_ratio: 0.9,
        }
    }
}
