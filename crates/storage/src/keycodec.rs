//! The unified key codec (§4.1).
//!
//! Keys are ASCII, colon-separated, lowercase. Numeric segments are
//! zero-padded to a fixed width so lexicographic byte order equals numeric
//! order — this is what lets a prefix scan over `t:<thread_ts>:m:` return
//! messages in commit order without a secondary sort.
//!
//! `parse` is the sole entry point for interpreting bytes read from the KV;
//! consumers must never slice a key by hand (§6).

use progressdb_core::error::{Error, Result};
use progressdb_core::types::{validate_identifier, SEQ_PAD, TS_PAD};

/// The tagged, parsed form of any key this codec recognizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKey {
    /// `t:<thread_ts>`
    ThreadMeta { thread_ts: i64 },
    /// `t:<thread_ts>:m:<msg_ts>` — provisional, pre-sequence message key.
    ProvisionalMessage { thread_ts: i64, msg_ts: i64 },
    /// `t:<thread_ts>:m:<msg_ts>:<seq>` — final, sequenced message key.
    FinalMessage {
        thread_ts: i64,
        msg_ts: i64,
        seq: u64,
    },
    /// `v:<msg_ts>:<version_ts>:<version_seq>`
    Version {
        msg_ts: i64,
        version_ts: i64,
        version_seq: u64,
    },
    /// `idx:t:<thread_ts>:ms:<kind>` for `kind` in
    /// `{start,end,lc,lu,cdeltas,udeltas,skips}`.
    ThreadMsIndex { thread_ts: i64, index_type: String },
    /// `rel:u:<user_id>:t:<thread_ts>`
    UserToThread { user_id: String, thread_ts: i64 },
    /// `rel:t:<thread_ts>:u:<user_id>`
    ThreadToUser { thread_ts: i64, user_id: String },
    /// `del:<original_key>`
    SoftDeleteMarker { original_key: String },
    /// `temp_idx:<index_type>:<target_key>`
    TempIndex {
        index_type: String,
        target_key: String,
    },
    /// `system:version`, `system:migrating`, or any other `system:*` key.
    System { name: String },
}

fn pad_i64(v: i64, width: usize) -> String {
    // Shift into an unsigned range so zero-padding preserves ordering even
    // for the (currently unused) negative-timestamp case.
    format!("{:0width$}", v as i128 + (1i128 << 63), width = width)
}

fn unpad_i64(s: &str) -> Result<i64> {
    let v: i128 = s
        .parse()
        .map_err(|_| Error::InvalidKey(format!("bad numeric segment {s:?}")))?;
    Ok((v - (1i128 << 63)) as i64)
}

fn pad_u64(v: u64, width: usize) -> String {
    format!("{:0width$}", v, width = width)
}

fn unpad_u64(s: &str) -> Result<u64> {
    s.parse()
        .map_err(|_| Error::InvalidKey(format!("bad sequence segment {s:?}")))
}

/// Format a thread metadata key.
pub fn thread_meta_key(thread_ts: i64) -> String {
    format!("t:{}", pad_i64(thread_ts, TS_PAD))
}

/// Format a provisional (pre-sequence) message key.
pub fn provisional_message_key(thread_ts: i64, msg_ts: i64) -> String {
    format!(
        "t:{}:m:{}",
        pad_i64(thread_ts, TS_PAD),
        pad_i64(msg_ts, TS_PAD)
    )
}

/// Format a final, sequenced message key.
pub fn final_message_key(thread_ts: i64, msg_ts: i64, seq: u64) -> String {
    format!(
        "t:{}:m:{}:{}",
        pad_i64(thread_ts, TS_PAD),
        pad_i64(msg_ts, TS_PAD),
        pad_u64(seq, SEQ_PAD)
    )
}

/// The key prefix that, scanned in byte order, yields every message of a
/// thread in commit order.
pub fn thread_messages_prefix(thread_ts: i64) -> String {
    format!("t:{}:m:", pad_i64(thread_ts, TS_PAD))
}

/// The key prefix that, scanned in byte order, yields every sequenced
/// version of one message (normally exactly one: the applier replaces the
/// prior final key whenever it writes a new one).
pub fn message_versions_prefix(thread_ts: i64, msg_ts: i64) -> String {
    format!(
        "t:{}:m:{}:",
        pad_i64(thread_ts, TS_PAD),
        pad_i64(msg_ts, TS_PAD)
    )
}

/// Format a version record key.
pub fn version_key(msg_ts: i64, version_ts: i64, version_seq: u64) -> String {
    format!(
        "v:{}:{}:{}",
        pad_i64(msg_ts, TS_PAD),
        pad_i64(version_ts, TS_PAD),
        pad_u64(version_seq, SEQ_PAD)
    )
}

/// Recognized `idx:t:<thread_ts>:ms:<kind>` suffixes.
pub const MS_INDEX_KINDS: [&str; 7] = [
    "start", "end", "lc", "lu", "cdeltas", "udeltas", "skips",
];

/// Format a thread→message secondary index key.
pub fn thread_ms_index_key(thread_ts: i64, index_type: &str) -> Result<String> {
    validate_identifier(index_type)?;
    Ok(format!(
        "idx:t:{}:ms:{}",
        pad_i64(thread_ts, TS_PAD),
        index_type
    ))
}

/// Format a user→thread relation key.
pub fn user_to_thread_key(user_id: &str, thread_ts: i64) -> Result<String> {
    validate_identifier(user_id)?;
    Ok(format!(
        "rel:u:{}:t:{}",
        user_id,
        pad_i64(thread_ts, TS_PAD)
    ))
}

/// Format a thread→user relation key.
pub fn thread_to_user_key(thread_ts: i64, user_id: &str) -> Result<String> {
    validate_identifier(user_id)?;
    Ok(format!(
        "rel:t:{}:u:{}",
        pad_i64(thread_ts, TS_PAD),
        user_id
    ))
}

/// Format a soft-delete tombstone marker for any previously-formatted key.
pub fn soft_delete_marker_key(original_key: &str) -> String {
    format!("del:{original_key}")
}

/// Format a temp-index staging key, promoted at recovery (§4.8).
pub fn temp_index_key(index_type: &str, target_key: &str) -> Result<String> {
    validate_identifier(index_type)?;
    Ok(format!("temp_idx:{index_type}:{target_key}"))
}

/// The key prefix under which all staged temp-index rows live.
pub const TEMP_INDEX_PREFIX: &str = "temp_idx:";

/// A `system:*` key.
pub fn system_key(name: &str) -> String {
    format!("system:{name}")
}

/// Parse any key this codec recognizes. The sole entry point for
/// interpreting bytes read from the KV (§6).
pub fn parse(key: &str) -> Result<ParsedKey> {
    let mut parts = key.split(':');
    let tag = parts
        .next()
        .ok_or_else(|| Error::InvalidKey(key.to_string()))?;

    match tag {
        "t" => {
            let thread_ts = unpad_i64(parts.next().ok_or_else(|| bad(key))?)?;
            match parts.next() {
                None => Ok(ParsedKey::ThreadMeta { thread_ts }),
                Some("m") => {
                    let msg_ts = unpad_i64(parts.next().ok_or_else(|| bad(key))?)?;
                    match parts.next() {
                        None => Ok(ParsedKey::ProvisionalMessage { thread_ts, msg_ts }),
                        Some(seq_s) => {
                            let seq = unpad_u64(seq_s)?;
                            if parts.next().is_some() {
                                return Err(bad(key));
                            }
                            Ok(ParsedKey::FinalMessage {
                                thread_ts,
                                msg_ts,
                                seq,
                            })
                        }
                    }
                }
                _ => Err(bad(key)),
            }
        }
        "v" => {
            let msg_ts = unpad_i64(parts.next().ok_or_else(|| bad(key))?)?;
            let version_ts = unpad_i64(parts.next().ok_or_else(|| bad(key))?)?;
            let version_seq = unpad_u64(parts.next().ok_or_else(|| bad(key))?)?;
            if parts.next().is_some() {
                return Err(bad(key));
            }
            Ok(ParsedKey::Version {
                msg_ts,
                version_ts,
                version_seq,
            })
        }
        "idx" => {
            if parts.next() != Some("t") {
                return Err(bad(key));
            }
            let thread_ts = unpad_i64(parts.next().ok_or_else(|| bad(key))?)?;
            if parts.next() != Some("ms") {
                return Err(bad(key));
            }
            let index_type = parts.next().ok_or_else(|| bad(key))?.to_string();
            if parts.next().is_some() {
                return Err(bad(key));
            }
            Ok(ParsedKey::ThreadMsIndex {
                thread_ts,
                index_type,
            })
        }
        "rel" => match parts.next() {
            Some("u") => {
                let user_id = parts.next().ok_or_else(|| bad(key))?.to_string();
                if parts.next() != Some("t") {
                    return Err(bad(key));
                }
                let thread_ts = unpad_i64(parts.next().ok_or_else(|| bad(key))?)?;
                Ok(ParsedKey::UserToThread { user_id, thread_ts })
            }
            Some("t") => {
                let thread_ts = unpad_i64(parts.next().ok_or_else(|| bad(key))?)?;
                if parts.next() != Some("u") {
                    return Err(bad(key));
                }
                let user_id = parts.next().ok_or_else(|| bad(key))?.to_string();
                Ok(ParsedKey::ThreadToUser { thread_ts, user_id })
            }
            _ => Err(bad(key)),
        },
        "del" => {
            let rest: Vec<&str> = parts.collect();
            if rest.is_empty() {
                return Err(bad(key));
            }
            Ok(ParsedKey::SoftDeleteMarker {
                original_key: rest.join(":"),
            })
        }
        "temp_idx" => {
            let index_type = parts.next().ok_or_else(|| bad(key))?.to_string();
            let rest: Vec<&str> = parts.collect();
            if rest.is_empty() {
                return Err(bad(key));
            }
            Ok(ParsedKey::TempIndex {
                index_type,
                target_key: rest.join(":"),
            })
        }
        "system" => {
            let name = parts.next().ok_or_else(|| bad(key))?.to_string();
            if parts.next().is_some() {
                return Err(bad(key));
            }
            Ok(ParsedKey::System { name })
        }
        _ => Err(bad(key)),
    }
}

fn bad(key: &str) -> Error {
    Error::InvalidKey(key.to_string())
}
