//! The intake queue's wire framing for a `QueueOp` (§6), used whenever an op
//! is serialized to the WAL before becoming visible on the channel.
//!
//! ```text
//! op := version:u8=1
//!       handler_len:u16be handler:[u8]
//!       thread_len:u16be  thread:[u8]
//!       id_len:u16be      id:[u8]
//!       ts:i64be
//!       enq_seq:u64be
//!       extras_count:u16be (key_len:u16be key:[u8] value_len:u16be value:[u8])*
//!       payload_len:u32be payload:[u8]
//! ```

use std::collections::HashMap;

use progressdb_core::{Error, QueueOp, Result};
use progressdb_core::types::EnqSeq;

const VERSION: u8 = 0x01;

fn push_u16_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn take_u16_str(buf: &[u8], pos: &mut usize) -> Result<String> {
    let len = take_u16(buf, pos)? as usize;
    let bytes = take_n(buf, pos, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::InvalidPayload(e.to_string()))
}

fn take_u16(buf: &[u8], pos: &mut usize) -> Result<u16> {
    let bytes = take_n(buf, pos, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn take_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = take_n(buf, pos, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn take_i64(buf: &[u8], pos: &mut usize) -> Result<i64> {
    let bytes = take_n(buf, pos, 8)?;
    Ok(i64::from_be_bytes(bytes.try_into().unwrap()))
}

fn take_u64(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let bytes = take_n(buf, pos, 8)?;
    Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
}

fn take_u8(buf: &[u8], pos: &mut usize) -> Result<u8> {
    let bytes = take_n(buf, pos, 1)?;
    Ok(bytes[0])
}

fn take_n<'a>(buf: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    if buf.len() < *pos + n {
        return Err(Error::InvalidPayload("truncated queue op frame".into()));
    }
    let slice = &buf[*pos..*pos + n];
    *pos += n;
    Ok(slice)
}

/// Encode a `QueueOp` to its wire form. `wal_offset` is never encoded — it is
/// assigned by the WAL at append time and does not round-trip.
pub fn encode(op: &QueueOp) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + op.payload.len());
    buf.push(VERSION);
    push_u16_str(&mut buf, &op.handler);
    push_u16_str(&mut buf, &op.thread_ts);
    push_u16_str(&mut buf, &op.id);
    buf.extend_from_slice(&op.ts.to_be_bytes());
    buf.extend_from_slice(&op.enq_seq.0.to_be_bytes());
    buf.extend_from_slice(&(op.extras.len() as u16).to_be_bytes());
    for (k, v) in &op.extras {
        push_u16_str(&mut buf, k);
        push_u16_str(&mut buf, v);
    }
    buf.extend_from_slice(&(op.payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&op.payload);
    buf
}

/// Decode a `QueueOp` from its wire form, as produced by [`encode`].
/// `wal_offset` is always `WalOffset::NONE` in the result; the caller (WAL
/// replay) stamps in the real offset from the enclosing WAL record.
pub fn decode(buf: &[u8]) -> Result<QueueOp> {
    let mut pos = 0usize;
    let version = take_u8(buf, &mut pos)?;
    if version != VERSION {
        return Err(Error::InvalidPayload(format!(
            "unsupported queue op wire version {version}"
        )));
    }
    let handler = take_u16_str(buf, &mut pos)?;
    let thread_ts = take_u16_str(buf, &mut pos)?;
    let id = take_u16_str(buf, &mut pos)?;
    let ts = take_i64(buf, &mut pos)?;
    let enq_seq = take_u64(buf, &mut pos)?;
    let extras_count = take_u16(buf, &mut pos)?;
    let mut extras = HashMap::with_capacity(extras_count as usize);
    for _ in 0..extras_count {
        let k = take_u16_str(buf, &mut pos)?;
        let v = take_u16_str(buf, &mut pos)?;
        extras.insert(k, v);
    }
    let payload_len = take_u32(buf, &mut pos)? as usize;
    let payload = take_n(buf, &mut pos, payload_len)?.to_vec();

    Ok(QueueOp {
        handler,
        thread_ts,
        id,
        payload,
        ts,
        enq_seq: EnqSeq(enq_seq),
        wal_offset: progressdb_core::types::WalOffset::NONE,
        extras,
    })
}
