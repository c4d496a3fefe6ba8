//! The key codec and the ordered KV engine abstraction.

#![warn(missing_docs)]

pub mod keycodec;
pub mod kv;
pub mod memkv;

pub use keycodec::{
    final_message_key, message_versions_prefix, parse, provisional_message_key,
    soft_delete_marker_key, system_key, temp_index_key, thread_messages_prefix, thread_meta_key,
    thread_ms_index_key, thread_to_user_key, user_to_thread_key, version_key, ParsedKey,
    MS_INDEX_KINDS, TEMP_INDEX_PREFIX,
};
pub use kv::{prefix_upper_bound, Batch, BatchOp, KvEngine};
pub use memkv::MemKv;
