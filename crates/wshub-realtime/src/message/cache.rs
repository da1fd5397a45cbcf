//! Shared per-broadcast encoding cache.
//!
//! One cache is built per fan-out call and handed to every recipient's
//! transport, so a compressed representation is produced once and reused
//! for every session that negotiated the same method.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;

/// Per-message compression a transport may have negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// No compression.
    None,
    /// permessage-deflate.
    Deflate,
}

/// Compression method → pre-encoded bytes, scoped to one fan-out pass.
#[derive(Debug, Default)]
pub struct SendCache {
    entries: Mutex<HashMap<CompressionMethod, Bytes>>,
}

impl SendCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached encoding for `method`, producing it with `encode`
    /// on first use.
    pub fn get_or_encode<F>(&self, method: CompressionMethod, encode: F) -> Bytes
    where
        F: FnOnce() -> Bytes,
    {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.entry(method).or_insert_with(encode).clone()
    }

    /// Return the cached encoding for `method`, if any.
    pub fn get(&self, method: CompressionMethod) -> Option<Bytes> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&method).cloned()
    }

    /// Number of cached encodings.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing has been cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every cached buffer.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
