//! Byte source contract exposed to file-format decoders
//!
//! Decoders never see the cache, the coalescer, or HTTP; they see a thing
//! that yields bytes at offsets. `ByteSourceWindow` re-bases a source so
//! a decoder for an embedded region can address it from zero.

use async_trait::async_trait;
use bytes::Bytes;

use crate::manager::{CacheError, CacheManager, CacheResult};

/// Anything that can serve byte ranges of one underlying file.
///
/// `length == None` means the rest of the file. A resolvable read returns
/// exactly `length` bytes; `length == Some(0)` resolves to an empty
/// buffer immediately. Failures carry a human-readable message.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Reads `length` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// - `CacheError::InvalidRange` - The span overflows
    /// - `CacheError::TransferFailed` - The backing transfer failed
    async fn get_bytes(&self, offset: u64, length: Option<u64>) -> CacheResult<Bytes>;
}

#[async_trait]
impl ByteSource for CacheManager {
    async fn get_bytes(&self, offset: u64, length: Option<u64>) -> CacheResult<Bytes> {
        CacheManager::get_bytes(self, offset, length).await
    }
}

/// A view of a byte source shifted by a fixed base offset.
///
/// Lets a decoder address an embedded file region as if it started at
/// offset zero.
pub struct ByteSourceWindow<S> {
    source: S,
    base: u64,
}

impl<S> ByteSourceWindow<S> {
    /// Creates a window over `source` starting at `base`.
    pub fn new(source: S, base: u64) -> Self {
        Self { source, base }
    }
}

#[async_trait]
impl<S: ByteSource> ByteSource for ByteSourceWindow<S> {
    async fn get_bytes(&self, offset: u64, length: Option<u64>) -> CacheResult<Bytes> {
        let absolute = self
            .base
            .checked_add(offset)
            .ok_or(CacheError::InvalidRange {
                offset,
                length: length.unwrap_or(0),
            })?;
        self.source.get_bytes(absolute, length).await
    }
}
