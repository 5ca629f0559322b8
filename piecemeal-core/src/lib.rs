//! Piecemeal Core - sparse byte-range caching for remote files
//!
//! Read arbitrary byte ranges of a large remote file addressed only by
//! URL, without downloading the whole file. Every byte ever fetched is
//! cached, repeat reads are free, and concurrent cache misses coalesce
//! into as few HTTP range requests as possible.

pub mod config;
pub mod manager;
pub mod network;
pub mod ranges;
pub mod source;
pub mod transport;

// Re-export main types for convenient access
pub use config::PiecemealConfig;
pub use manager::{CacheError, CacheManager};
pub use ranges::{ByteRange, RangeSet};
pub use source::{ByteSource, ByteSourceWindow};
pub use transport::{RangeTransport, TransportError};

/// Core errors that can bubble up from any Piecemeal subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PiecemealError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl PiecemealError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            PiecemealError::Cache(e) => match e {
                CacheError::InvalidRange { offset, length } => {
                    format!("Invalid read range at offset {offset} (length {length})")
                }
                CacheError::TransferFailed { reason } => {
                    format!("Download failed: {reason}")
                }
                CacheError::Shutdown => "The cache was shut down".to_string(),
            },
            PiecemealError::Transport(e) => match e {
                TransportError::UnexpectedStatus { status } => {
                    format!("The server answered with status {status}")
                }
                _ => "Download error occurred".to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, PiecemealError>;
