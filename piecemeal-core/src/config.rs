//! Centralized configuration for Piecemeal.
//!
//! All tunable parameters are defined here to avoid hard-coded values
//! scattered throughout the codebase. This core deliberately takes no
//! environment variables and no CLI flags; embedding applications build
//! the configuration themselves.

use std::time::Duration;

/// Central configuration for all Piecemeal components.
#[derive(Debug, Clone, Default)]
pub struct PiecemealConfig {
    pub download: DownloadConfig,
    pub network: NetworkConfig,
}

/// Cache-miss batching and request-shaping parameters.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// How long concurrent cache misses accumulate before one request is
    /// dispatched for all of them
    pub coalesce_delay: Duration,
    /// Minimum total size a dispatched request is padded up to
    pub min_request_size: u64,
    /// Requested spans closer than this are merged into one; a second
    /// round trip costs more than a few hundred redundant bytes
    pub merge_gap: u64,
    /// Per-request size for the no-partial-transfer fallback
    pub manual_chunk_size: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            coalesce_delay: Duration::from_millis(5),
            min_request_size: 16 * 1024, // 16 KiB
            merge_gap: 500,
            manual_chunk_size: 10 * 1024, // 10 KiB
        }
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Per-request timeout
    pub request_timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
    /// Maximum redirects to follow
    pub max_redirects: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: "piecemeal/0.1.0",
            max_redirects: 3,
        }
    }
}

impl PiecemealConfig {
    /// Creates a configuration optimized for tests: real coalescing
    /// behavior on a timescale tests can afford to wait out.
    pub fn for_testing() -> Self {
        Self {
            download: DownloadConfig {
                coalesce_delay: Duration::from_millis(5),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
