//! Centralized default constants for the depsync system.
//!
//! **This module is the single source of truth** for shared default
//! values. Crates reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// WORKER
// =============================================================================

/// Number of concurrent poll loops per worker process.
pub const NUM_HANDLERS: usize = 1;

/// Polling interval when the queue is empty (milliseconds).
pub const POLL_INTERVAL_MS: u64 = 5_000;

/// Lease renewal interval while a handler is running (milliseconds).
pub const HEARTBEAT_INTERVAL_MS: u64 = 1_000;

// =============================================================================
// JOB STORE
// =============================================================================

/// A processing record whose heartbeat is older than this is stalled
/// and eligible for reclaim.
pub const STALLED_AFTER_SECS: i64 = 30;

/// Failure ceiling: a record errored this many times goes terminal
/// `failed` instead of requeueing.
pub const MAX_NUM_FAILURES: i32 = 5;

/// Reset ceiling: a record stalled this many times goes terminal
/// `failed` to prevent infinite requeue loops.
pub const MAX_NUM_RESETS: i32 = 3;

/// Backoff delay before a failed record becomes eligible again (seconds).
pub const RETRY_DELAY_SECS: i64 = 60;

// =============================================================================
// REFERENCE SCANNING
// =============================================================================

/// Page size for the keyset-paged reference scanner.
pub const REFERENCE_SCAN_PAGE_SIZE: i64 = 100;

// =============================================================================
// DATABASE POOL
// =============================================================================

/// Maximum number of connections in the pool.
pub const POOL_MAX_CONNECTIONS: u32 = 10;

/// Connection acquire timeout (seconds).
pub const POOL_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Idle connection timeout (seconds).
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 600;
