//! Structured logging field name schema for depsync.
//!
//! `tracing` events take literal field identifiers, so call sites do
//! not import these constants; this module documents the schema those
//! identifiers follow, so log aggregation tools can query by
//! standardized names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points, intermediate values |
//! | TRACE | Per-item iteration (per-reference classification) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "worker", "db", "sync"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "dequeue", "heartbeat", "handle_dependency_syncing"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job record id being processed.
pub const JOB_ID: &str = "job_id";

/// Upload id whose dependencies are being resolved.
pub const UPLOAD_ID: &str = "upload_id";

/// Package scheme (e.g. "npm", "semanticdb").
pub const SCHEME: &str = "scheme";

/// External-service kind (e.g. "NPMPACKAGES").
pub const KIND: &str = "kind";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Dependency repos newly inserted during a scan.
pub const NEW_REPOS: &str = "new_repos";

/// Dependency repos that already existed during a scan.
pub const EXISTING_REPOS: &str = "existing_repos";

/// References skipped because their scheme is unrecognized.
pub const SKIPPED_REFERENCES: &str = "skipped_references";
