//! Core data model for the dependency-sync pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// JOB RECORDS
// =============================================================================

/// Lifecycle state of a job record.
///
/// `Queued` and `Processing` are the only non-terminal states.
/// `Completed` and `Failed` are terminal and immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    /// String form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Whether the record can still transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::str::FromStr for JobState {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown job state: {other}"
            ))),
        }
    }
}

/// A dependency-sync job record.
///
/// Created by an upstream producer when an upload finishes processing;
/// mutated only by workers holding a valid lease; retained after
/// completion for audit, pruned by a separate retention process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: i64,
    /// The upload whose dependencies are being resolved.
    pub upload_id: i64,
    pub state: JobState,
    pub failure_message: Option<String>,
    /// Count of prior failed attempts.
    pub num_failures: i32,
    /// Count of stall-triggered requeues.
    pub num_resets: i32,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Retry backoff gate; the record is not eligible before this instant.
    pub process_after: Option<DateTime<Utc>>,
    /// Last lease renewal; a processing record whose heartbeat is older
    /// than the stall threshold is eligible for reclaim.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Identity of the worker holding the lease.
    pub worker_hostname: Option<String>,
}

/// Queue statistics summary for operator visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

// =============================================================================
// PACKAGES
// =============================================================================

/// One dependency package of an upload, as recorded at upload time.
///
/// Ephemeral: only materialized through a [`ReferenceScanner`] scoped to
/// a single handler invocation, never persisted independently.
///
/// [`ReferenceScanner`]: crate::traits::ReferenceScanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReference {
    pub scheme: String,
    pub name: String,
    pub version: String,
}

/// A normalized package identity, suitable for deduplicated catalog
/// insertion. Produced by the classifier from a [`PackageReference`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Package {
    pub scheme: String,
    pub name: String,
    pub version: String,
}

// =============================================================================
// UPLOADS
// =============================================================================

/// The code-intelligence artifact that triggered a sync job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: i64,
    pub repository_id: i64,
    pub commit: String,
    /// Name of the indexer that produced the upload (e.g. "lsif-go").
    pub indexer: String,
}

// =============================================================================
// EXTERNAL SERVICES
// =============================================================================

/// A configured connection to an external package registry.
///
/// Not created by this subsystem; only `next_sync_at` is mutated, to
/// request a re-sync once new dependency repos have been cataloged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalService {
    pub id: i64,
    pub kind: String,
    pub display_name: String,
    pub next_sync_at: Option<DateTime<Utc>>,
}

/// Filter for listing external services.
#[derive(Debug, Clone, Default)]
pub struct ExternalServiceFilter {
    /// Kinds to match. Must be non-empty: an unfiltered list would touch
    /// every configured registry.
    pub kinds: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_job_state_round_trip() {
        for state in [
            JobState::Queued,
            JobState::Processing,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(JobState::from_str(state.as_str()).unwrap(), state);
        }
    }

    #[test]
    fn test_job_state_unknown_is_invalid_input() {
        assert!(matches!(
            JobState::from_str("paused"),
            Err(crate::Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Processing.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn test_package_identity_equality() {
        let a = Package {
            scheme: "npm".into(),
            name: "left-pad".into(),
            version: "1.0.0".into(),
        };
        let b = a.clone();
        assert_eq!(a, b);

        let c = Package {
            version: "1.0.1".into(),
            ..a.clone()
        };
        assert_ne!(a, c);
    }
}
