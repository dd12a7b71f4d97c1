//! Named observability operations for the dependency-sync stage.
//!
//! One `Operations` set is constructed at startup and shared by `Arc`
//! across every handler invocation; there is no lazily initialized
//! global. An operation wraps a unit of work, emitting a structured
//! tracing event with its name, duration, and outcome. It never alters
//! control flow.

use std::future::Future;
use std::time::Instant;

use depsync_core::Result;
use tracing::{debug, warn};

/// A named instrumentation handle, keyed
/// `<domain>.<component>.<operation>`.
#[derive(Debug, Clone)]
pub struct Operation {
    name: &'static str,
}

impl Operation {
    fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `fut`, recording duration and outcome under this operation's
    /// name. `labels` carries operation-specific values (scheme,
    /// new-vs-existing) into the emitted event.
    pub async fn observe<T, F>(&self, labels: &[(&str, &str)], fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = fut.await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => debug!(
                op = self.name,
                duration_ms,
                labels = ?labels,
                "operation completed"
            ),
            Err(err) => warn!(
                op = self.name,
                duration_ms,
                labels = ?labels,
                error = %err,
                "operation failed"
            ),
        }

        result
    }
}

/// The process-wide operation set for the dependency-sync stage.
///
/// Distinct handles keep the syncing stage's telemetry separate from
/// the downstream indexing stage's.
#[derive(Debug, Clone)]
pub struct Operations {
    pub handle_dependency_syncing: Operation,
    pub insert_dependency_repo: Operation,
}

impl Operations {
    pub fn new() -> Self {
        Self {
            handle_dependency_syncing: Operation::new(
                "codeintel.dependencyrepos.HandleDependencySyncing",
            ),
            insert_dependency_repo: Operation::new(
                "codeintel.dependencyrepos.InsertCloneableDependencyRepo",
            ),
        }
    }
}

impl Default for Operations {
    fn default() -> Self {
        Self::new()
    }
}
