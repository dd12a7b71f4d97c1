//! Handler trait invoked by the worker engine.

use async_trait::async_trait;

use depsync_core::{Record, Result};

/// Domain logic invoked once per leased job record.
///
/// The worker engine is agnostic to what the handler does; it only
/// converts the returned `Result` into a terminal state transition.
/// Handlers must be safe to invoke concurrently from multiple poll
/// loops (each invocation gets its own record and its own cursors).
#[async_trait]
pub trait Handler<R: Record>: Send + Sync {
    async fn handle(&self, record: R) -> Result<()>;
}

/// No-op handler for tests and wiring checks.
pub struct NoOpHandler;

#[async_trait]
impl<R: Record> Handler<R> for NoOpHandler {
    async fn handle(&self, _record: R) -> Result<()> {
        Ok(())
    }
}
