//! Generic worker engine: poll loops, lease heartbeats, and terminal
//! state transitions.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use depsync_core::{defaults, Error, Record, Result, WorkerStore};

use crate::handler::Handler;

/// Configuration for a worker pool.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Name used in lifecycle log events.
    pub name: String,
    /// Number of independent poll loops.
    pub num_handlers: usize,
    /// Polling interval when the queue is empty.
    pub poll_interval: Duration,
    /// Lease renewal interval while a handler runs.
    pub heartbeat_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            name: "worker".into(),
            num_handlers: defaults::NUM_HANDLERS,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            heartbeat_interval: Duration::from_millis(defaults::HEARTBEAT_INTERVAL_MS),
        }
    }
}

impl WorkerOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Create options from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_NUM_HANDLERS` | `1` | Concurrent poll loops |
    /// | `WORKER_POLL_INTERVAL_MS` | `5000` | Polling interval when queue is empty |
    /// | `WORKER_HEARTBEAT_INTERVAL_MS` | `1000` | Lease renewal interval |
    pub fn from_env(name: impl Into<String>) -> Self {
        let mut options = Self::new(name);

        if let Some(n) = std::env::var("WORKER_NUM_HANDLERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            options.num_handlers = n.max(1);
        }
        if let Some(ms) = std::env::var("WORKER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            options.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = std::env::var("WORKER_HEARTBEAT_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            options.heartbeat_interval = Duration::from_millis(ms);
        }

        options
    }

    /// Set the number of poll loops.
    pub fn with_num_handlers(mut self, n: usize) -> Self {
        self.num_handlers = n.max(1);
        self
    }

    /// Set the polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

/// Handle for controlling a running worker pool.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal shutdown and wait for every poll loop to drain its
    /// in-flight job.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.loops {
            if let Err(e) = task.await {
                error!(error = ?e, "Worker poll loop panicked");
            }
        }
    }
}

/// A pool of poll loops leasing records from a [`WorkerStore`] and
/// dispatching them to a [`Handler`].
pub struct Worker<R: Record> {
    store: Arc<dyn WorkerStore<R>>,
    handler: Arc<dyn Handler<R>>,
    options: WorkerOptions,
}

impl<R: Record> Worker<R> {
    pub fn new(
        store: Arc<dyn WorkerStore<R>>,
        handler: Arc<dyn Handler<R>>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            store,
            handler,
            options,
        }
    }

    /// Spawn the poll loops and return a handle for shutdown.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            worker = %self.options.name,
            num_handlers = self.options.num_handlers,
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            "Worker started"
        );

        let loops = (0..self.options.num_handlers)
            .map(|_| {
                let store = self.store.clone();
                let handler = self.handler.clone();
                let options = self.options.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(poll_loop(store, handler, options, shutdown_rx))
            })
            .collect();

        WorkerHandle { shutdown_tx, loops }
    }
}

/// One poll loop: dequeue, process, repeat. Work found means an
/// immediate re-poll to minimize latency under load; an empty queue
/// means sleeping one interval. Store errors are logged and retried on
/// the next tick, never fatal.
async fn poll_loop<R: Record>(
    store: Arc<dyn WorkerStore<R>>,
    handler: Arc<dyn Handler<R>>,
    options: WorkerOptions,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match store.dequeue().await {
            Ok(Some(record)) => {
                process_record(&store, &handler, &options, record).await;
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                error!(worker = %options.name, error = %e, "Dequeue failed");
            }
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = sleep(options.poll_interval) => {}
        }
    }

    debug!(worker = %options.name, "Worker poll loop stopped");
}

/// Process a single leased record: keep the lease alive while the
/// handler runs, recover panics, and commit the terminal transition.
async fn process_record<R: Record>(
    store: &Arc<dyn WorkerStore<R>>,
    handler: &Arc<dyn Handler<R>>,
    options: &WorkerOptions,
    record: R,
) {
    let record_id = record.record_id();
    let start = Instant::now();

    info!(worker = %options.name, job_id = record_id, "Processing job");

    let heartbeat = tokio::spawn({
        let store = store.clone();
        let interval = options.heartbeat_interval;
        async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                // A failed heartbeat is logged and the lease allowed to
                // lapse; another worker will reclaim the record.
                if let Err(e) = store.heartbeat(record_id).await {
                    warn!(job_id = record_id, error = %e, "Failed to send heartbeat");
                }
            }
        }
    });

    let outcome = match AssertUnwindSafe(handler.handle(record)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(Error::Internal(format!(
            "handler panicked: {}",
            panic_message(&panic)
        ))),
    };

    // Deterministic ticker stop on every exit path.
    heartbeat.abort();

    match outcome {
        Ok(()) => {
            if let Err(e) = store.mark_complete(record_id).await {
                error!(job_id = record_id, error = %e, "Failed to mark job as completed");
            } else {
                info!(
                    worker = %options.name,
                    job_id = record_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed"
                );
            }
        }
        Err(err) => {
            if let Err(e) = store.mark_errored(record_id, &err.to_string()).await {
                error!(job_id = record_id, error = %e, "Failed to mark job as errored");
            } else {
                warn!(
                    worker = %options.name,
                    job_id = record_id,
                    retryable = err.is_retryable(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    error = %err,
                    "Job errored"
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
