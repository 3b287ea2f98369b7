//! Background release of lapsed claims.
//!
//! Spawns a thread that calls [`ClaimQueue::release_expired_claims`] once
//! per interval. The default interval is a fifth of the claim duration, so
//! a lapsed claim stays locked for at most that long past its expiry.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::Connection;

use super::ClaimQueue;
use crate::config::QueueConfig;
use crate::db::{self, DatabaseError};

/// Upper bound on how long shutdown waits for the thread to notice.
const SLEEP_GRANULARITY: Duration = Duration::from_millis(100);

/// Handle for the sweeper thread. Dropping it stops and joins the thread.
pub struct SweeperHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SweeperHandle {
    /// Request shutdown. A sweep already in progress completes.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Start sweeping on a dedicated thread with its own connection to `db_path`.
///
/// The connection is opened before the thread is spawned so open errors
/// reach the caller. The first sweep runs immediately.
pub fn start_claim_sweeper(
    db_path: &Path,
    busy_timeout: Duration,
    queue: Arc<ClaimQueue>,
    interval: Duration,
) -> Result<SweeperHandle, DatabaseError> {
    let conn = db::open_database(db_path, busy_timeout)?;
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    let handle = std::thread::spawn(move || {
        tracing::info!(interval_ms = interval.as_millis() as u64, "Claim sweeper started");
        sweeper_loop(&conn, &queue, interval, &flag);
        tracing::info!("Claim sweeper shutting down");
    });

    Ok(SweeperHandle {
        shutdown,
        handle: Some(handle),
    })
}

/// Start sweeping with the interval and busy timeout from `config`.
pub fn start_configured_sweeper(
    db_path: &Path,
    config: &QueueConfig,
    queue: Arc<ClaimQueue>,
) -> Result<SweeperHandle, DatabaseError> {
    start_claim_sweeper(db_path, config.busy_timeout(), queue, config.sweep_interval())
}

fn sweeper_loop(conn: &Connection, queue: &ClaimQueue, interval: Duration, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        match queue.release_expired_claims(conn) {
            Ok(released) if !released.is_empty() => {
                tracing::info!(count = released.len(), "Sweep released expired claims");
            }
            Ok(_) => tracing::debug!("Sweep found no expired claims"),
            // Nothing was written; the next sweep retries.
            Err(e) => tracing::warn!(error = %e, "Claim sweep failed"),
        }

        if !sleep_unless_shutdown(interval, shutdown) {
            return;
        }
    }
}

/// Sleep for `interval` in small steps. Returns false if shutdown was requested.
fn sleep_unless_shutdown(interval: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SLEEP_GRANULARITY.min(deadline - now));
    }
}
