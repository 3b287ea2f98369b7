pub mod claim; // Jump-ball claim queue and expiry sweeper
pub mod clock;
pub mod config;
pub mod coordinator; // Event wiring
pub mod db;
pub mod feed; // Provider display feed
pub mod models;
pub mod work_queue; // Per-provider work queues

pub use claim::{ClaimError, ClaimQueue, EligibilityResolver, SqliteEligibility};
pub use clock::{Clock, SystemClock};
pub use config::QueueConfig;
pub use coordinator::Coordinator;
pub use feed::{FeedRenderer, PatientDirectory};
pub use work_queue::WorkQueue;

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, or the default filter
/// when it is unset. Safe to call more than once.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter()));

    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok() {
        tracing::info!("{} v{} logging initialised", config::APP_NAME, config::APP_VERSION);
    }
}
