//! Wall-clock helpers

use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Seconds since the Unix epoch; 0 if the clock is before it
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| {
            warn!("System time is before UNIX epoch, using 0 as timestamp");
            std::time::Duration::from_secs(0)
        })
        .as_secs()
}
