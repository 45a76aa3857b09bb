//! TTL clock calibrated against the wall clock once at startup.
//!
//! Expiry is evaluated as `wall_base + monotonic_delta`, so a wall-clock jump
//! after calibration does not move records in or out of expiry. The
//! calibration pair is persisted in the superblock.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wall/monotonic anchor captured together at calibration time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    pub wall_clock_unix_seconds: u64,
    pub monotonic_time_nanos: u64,
}

/// Monotonic nanoseconds against a process-wide anchor. `Instant` has no
/// absolute representation, so all calibrations in one process share this
/// origin.
fn monotonic_nanos() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = *ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_nanos() as u64
}

#[derive(Debug, Clone, Copy)]
pub struct TtlClock {
    calibration: Calibration,
}

impl TtlClock {
    /// Capture a fresh wall/monotonic calibration pair.
    pub fn calibrate_now() -> Calibration {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Calibration {
            wall_clock_unix_seconds: wall,
            monotonic_time_nanos: monotonic_nanos(),
        }
    }

    pub fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    /// Current wall-clock seconds derived from the monotonic delta since
    /// calibration.
    pub fn now_wall_seconds(&self) -> u64 {
        let delta_nanos =
            monotonic_nanos().saturating_sub(self.calibration.monotonic_time_nanos);
        self.calibration.wall_clock_unix_seconds + delta_nanos / 1_000_000_000
    }

    /// `ttl_epoch_seconds == 0` means the record never expires.
    pub fn is_expired(&self, ttl_epoch_seconds: u64) -> bool {
        if ttl_epoch_seconds == 0 {
            return false;
        }
        ttl_epoch_seconds <= self.now_wall_seconds()
    }
}
