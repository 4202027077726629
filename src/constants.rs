//! Thresholds fixed by spec §9 "Open questions": the source varies these
//! per call site; this crate fixes them centrally so the planner and merge
//! engine agree.

use chrono::Duration;

/// Minimum contract-window/request overlap worth fetching (§4.7, §4.9).
#[must_use]
pub fn low_data_threshold() -> Duration {
    Duration::days(3)
}

/// Gap beyond which a prior fetch is trusted to mean "no newer bars exist"
/// (§4.9 step 2).
#[must_use]
pub fn expiration_threshold() -> Duration {
    Duration::days(7)
}
