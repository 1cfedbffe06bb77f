//! Lightweight metrics helpers for shadowline.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is embedded; the
//! embedding application installs whichever recorder it uses and these calls
//! become no-ops without one.
//!
//! Provided metrics:
//! * `shadowline_dispatch_total` (counter, label `route`)
//! * `shadowline_shadow_provision_total` (counter, label `outcome`)
//! * `shadowline_shadow_provision_duration_seconds` (histogram)
//! * `shadowline_mediators_active` (gauge)
//! * `shadowline_guard_misuse_total` (counter, label `boundary`)
use std::time::Instant;

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const SHADOWLINE_DISPATCH_TOTAL: &str = "shadowline_dispatch_total";
pub const SHADOWLINE_SHADOW_PROVISION_TOTAL: &str = "shadowline_shadow_provision_total";
pub const SHADOWLINE_SHADOW_PROVISION_DURATION_SECONDS: &str =
    "shadowline_shadow_provision_duration_seconds";
pub const SHADOWLINE_MEDIATORS_ACTIVE: &str = "shadowline_mediators_active";
pub const SHADOWLINE_GUARD_MISUSE_TOTAL: &str = "shadowline_guard_misuse_total";

/// Outcome label values for shadow provisioning.
pub const OUTCOME_BUILT: &str = "built";
pub const OUTCOME_ABSENT: &str = "absent";
pub const OUTCOME_FAILED: &str = "failed";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        SHADOWLINE_DISPATCH_TOTAL,
        Unit::Count,
        "Intercepted calls by the route they were dispatched to."
    );
    describe_counter!(
        SHADOWLINE_SHADOW_PROVISION_TOTAL,
        Unit::Count,
        "Shadow resource provisioning attempts by outcome."
    );
    describe_histogram!(
        SHADOWLINE_SHADOW_PROVISION_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of shadow resource provisioning."
    );
    describe_gauge!(
        SHADOWLINE_MEDIATORS_ACTIVE,
        "Number of mediators currently cached by the registry."
    );
    describe_counter!(
        SHADOWLINE_GUARD_MISUSE_TOTAL,
        Unit::Count,
        "Scope guard exits that had no matching entry."
    );
});

/// Register metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    tracing::info!("Initializing shadowline metric descriptions");
    Lazy::force(&DESCRIPTIONS);
    Ok(())
}

/// Count one dispatched call.
pub fn increment_dispatch(route: &str) {
    counter!(SHADOWLINE_DISPATCH_TOTAL, "route" => route.to_string()).increment(1);
}

/// Count one shadow provisioning attempt.
pub fn increment_shadow_provision(outcome: &'static str) {
    counter!(SHADOWLINE_SHADOW_PROVISION_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a provisioning duration.
pub fn record_shadow_provision_duration(duration: std::time::Duration) {
    histogram!(SHADOWLINE_SHADOW_PROVISION_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Set the number of cached mediators.
pub fn set_active_mediators(count: usize) {
    gauge!(SHADOWLINE_MEDIATORS_ACTIVE).set(count as f64);
}

/// Count one unmatched scope exit.
pub fn increment_guard_misuse(boundary: &str) {
    counter!(SHADOWLINE_GUARD_MISUSE_TOTAL, "boundary" => boundary.to_string()).increment(1);
}

/// RAII helper measuring shadow provisioning duration.
///
/// On drop the duration goes to the histogram and to the `duration_ms` field
/// of the enclosing provision span.
pub struct ProvisionTimer {
    start: Instant,
}

impl ProvisionTimer {
    pub fn new() -> Self {
        Lazy::force(&DESCRIPTIONS);
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ProvisionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProvisionTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        tracing::Span::current().record(
            "duration_ms",
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        );
        record_shadow_provision_duration(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision_timer() {
        let timer = ProvisionTimer::new();
        // Timer records when dropped
        drop(timer);
    }

    #[test]
    fn test_init_metrics() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        increment_dispatch("shadow");
        increment_shadow_provision(OUTCOME_FAILED);
        set_active_mediators(3);
        increment_guard_misuse("jdbc#execute");
    }
}
