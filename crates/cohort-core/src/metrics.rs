// Metrics for clustering components
// Recorded through the `metrics` facade; nothing is exported unless the host installs a recorder

use metrics::{counter, describe_counter, describe_gauge, gauge};

pub const RESYNC_TOTAL: &str = "cohort_resync_total";
pub const RESYNC_DISCARDED_TOTAL: &str = "cohort_resync_discarded_total";
pub const DISPATCH_FAILURES_TOTAL: &str = "cohort_dispatch_failures_total";
pub const SINGLETON_PRIMARY: &str = "cohort_singleton_primary";

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    describe_counter!(
        RESYNC_TOTAL,
        "Total number of provider re-synchronization rounds started"
    );
    describe_counter!(
        RESYNC_DISCARDED_TOTAL,
        "Total number of re-synchronization rounds discarded by a newer membership change"
    );
    describe_counter!(
        DISPATCH_FAILURES_TOTAL,
        "Total number of failed per-node or cluster-wide command dispatches"
    );
    describe_gauge!(
        SINGLETON_PRIMARY,
        "1 while the local node is primary for the singleton, 0 otherwise"
    );

    tracing::info!("Metrics initialized");
}

/// Record the start of a re-synchronization round
pub fn record_resync(registry: &str) {
    counter!(RESYNC_TOTAL, "registry" => registry.to_string()).increment(1);
}

/// Record a re-synchronization round discarded as stale
pub fn record_resync_discarded(registry: &str) {
    counter!(RESYNC_DISCARDED_TOTAL, "registry" => registry.to_string()).increment(1);
}

/// Record a failed dispatch
pub fn record_dispatch_failure(dispatcher: &str, command: &str) {
    counter!(
        DISPATCH_FAILURES_TOTAL,
        "dispatcher" => dispatcher.to_string(),
        "command" => command.to_string()
    )
    .increment(1);
}

/// Update the primary gauge for a singleton
pub fn set_singleton_primary(singleton: &str, primary: bool) {
    gauge!(SINGLETON_PRIMARY, "singleton" => singleton.to_string()).set(if primary {
        1.0
    } else {
        0.0
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        init_metrics();
        record_resync("providers");
        record_resync_discarded("providers");
        record_dispatch_failure("providers", "query");
        set_singleton_primary("demo", true);
    }
}
