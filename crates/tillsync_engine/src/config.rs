//! Engine configuration.

use std::time::Duration;

use tillsync_model::{FeatureFlags, WritePolicy};
use tillsync_protocol::{MergePolicy, ResolutionPolicy};

/// How replayed journal entries are shipped to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// One request per entry; the default, and the mode with the most
    /// precise conflict detection.
    PerEntry,
    /// Entries shipped in batches to the batch-apply procedure, with
    /// per-entry outcomes folded back into the journal.
    Batch,
}

/// Configuration for a [`crate::SyncEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The store (tenant) this terminal belongs to.
    pub store_id: String,
    /// Per-table offline write policy.
    pub write_policy: WritePolicy,
    /// Feature flags consulted for gated tables.
    pub feature_flags: FeatureFlags,
    /// Automatic conflict resolution policy. `Manual` leaves every conflict
    /// for an operator.
    pub auto_resolution: ResolutionPolicy,
    /// Field merge rules consulted when resolution is `Merged`.
    pub merge_policy: MergePolicy,
    /// Upper bound on entries attempted per replay cycle. `None` drains the
    /// whole queue.
    pub max_entries_per_cycle: Option<usize>,
    /// Soft wall-clock budget for one replay cycle. Checked between entries,
    /// never mid-request.
    pub cycle_deadline: Option<Duration>,
    /// How replay ships entries.
    pub apply_mode: ApplyMode,
    /// Batch size used in batch apply mode.
    pub batch_size: usize,
    /// Cents a payment may overshoot an order total before settlement is
    /// rejected. Covers cash rounding at the till.
    pub overpayment_tolerance_cents: i64,
    /// How long synced journal entries are retained before cleanup.
    pub synced_retention: Duration,
}

impl EngineConfig {
    /// Creates a configuration with defaults for a store.
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            write_policy: WritePolicy::new(),
            feature_flags: FeatureFlags::new(),
            auto_resolution: ResolutionPolicy::default(),
            merge_policy: MergePolicy::new(),
            max_entries_per_cycle: None,
            cycle_deadline: None,
            apply_mode: ApplyMode::PerEntry,
            batch_size: 50,
            overpayment_tolerance_cents: 100,
            synced_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    /// Sets the per-table write policy.
    #[must_use]
    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Sets the feature flags.
    #[must_use]
    pub fn with_feature_flags(mut self, flags: FeatureFlags) -> Self {
        self.feature_flags = flags;
        self
    }

    /// Sets the automatic resolution policy.
    #[must_use]
    pub fn with_auto_resolution(mut self, policy: ResolutionPolicy) -> Self {
        self.auto_resolution = policy;
        self
    }

    /// Sets the merge rules.
    #[must_use]
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Caps the number of entries attempted per replay cycle.
    #[must_use]
    pub fn with_max_entries_per_cycle(mut self, max: usize) -> Self {
        self.max_entries_per_cycle = Some(max);
        self
    }

    /// Sets the wall-clock budget for one replay cycle.
    #[must_use]
    pub fn with_cycle_deadline(mut self, deadline: Duration) -> Self {
        self.cycle_deadline = Some(deadline);
        self
    }

    /// Sets the replay apply mode.
    #[must_use]
    pub fn with_apply_mode(mut self, mode: ApplyMode) -> Self {
        self.apply_mode = mode;
        self
    }

    /// Sets the batch size for batch apply mode. Clamped to at least 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the overpayment tolerance for settlement, in cents.
    #[must_use]
    pub fn with_overpayment_tolerance(mut self, cents: i64) -> Self {
        self.overpayment_tolerance_cents = cents;
        self
    }

    /// Sets the retention window for synced journal entries.
    #[must_use]
    pub fn with_synced_retention(mut self, retention: Duration) -> Self {
        self.synced_retention = retention;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillsync_model::TableAccess;
    use tillsync_protocol::Resolution;

    #[test]
    fn defaults_favor_safety() {
        let config = EngineConfig::new("store-1");
        assert_eq!(config.store_id, "store-1");
        assert_eq!(config.auto_resolution, ResolutionPolicy::Manual);
        assert_eq!(config.apply_mode, ApplyMode::PerEntry);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.overpayment_tolerance_cents, 100);
        assert_eq!(config.synced_retention, Duration::from_secs(604_800));
        assert!(config.max_entries_per_cycle.is_none());
        assert!(config.cycle_deadline.is_none());
    }

    #[test]
    fn builders_compose() {
        let policy = WritePolicy::new()
            .with_table("orders", TableAccess::OfflineCapable)
            .unwrap();
        let config = EngineConfig::new("store-1")
            .with_write_policy(policy)
            .with_auto_resolution(ResolutionPolicy::RemoteWins)
            .with_max_entries_per_cycle(25)
            .with_batch_size(0)
            .with_apply_mode(ApplyMode::Batch);
        assert!(config.write_policy.access("orders").is_ok());
        assert_eq!(
            config.auto_resolution.resolution(),
            Some(Resolution::RemoteWins)
        );
        assert_eq!(config.max_entries_per_cycle, Some(25));
        assert_eq!(config.batch_size, 1, "batch size is clamped");
        assert_eq!(config.apply_mode, ApplyMode::Batch);
    }
}
