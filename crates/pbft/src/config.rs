//! Replica tunables.

use std::time::Duration;

/// Configuration for the replication engine.
#[derive(Debug, Clone)]
pub struct PbftConfig {
    /// Take a checkpoint every this many executed operations.
    pub checkpoint_interval: u64,

    /// High water mark distance, in checkpoint intervals, above the last
    /// stable checkpoint.
    pub high_water_interval_in_checkpoints: u64,

    /// Requests with timestamps outside now ± this window are rejected;
    /// duplicate-suppression entries older than this are pruned on
    /// checkpoint stabilization.
    pub max_request_age: Duration,

    /// Audit heartbeat period.
    pub heartbeat_interval: Duration,

    /// Whether audit notices are broadcast at all.
    pub audit_enabled: bool,

    /// Seed for the state-transfer peer picker. `None` seeds from OS
    /// entropy; simulations pin it for determinism.
    pub state_transfer_seed: Option<u64>,
}

impl Default for PbftConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 100,
            high_water_interval_in_checkpoints: 2,
            max_request_age: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(5),
            audit_enabled: true,
            state_transfer_seed: None,
        }
    }
}

impl PbftConfig {
    /// The high-water distance in sequence numbers.
    pub fn high_water_span(&self) -> u64 {
        self.checkpoint_interval * self.high_water_interval_in_checkpoints
    }

    /// The admission/pruning age window in milliseconds.
    pub fn max_request_age_ms(&self) -> u64 {
        self.max_request_age.as_millis() as u64
    }
}
