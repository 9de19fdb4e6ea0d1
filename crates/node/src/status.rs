//! The status surface.

use quorumkv_pbft::ReplicaState;
use quorumkv_types::{Checkpoint, PeerAddress};
use serde::Serialize;

/// Point-in-time view of a replica, served over the status port.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub view: u64,
    pub is_primary: bool,
    pub primary: PeerAddress,
    pub latest_stable_checkpoint: Checkpoint,
    pub latest_checkpoint: Checkpoint,
    pub unstable_checkpoints_count: usize,
    pub next_issued_sequence_number: u64,
    pub outstanding_operations_count: usize,
    pub peer_index: Vec<PeerAddress>,
}

impl StatusReport {
    pub fn from_replica(replica: &ReplicaState) -> Self {
        Self {
            view: replica.view(),
            is_primary: replica.is_primary(),
            primary: replica.primary(),
            latest_stable_checkpoint: replica.latest_stable_checkpoint(),
            latest_checkpoint: replica.latest_checkpoint(),
            unstable_checkpoints_count: replica.unstable_checkpoints_count(),
            next_issued_sequence_number: replica.next_issued_sequence(),
            outstanding_operations_count: replica.outstanding_operations_count(),
            peer_index: replica.current_peers(),
        }
    }

    /// The JSON form served to status clients.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("status serialization cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorumkv_kv::KvService;
    use quorumkv_pbft::{PbftConfig, RecoveredState};
    use quorumkv_types::Configuration;
    use std::sync::Arc;

    #[test]
    fn status_report_reflects_a_fresh_replica() {
        let mut config = Configuration::new();
        for i in 0..4u16 {
            config.add_peer(PeerAddress::new(
                format!("host{i}"),
                8000 + i,
                9000 + i,
                format!("replica{i}"),
                format!("uuid{i}"),
            ));
        }

        let replica = ReplicaState::new(
            "uuid1".into(),
            config,
            Arc::new(KvService::new(100)),
            PbftConfig::default(),
            RecoveredState::default(),
        );

        let report = StatusReport::from_replica(&replica);
        assert_eq!(report.view, 1);
        // View 1 of 4 sorted peers: uuid1 is the primary.
        assert!(report.is_primary);
        assert_eq!(report.primary.uuid.as_str(), "uuid1");
        assert_eq!(report.latest_stable_checkpoint.sequence, 0);
        assert_eq!(report.next_issued_sequence_number, 1);
        assert_eq!(report.outstanding_operations_count, 0);
        assert_eq!(report.peer_index.len(), 4);

        let json = report.to_json();
        assert!(json.contains("\"view\":1"));
        assert!(json.contains("uuid1"));
    }
}
