//! Deterministic ordering of queued events.

use crate::NodeIndex;
use quorumkv_core::EventPriority;
use std::time::Duration;

/// Ordering key for the global event queue.
///
/// Events sort by delivery time, then priority (internal before timer
/// before network before client), then insertion sequence, so that runs
/// are fully deterministic regardless of map iteration details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub time: Duration,
    pub priority: EventPriority,
    pub sequence: u64,
    pub node_index: NodeIndex,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ms: u64, priority: EventPriority, sequence: u64) -> EventKey {
        EventKey { time: Duration::from_millis(ms), priority, sequence, node_index: 0 }
    }

    #[test]
    fn time_dominates_priority() {
        assert!(key(1, EventPriority::Client, 0) < key(2, EventPriority::Internal, 0));
    }

    #[test]
    fn priority_breaks_time_ties() {
        assert!(key(5, EventPriority::Internal, 9) < key(5, EventPriority::Timer, 0));
        assert!(key(5, EventPriority::Timer, 9) < key(5, EventPriority::Network, 0));
        assert!(key(5, EventPriority::Network, 9) < key(5, EventPriority::Client, 0));
    }

    #[test]
    fn insertion_order_breaks_full_ties() {
        assert!(key(5, EventPriority::Network, 1) < key(5, EventPriority::Network, 2));
    }
}
