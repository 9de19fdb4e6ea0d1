//! Duplicate request suppression.

use quorumkv_types::Hash;
use std::collections::BTreeMap;

/// Recently admitted requests, ordered by client timestamp.
///
/// The primary records every admitted (timestamp, client, digest) and
/// rejects a second admission of the same triple inside the age window.
/// Entries older than the window are erased whenever a checkpoint
/// stabilizes.
#[derive(Debug, Default)]
pub struct RecentRequests {
    /// timestamp → requests admitted at that timestamp.
    seen: BTreeMap<u64, Vec<(String, Hash)>>,
}

impl RecentRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Has this exact (timestamp, client, digest) been admitted already?
    pub fn contains(&self, timestamp: u64, client: &str, digest: Hash) -> bool {
        self.seen.get(&timestamp).is_some_and(|entries| {
            entries.iter().any(|(c, d)| c == client && *d == digest)
        })
    }

    /// Record an admission.
    pub fn record(&mut self, timestamp: u64, client: &str, digest: Hash) {
        self.seen.entry(timestamp).or_default().push((client.to_string(), digest));
    }

    /// Erase entries with timestamps strictly below `cutoff`.
    pub fn prune_older_than(&mut self, cutoff: u64) {
        self.seen = self.seen.split_off(&cutoff);
    }

    pub fn len(&self) -> usize {
        self.seen.values().map(|entries| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_admission_of_same_triple_is_caught() {
        let mut recent = RecentRequests::new();
        let digest = Hash::digest(b"r");
        assert!(!recent.contains(1000, "client", digest));
        recent.record(1000, "client", digest);
        assert!(recent.contains(1000, "client", digest));
        // Different client or timestamp: not a duplicate.
        assert!(!recent.contains(1000, "other", digest));
        assert!(!recent.contains(1001, "client", digest));
    }

    #[test]
    fn prune_erases_only_older_entries() {
        let mut recent = RecentRequests::new();
        let digest = Hash::digest(b"r");
        recent.record(500, "a", digest);
        recent.record(1500, "b", digest);
        recent.prune_older_than(1000);
        assert!(!recent.contains(500, "a", digest));
        assert!(recent.contains(1500, "b", digest));
        assert_eq!(recent.len(), 1);
    }
}
