//! The store of known membership configurations.

use quorumkv_types::{Configuration, Hash};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Ordered collection of known configurations.
///
/// Each entry carries an enabled flag; exactly one configuration is
/// current. A configuration enters the store disabled, is enabled when
/// the NEW-CONFIG request carrying it prepares (making it acceptable
/// under view changes), and becomes current when that request commits.
#[derive(Debug, Default)]
pub struct ConfigStore {
    /// index → (configuration, enabled).
    configs: BTreeMap<u64, (Arc<Configuration>, bool)>,
    current_index: u64,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration (disabled). Returns false if its index is
    /// already present.
    pub fn add(&mut self, config: Arc<Configuration>) -> bool {
        let index = config.index();
        if self.configs.contains_key(&index) {
            return false;
        }
        self.configs.insert(index, (config, false));
        true
    }

    pub fn get(&self, hash: &Hash) -> Option<Arc<Configuration>> {
        self.configs
            .values()
            .find(|(config, _)| config.hash() == *hash)
            .map(|(config, _)| config.clone())
    }

    /// Make the configuration with this hash current. Fails if absent.
    pub fn set_current(&mut self, hash: &Hash) -> bool {
        match self.get(hash) {
            Some(config) => {
                self.current_index = config.index();
                true
            }
            None => false,
        }
    }

    /// Make the configuration at this index current. Fails if absent.
    pub fn set_current_index(&mut self, index: u64) -> bool {
        if self.configs.contains_key(&index) {
            self.current_index = index;
            true
        } else {
            false
        }
    }

    pub fn current(&self) -> Option<Arc<Configuration>> {
        self.configs.get(&self.current_index).map(|(config, _)| config.clone())
    }

    /// Flip the enabled flag on the configuration with this hash.
    pub fn enable(&mut self, hash: &Hash, enabled: bool) -> bool {
        for (config, flag) in self.configs.values_mut() {
            if config.hash() == *hash {
                *flag = enabled;
                return true;
            }
        }
        false
    }

    pub fn is_enabled(&self, hash: &Hash) -> bool {
        self.configs
            .values()
            .find(|(config, _)| config.hash() == *hash)
            .is_some_and(|(_, enabled)| *enabled)
    }

    /// Drop every configuration with index strictly below `index`.
    pub fn remove_prior_to(&mut self, index: u64) -> bool {
        if !self.configs.contains_key(&index) {
            return false;
        }
        self.configs.retain(|&i, _| i >= index);
        true
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorumkv_types::PeerAddress;

    fn config(n: u16) -> Arc<Configuration> {
        let mut config = Configuration::new();
        for i in 0..n {
            config.add_peer(PeerAddress::new(
                format!("host{i}"),
                8000 + i,
                9000 + i,
                format!("name{i}"),
                format!("uuid{i}"),
            ));
        }
        Arc::new(config)
    }

    #[test]
    fn configurations_enter_disabled() {
        let mut store = ConfigStore::new();
        let c = config(3);
        assert!(store.add(c.clone()));
        assert!(!store.is_enabled(&c.hash()));
        assert!(store.enable(&c.hash(), true));
        assert!(store.is_enabled(&c.hash()));
    }

    #[test]
    fn set_current_fails_for_unknown_hash() {
        let mut store = ConfigStore::new();
        let known = config(3);
        store.add(known.clone());
        assert!(!store.set_current(&Hash::digest(b"unknown")));
        assert!(store.set_current(&known.hash()));
        assert_eq!(store.current().unwrap().hash(), known.hash());
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let mut store = ConfigStore::new();
        let c = config(3);
        assert!(store.add(c.clone()));
        assert!(!store.add(c));
    }

    #[test]
    fn remove_prior_to_drops_older_entries() {
        let mut store = ConfigStore::new();
        let a = config(3);
        let b = Arc::new(a.fork());
        let c = Arc::new(b.fork());
        store.add(a.clone());
        store.add(b.clone());
        store.add(c.clone());

        assert!(store.remove_prior_to(b.index()));
        assert_eq!(store.len(), 2);
        assert!(store.get(&a.hash()).is_some()); // b and c share a's peers...
        assert!(!store.remove_prior_to(999_999));
    }

    #[test]
    fn remove_prior_to_distinguishes_entries_by_index() {
        let mut store = ConfigStore::new();
        let mut base = Configuration::new();
        base.add_peer(PeerAddress::new("h1", 1, 2, "n1", "u1"));
        let mut next = base.fork();
        next.add_peer(PeerAddress::new("h2", 3, 4, "n2", "u2"));
        let (base, next) = (Arc::new(base), Arc::new(next));
        store.add(base.clone());
        store.add(next.clone());
        store.set_current(&next.hash());
        store.remove_prior_to(next.index());

        assert_eq!(store.len(), 1);
        assert!(store.get(&base.hash()).is_none());
        assert_eq!(store.current().unwrap().hash(), next.hash());
    }
}
