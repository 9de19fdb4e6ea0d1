//! In-memory namespaced key-value storage.

use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Keys longer than this are rejected.
pub const MAX_KEY_SIZE: usize = 1024;

/// Values larger than this are rejected.
pub const MAX_VALUE_SIZE: usize = 256 * 1024;

/// Outcome of a storage operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageResult {
    Ok,
    Exists,
    NotFound,
    DbNotFound,
    KeyTooLarge,
    ValueTooLarge,
}

/// Databases are plain sorted maps so that serialization (and therefore
/// the state hash) is identical on every replica.
type Database = BTreeMap<String, Vec<u8>>;

/// Multi-reader, single-writer in-memory store of namespaced databases.
#[derive(Debug, Default)]
pub struct MemStorage {
    databases: RwLock<BTreeMap<String, Database>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_db(&self, db: &str) -> StorageResult {
        let mut databases = self.databases.write();
        if databases.contains_key(db) {
            return StorageResult::Exists;
        }
        databases.insert(db.to_string(), Database::new());
        StorageResult::Ok
    }

    pub fn delete_db(&self, db: &str) -> StorageResult {
        if self.databases.write().remove(db).is_none() {
            return StorageResult::DbNotFound;
        }
        StorageResult::Ok
    }

    pub fn has_db(&self, db: &str) -> bool {
        self.databases.read().contains_key(db)
    }

    pub fn create(&self, db: &str, key: &str, value: &[u8]) -> StorageResult {
        if key.len() > MAX_KEY_SIZE {
            return StorageResult::KeyTooLarge;
        }
        if value.len() > MAX_VALUE_SIZE {
            return StorageResult::ValueTooLarge;
        }
        let mut databases = self.databases.write();
        let Some(database) = databases.get_mut(db) else {
            return StorageResult::DbNotFound;
        };
        if database.contains_key(key) {
            return StorageResult::Exists;
        }
        database.insert(key.to_string(), value.to_vec());
        StorageResult::Ok
    }

    pub fn read(&self, db: &str, key: &str) -> Option<Vec<u8>> {
        self.databases.read().get(db)?.get(key).cloned()
    }

    pub fn update(&self, db: &str, key: &str, value: &[u8]) -> StorageResult {
        if key.len() > MAX_KEY_SIZE {
            return StorageResult::KeyTooLarge;
        }
        if value.len() > MAX_VALUE_SIZE {
            return StorageResult::ValueTooLarge;
        }
        let mut databases = self.databases.write();
        let Some(database) = databases.get_mut(db) else {
            return StorageResult::DbNotFound;
        };
        let Some(slot) = database.get_mut(key) else {
            return StorageResult::NotFound;
        };
        *slot = value.to_vec();
        StorageResult::Ok
    }

    pub fn remove(&self, db: &str, key: &str) -> StorageResult {
        let mut databases = self.databases.write();
        let Some(database) = databases.get_mut(db) else {
            return StorageResult::DbNotFound;
        };
        if database.remove(key).is_none() {
            return StorageResult::NotFound;
        }
        StorageResult::Ok
    }

    pub fn has(&self, db: &str, key: &str) -> Option<bool> {
        Some(self.databases.read().get(db)?.contains_key(key))
    }

    pub fn get_keys(&self, db: &str) -> Option<Vec<String>> {
        Some(self.databases.read().get(db)?.keys().cloned().collect())
    }

    /// (key count, total value bytes).
    pub fn get_size(&self, db: &str) -> Option<(usize, usize)> {
        let databases = self.databases.read();
        let database = databases.get(db)?;
        let bytes = database.values().map(|v| v.len()).sum();
        Some((database.len(), bytes))
    }

    /// Canonical serialization of the full store, for state hashing and
    /// snapshot transfer.
    pub fn serialize(&self) -> Vec<u8> {
        serde_json::to_vec(&*self.databases.read()).expect("storage serialization cannot fail")
    }

    /// Replace the full store contents from a canonical serialization.
    pub fn deserialize_into(&self, data: &[u8]) -> bool {
        match serde_json::from_slice::<BTreeMap<String, Database>>(data) {
            Ok(databases) => {
                *self.databases.write() = databases;
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with_db() -> MemStorage {
        let storage = MemStorage::new();
        assert_eq!(storage.create_db("db"), StorageResult::Ok);
        storage
    }

    #[test]
    fn create_read_update_delete() {
        let storage = storage_with_db();
        assert_eq!(storage.create("db", "k", b"v1"), StorageResult::Ok);
        assert_eq!(storage.create("db", "k", b"v1"), StorageResult::Exists);
        assert_eq!(storage.read("db", "k"), Some(b"v1".to_vec()));
        assert_eq!(storage.update("db", "k", b"v2"), StorageResult::Ok);
        assert_eq!(storage.read("db", "k"), Some(b"v2".to_vec()));
        assert_eq!(storage.remove("db", "k"), StorageResult::Ok);
        assert_eq!(storage.remove("db", "k"), StorageResult::NotFound);
        assert_eq!(storage.read("db", "k"), None);
    }

    #[test]
    fn missing_database_is_reported() {
        let storage = MemStorage::new();
        assert_eq!(storage.create("nope", "k", b"v"), StorageResult::DbNotFound);
        assert_eq!(storage.update("nope", "k", b"v"), StorageResult::DbNotFound);
        assert_eq!(storage.remove("nope", "k"), StorageResult::DbNotFound);
        assert_eq!(storage.has("nope", "k"), None);
        assert_eq!(storage.delete_db("nope"), StorageResult::DbNotFound);
    }

    #[test]
    fn size_limits_are_enforced() {
        let storage = storage_with_db();
        let long_key = "k".repeat(MAX_KEY_SIZE + 1);
        let big_value = vec![0u8; MAX_VALUE_SIZE + 1];
        assert_eq!(storage.create("db", &long_key, b"v"), StorageResult::KeyTooLarge);
        assert_eq!(storage.create("db", "k", &big_value), StorageResult::ValueTooLarge);
        assert_eq!(storage.update("db", "k", &big_value), StorageResult::ValueTooLarge);
    }

    #[test]
    fn keys_and_size_reflect_contents() {
        let storage = storage_with_db();
        storage.create("db", "b", b"22");
        storage.create("db", "a", b"1");
        assert_eq!(storage.get_keys("db").unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(storage.get_size("db").unwrap(), (2, 3));
    }

    #[test]
    fn serialization_round_trips_and_is_canonical() {
        let a = storage_with_db();
        a.create("db", "x", b"1");
        a.create("db", "y", b"2");

        let b = MemStorage::new();
        b.create_db("db");
        b.create("db", "y", b"2");
        b.create("db", "x", b"1");

        // Same contents, same bytes, regardless of insertion order.
        assert_eq!(a.serialize(), b.serialize());

        let c = MemStorage::new();
        assert!(c.deserialize_into(&a.serialize()));
        assert_eq!(c.serialize(), a.serialize());
        assert!(!c.deserialize_into(b"not json"));
    }
}
