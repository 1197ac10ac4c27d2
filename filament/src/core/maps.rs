//! User-space shadowed kernel tables.
//!
//! BPF hash maps offer no cheap "do I own this key" query from user space,
//! so every map we populate is paired with a shadow key set. The shadow is
//! only extended after a successful kernel write, and removals that the
//! shadow does not know about are skipped entirely.

use std::collections::HashSet;
use std::hash::Hash;

use log::warn;
use plain::Plain;

use crate::core::probe::ProbeError;

/// Minimal writable view of a kernel hash table. [`crate::core::probe::tracer`]
/// implements this over libbpf map handles; tests substitute in-memory fakes.
pub(crate) trait RawTable {
    fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), String>;
    fn delete(&mut self, key: &[u8]) -> Result<(), String>;
}

pub(crate) struct ShadowedMap<K> {
    name: &'static str,
    table: Box<dyn RawTable + Send>,
    shadow: HashSet<K>,
}

impl<K: Plain + Copy + Eq + Hash> ShadowedMap<K> {
    pub(crate) fn new(name: &'static str, table: Box<dyn RawTable + Send>) -> ShadowedMap<K> {
        ShadowedMap {
            name,
            table,
            shadow: HashSet::new(),
        }
    }

    /// Write `value` under `key`. The shadow records the key only once the
    /// kernel accepted it.
    pub(crate) fn update<V: Plain>(&mut self, key: K, value: &V) -> Result<(), ProbeError> {
        // Sound: K and V are Plain, so viewing them as bytes is well defined.
        let (key_bytes, value_bytes) =
            unsafe { (plain::as_bytes(&key), plain::as_bytes(value)) };
        self.table
            .update(key_bytes, value_bytes)
            .map_err(|reason| ProbeError::KernelTableWriteFailed {
                map: self.name,
                reason,
            })?;
        self.shadow.insert(key);
        Ok(())
    }

    /// Remove `key` if this map ever wrote it. The shadow entry is dropped
    /// whether or not the kernel delete succeeds, so a key never gets
    /// deleted twice.
    pub(crate) fn remove(&mut self, key: &K) {
        if !self.shadow.remove(key) {
            return;
        }
        let key_bytes = unsafe { plain::as_bytes(key) };
        if let Err(e) = self.table.delete(key_bytes) {
            warn!("Failed to delete key from {}: {e}", self.name);
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &K) -> bool {
        self.shadow.contains(key)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;

    /// In-memory stand-in shared by map and manager tests.
    #[derive(Default)]
    pub(crate) struct FakeTable {
        pub(crate) entries: HashMap<Vec<u8>, Vec<u8>>,
        pub(crate) deletes: Vec<Vec<u8>>,
        pub(crate) fail_updates: bool,
    }

    impl RawTable for FakeTable {
        fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), String> {
            if self.fail_updates {
                return Err("E2BIG".to_string());
            }
            self.entries.insert(key.to_vec(), value.to_vec());
            Ok(())
        }

        fn delete(&mut self, key: &[u8]) -> Result<(), String> {
            self.deletes.push(key.to_vec());
            self.entries
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| "ENOENT".to_string())
        }
    }

    #[test]
    fn shadow_tracks_successful_updates_only() {
        let mut map: ShadowedMap<u32> = ShadowedMap::new("test_map", Box::<FakeTable>::default());
        map.update(42u32, &7u64).unwrap();
        assert!(map.contains(&42));

        let mut failing: ShadowedMap<u32> = ShadowedMap::new(
            "test_map",
            Box::new(FakeTable {
                fail_updates: true,
                ..Default::default()
            }),
        );
        let err = failing.update(42u32, &7u64).unwrap_err();
        assert_eq!(err.status(), "kernel-table-write-failed");
        assert!(!failing.contains(&42));
    }

    #[test]
    fn remove_skips_unshadowed_keys() {
        let table = Box::<FakeTable>::default();
        let mut map: ShadowedMap<u32> = ShadowedMap::new("test_map", table);

        // Never written: no kernel delete issued.
        map.remove(&1);

        map.update(1u32, &0u64).unwrap();
        map.remove(&1);
        assert!(!map.contains(&1));

        // Second remove is a no-op.
        map.remove(&1);
    }
}
