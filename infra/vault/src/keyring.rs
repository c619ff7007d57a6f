use crate::records::{DerivedKeyRecord, KeyHistoryEntry};
use crate::types::{HISTORY_CAPACITY, KeyPurpose};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Slots {
    active: FxHashMap<KeyPurpose, Arc<DerivedKeyRecord>>,
    history: FxHashMap<KeyPurpose, VecDeque<KeyHistoryEntry>>,
}

/// The active derived key per purpose plus a bounded history of superseded keys.
///
/// Records are never mutated. Readers clone the current `Arc` once per operation and
/// rotation swaps it, so a concurrent reader sees the whole old record or the whole
/// new one. The lock is held only for the pointer swap.
#[derive(Debug, Default)]
pub struct Keyring {
    slots: RwLock<Slots>,
}

impl Keyring {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self, purpose: KeyPurpose) -> Option<Arc<DerivedKeyRecord>> {
        self.slots.read().active.get(&purpose).cloned()
    }

    /// Installs `record` as the active key without touching history.
    pub fn install(&self, record: DerivedKeyRecord) {
        let mut slots = self.slots.write();
        slots.active.insert(record.purpose(), Arc::new(record));
    }

    /// Swaps in `record` and moves the key it replaces into history.
    ///
    /// History keeps the newest [`HISTORY_CAPACITY`] entries per purpose.
    pub fn rotate(&self, record: DerivedKeyRecord) {
        let purpose = record.purpose();
        let mut slots = self.slots.write();
        let previous = slots.active.insert(purpose, Arc::new(record));

        if let Some(previous) = previous {
            let history = slots.history.entry(purpose).or_default();
            history.push_back(KeyHistoryEntry::new(previous));
            while history.len() > HISTORY_CAPACITY {
                history.pop_front();
            }
        }
    }

    /// Superseded keys for `purpose`, oldest first.
    #[must_use]
    pub fn history(&self, purpose: KeyPurpose) -> Vec<KeyHistoryEntry> {
        self.slots
            .read()
            .history
            .get(&purpose)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Loaded purposes in rotation order.
    #[must_use]
    pub fn purposes(&self) -> Vec<KeyPurpose> {
        let slots = self.slots.read();
        KeyPurpose::ALL.into_iter().filter(|p| slots.active.contains_key(p)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().active.len()
    }

    /// `true` when every loaded record still matches its checksum.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.slots.read().active.values().all(|record| record.verify())
    }

    /// Drops all active keys and history.
    pub fn clear(&self) {
        let mut slots = self.slots.write();
        slots.active.clear();
        slots.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::KeyMaterial;
    use crate::types::{KEY_LEN, SALT_LEN};

    fn record(purpose: KeyPurpose, byte: u8) -> DerivedKeyRecord {
        DerivedKeyRecord::new(KeyMaterial::new([byte; KEY_LEN]), [byte; SALT_LEN], purpose)
    }

    #[test]
    fn install_makes_key_current() {
        let ring = Keyring::new();
        ring.install(record(KeyPurpose::Data, 1));

        assert_eq!(ring.current(KeyPurpose::Data).unwrap().salt(), &[1u8; SALT_LEN]);
        assert!(ring.current(KeyPurpose::Session).is_none());
        assert_eq!(ring.purposes(), vec![KeyPurpose::Data]);
    }

    #[test]
    fn six_rotations_keep_five_newest_entries() {
        let ring = Keyring::new();
        ring.install(record(KeyPurpose::Data, 0));
        for byte in 1..=6 {
            ring.rotate(record(KeyPurpose::Data, byte));
        }

        let history = ring.history(KeyPurpose::Data);
        assert_eq!(history.len(), 5);
        // Key 0 was evicted; keys 1..=5 remain oldest-first, key 6 is active.
        let salts: Vec<u8> = history.iter().map(|e| e.record().salt()[0]).collect();
        assert_eq!(salts, vec![1, 2, 3, 4, 5]);
        assert_eq!(ring.current(KeyPurpose::Data).unwrap().salt()[0], 6);
    }

    #[test]
    fn reader_keeps_its_snapshot_across_rotation() {
        let ring = Keyring::new();
        ring.install(record(KeyPurpose::Storage, 1));
        let held = ring.current(KeyPurpose::Storage).unwrap();

        ring.rotate(record(KeyPurpose::Storage, 2));

        assert_eq!(held.salt()[0], 1);
        assert!(held.verify());
        assert_eq!(ring.current(KeyPurpose::Storage).unwrap().salt()[0], 2);
    }

    #[test]
    fn clear_discards_everything() {
        let ring = Keyring::new();
        for purpose in KeyPurpose::ALL {
            ring.install(record(purpose, 1));
            ring.rotate(record(purpose, 2));
        }
        assert_eq!(ring.len(), 4);
        assert!(ring.verify());

        ring.clear();
        assert_eq!(ring.len(), 0);
        assert!(ring.history(KeyPurpose::Data).is_empty());
    }
}
