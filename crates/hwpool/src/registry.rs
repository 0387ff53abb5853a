// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Device registry and pool index
//!
//! The [`DeviceRegistry`] reads and writes the records stored in the shared
//! region. Reads take no lock; every write requires the [`LockToken`] of the
//! record (or of the pool, for the index) being written.
//!
//! The [`PoolIndex`] lists, per device class, the module ids that are
//! candidates for allocation. It also carries the identity table used to
//! match physical units across scans and the persisted module id counter.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::vec;

use serde::{Deserialize, Serialize};

use crate::device::{DeviceClass, DeviceRecord, ModuleId, MAX_DEVICE_COUNT};
use crate::lock::{LockKey, LockManager, LockToken};
use crate::region::SharedRegion;
use crate::{Error, Result};

/// Candidate module ids of one class, ascending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassQueue {
    pub class: DeviceClass,
    pub ids: Vec<ModuleId>,
}

/// A physical unit seen by a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub serial: String,
    pub model: String,
    /// Handle the unit was last seen at
    pub handle: String,
    pub module_id: ModuleId,
    /// Classes for which the unit has a record
    pub classes: Vec<DeviceClass>,
    /// Seen by the most recent scan
    pub present: bool,
}

/// Pool-level index of candidate devices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolIndex {
    queues: Vec<ClassQueue>,
    identities: Vec<Identity>,
    next_module_id: ModuleId,
}

impl PoolIndex {
    /// Candidate ids of `class`, ascending
    pub fn ids(&self, class: DeviceClass) -> &[ModuleId] {
        self.queues
            .iter()
            .find(|q| q.class == class)
            .map(|q| q.ids.as_slice())
            .unwrap_or(&[])
    }

    /// Number of candidates of `class`
    pub fn count(&self, class: DeviceClass) -> usize {
        self.ids(class).len()
    }

    /// Number of candidates across every class
    pub fn total(&self) -> usize {
        self.queues.iter().map(|q| q.ids.len()).sum()
    }

    pub fn contains(&self, class: DeviceClass, module_id: ModuleId) -> bool {
        self.ids(class).binary_search(&module_id).is_ok()
    }

    /// Add `module_id` to the candidates of `class`.
    ///
    /// Returns whether the id was newly inserted.
    pub fn insert(&mut self, class: DeviceClass, module_id: ModuleId) -> Result<bool> {
        let pos = match self.queues.binary_search_by(|q| q.class.cmp(&class)) {
            Ok(pos) => pos,
            Err(pos) => {
                self.queues.insert(
                    pos,
                    ClassQueue {
                        class,
                        ids: Vec::new(),
                    },
                );
                pos
            }
        };

        let ids = &mut self.queues[pos].ids;
        match ids.binary_search(&module_id) {
            Ok(_) => Ok(false),
            Err(_) if ids.len() >= MAX_DEVICE_COUNT => Err(Error::Overflow {
                field: "device queue",
                limit: MAX_DEVICE_COUNT,
            }),
            Err(at) => {
                ids.insert(at, module_id);
                Ok(true)
            }
        }
    }

    /// Drop `module_id` from the candidates of `class`.
    pub fn remove(&mut self, class: DeviceClass, module_id: ModuleId) -> bool {
        let Some(queue) = self.queues.iter_mut().find(|q| q.class == class) else {
            return false;
        };
        match queue.ids.binary_search(&module_id) {
            Ok(at) => {
                queue.ids.remove(at);
                true
            }
            Err(_) => false,
        }
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Identity of the unit with this serial and model
    pub fn identity(&self, serial: &str, model: &str) -> Option<&Identity> {
        self.identities
            .iter()
            .find(|i| i.serial == serial && i.model == model)
    }

    pub(crate) fn identity_mut(&mut self, serial: &str, model: &str) -> Option<&mut Identity> {
        self.identities
            .iter_mut()
            .find(|i| i.serial == serial && i.model == model)
    }

    /// Present unit last seen at `handle`
    pub fn identity_by_handle(&self, handle: &str) -> Option<&Identity> {
        self.identities
            .iter()
            .find(|i| i.present && i.handle == handle)
    }

    pub(crate) fn add_identity(&mut self, identity: Identity) {
        self.identities.push(identity);
    }

    pub(crate) fn identities_mut(&mut self) -> impl Iterator<Item = &mut Identity> {
        self.identities.iter_mut()
    }

    /// Number of units seen by the most recent scan
    pub fn present_units(&self) -> usize {
        self.identities.iter().filter(|i| i.present).count()
    }

    /// Next module id that will be assigned
    pub fn next_module_id(&self) -> ModuleId {
        self.next_module_id
    }

    /// Take a fresh module id; ids are never handed out twice.
    pub(crate) fn assign_module_id(&mut self) -> ModuleId {
        let id = self.next_module_id;
        self.next_module_id += 1;
        id
    }
}

/// Records and pool index stored in a shared region
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    region: SharedRegion,
    locks: LockManager,
}

impl DeviceRegistry {
    pub fn new(region: SharedRegion) -> Self {
        let locks = LockManager::new(&region);
        Self { region, locks }
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Current pool index; empty if none has been written yet.
    pub fn pool_index(&self) -> Result<PoolIndex> {
        Ok(self
            .region
            .read(&self.region.pool_path())?
            .unwrap_or_default())
    }

    /// Pool index, rebuilt from the record files if absent or unreadable.
    pub(crate) fn load_or_rebuild_index(&self, pool: &LockToken) -> Result<PoolIndex> {
        check_token(pool, LockKey::Pool)?;
        match self.region.read::<PoolIndex>(&self.region.pool_path()) {
            Ok(Some(index)) => Ok(index),
            Ok(None) => {
                log::debug!("No pool index in {}", self.region.root().display());
                self.rebuild_index()
            }
            Err(Error::Json(err)) => {
                log::warn!("Pool index is corrupt ({}), rebuilding from records", err);
                self.rebuild_index()
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn store_pool_index(&self, pool: &LockToken, index: &PoolIndex) -> Result<()> {
        check_token(pool, LockKey::Pool)?;
        self.region.write(&self.region.pool_path(), index)
    }

    /// Snapshot of a live record.
    ///
    /// Fails with [`Error::NotFound`] if the record does not exist or has been
    /// retired.
    pub fn get(&self, class: DeviceClass, module_id: ModuleId) -> Result<DeviceRecord> {
        match self.get_any(class, module_id)? {
            Some(record) if !record.retired => Ok(record),
            _ => Err(Error::NotFound { class, module_id }),
        }
    }

    /// Snapshot of a record, retired or not.
    pub fn get_any(&self, class: DeviceClass, module_id: ModuleId) -> Result<Option<DeviceRecord>> {
        self.region.read(&self.region.record_path(class, module_id))
    }

    /// Records of every candidate of `class`, read lazily in id order.
    pub fn list(&self, class: DeviceClass) -> Result<Records<'_>> {
        let ids = self.pool_index()?.ids(class).to_vec();
        Ok(Records {
            registry: self,
            class,
            ids: ids.into_iter(),
        })
    }

    /// Every record in the region.
    ///
    /// Without `include_uninitialized` only pool candidates are returned;
    /// with it, retired and firmware-excluded records are included too.
    pub fn list_all(&self, include_uninitialized: bool) -> Result<Vec<DeviceRecord>> {
        let index = self.pool_index()?;
        let mut records = Vec::new();
        for path in self.region.record_paths()? {
            match self.region.read::<DeviceRecord>(&path) {
                Ok(Some(record)) => {
                    if include_uninitialized || index.contains(record.class, record.module_id) {
                        records.push(record);
                    }
                }
                Ok(None) => {}
                Err(err) => log::warn!("Skipping unreadable record {}: {}", path.display(), err),
            }
        }
        records.sort_by_key(|r| (r.class, r.module_id));
        Ok(records)
    }

    /// Apply `mutation` to a live record and persist it.
    ///
    /// `token` must be the lock of that record. Nothing is written if the
    /// mutation fails.
    pub fn update<T, F>(
        &self,
        class: DeviceClass,
        module_id: ModuleId,
        token: &LockToken,
        mutation: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut DeviceRecord) -> Result<T>,
    {
        self.modify(class, module_id, token, |record| {
            if record.retired {
                return Err(Error::NotFound { class, module_id });
            }
            mutation(record)
        })
    }

    /// Like [`update`](Self::update) but also applies to retired records.
    pub(crate) fn modify<T, F>(
        &self,
        class: DeviceClass,
        module_id: ModuleId,
        token: &LockToken,
        mutation: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut DeviceRecord) -> Result<T>,
    {
        check_token(token, LockKey::device(class, module_id))?;
        let path = self.region.record_path(class, module_id);
        let mut record: DeviceRecord = self
            .region
            .read(&path)?
            .ok_or(Error::NotFound { class, module_id })?;

        let value = mutation(&mut record)?;
        self.region.write(&path, &record)?;
        Ok(value)
    }

    /// Write a new or replacement record.
    pub(crate) fn put(&self, token: &LockToken, record: &DeviceRecord) -> Result<()> {
        check_token(token, LockKey::device(record.class, record.module_id))?;
        self.region
            .write(&self.region.record_path(record.class, record.module_id), record)
    }

    /// Reconstruct the pool index from the record files.
    ///
    /// Unreadable records are discarded. The module id counter resumes past
    /// the highest id found, including the ids of discarded records.
    fn rebuild_index(&self) -> Result<PoolIndex> {
        let mut index = PoolIndex::default();
        let mut units: BTreeMap<ModuleId, Identity> = BTreeMap::new();

        for path in self.region.record_paths()? {
            let record: DeviceRecord = match self.region.read(&path) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => {
                    if let Some(module_id) = record_module_id(&path) {
                        index.next_module_id = index.next_module_id.max(module_id + 1);
                    }
                    log::warn!("Discarding corrupt record {}: {}", path.display(), err);
                    fs::remove_file(&path)?;
                    continue;
                }
            };

            index.next_module_id = index.next_module_id.max(record.module_id + 1);
            if !record.retired {
                index.insert(record.class, record.module_id)?;
            }

            let unit = units.entry(record.module_id).or_insert_with(|| Identity {
                serial: record.serial_number.clone(),
                model: record.model_number.clone(),
                handle: record.dev_name.clone(),
                module_id: record.module_id,
                classes: Vec::new(),
                present: false,
            });
            unit.classes.push(record.class);
            unit.present |= !record.retired;
        }

        index.identities = units.into_values().collect();
        log::info!(
            "Rebuilt pool index: {} units, {} candidates",
            index.identities.len(),
            index.total()
        );
        Ok(index)
    }
}

/// Module id encoded in a `<class>-<id>.json` record file name
fn record_module_id(path: &Path) -> Option<ModuleId> {
    let stem = path.file_stem()?.to_str()?;
    let (_, id) = stem.rsplit_once('-')?;
    id.parse().ok()
}

fn check_token(token: &LockToken, expected: LockKey) -> Result<()> {
    if token.key() != expected {
        return Err(Error::InvalidArgument(format!(
            "lock {} does not guard {}",
            token.key(),
            expected
        )));
    }
    Ok(())
}

/// Lazy, single-pass sequence of record snapshots
///
/// Records retired after the index was read are skipped. Call
/// [`DeviceRegistry::list`] again for a fresh pass.
pub struct Records<'a> {
    registry: &'a DeviceRegistry,
    class: DeviceClass,
    ids: vec::IntoIter<ModuleId>,
}

impl Iterator for Records<'_> {
    type Item = Result<DeviceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let module_id = self.ids.next()?;
            match self.registry.get(self.class, module_id) {
                Err(Error::NotFound { .. }) => continue,
                other => return Some(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::record;
    use std::time::Duration;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> DeviceRegistry {
        DeviceRegistry::new(SharedRegion::open(dir.path()).unwrap())
    }

    fn put(registry: &DeviceRegistry, record: &DeviceRecord) {
        let token = registry
            .locks()
            .acquire(
                LockKey::device(record.class, record.module_id),
                Duration::ZERO,
            )
            .unwrap();
        registry.put(&token, record).unwrap();
    }

    #[test]
    fn test_pool_index_insert_sorted() {
        let mut index = PoolIndex::default();
        assert!(index.insert(DeviceClass::Encoder, 4).unwrap());
        assert!(index.insert(DeviceClass::Encoder, 1).unwrap());
        assert!(!index.insert(DeviceClass::Encoder, 4).unwrap());
        assert!(index.insert(DeviceClass::Decoder, 2).unwrap());

        assert_eq!(index.ids(DeviceClass::Encoder), &[1, 4]);
        assert_eq!(index.count(DeviceClass::Decoder), 1);
        assert_eq!(index.count(DeviceClass::Ai), 0);
        assert_eq!(index.total(), 3);

        assert!(index.remove(DeviceClass::Encoder, 1));
        assert!(!index.remove(DeviceClass::Encoder, 1));
        assert!(!index.contains(DeviceClass::Encoder, 1));
    }

    #[test]
    fn test_pool_index_capacity() {
        let mut index = PoolIndex::default();
        for id in 0..MAX_DEVICE_COUNT as ModuleId {
            index.insert(DeviceClass::Decoder, id).unwrap();
        }
        assert!(matches!(
            index.insert(DeviceClass::Decoder, MAX_DEVICE_COUNT as ModuleId),
            Err(Error::Overflow { .. })
        ));
    }

    #[test]
    fn test_module_ids_monotonic() {
        let mut index = PoolIndex::default();
        assert_eq!(index.assign_module_id(), 0);
        assert_eq!(index.assign_module_id(), 1);
        assert_eq!(index.next_module_id(), 2);
    }

    #[test]
    fn test_get_hides_retired() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let mut rec = record(DeviceClass::Encoder, 0, 4);
        rec.retired = true;
        put(&registry, &rec);

        assert!(matches!(
            registry.get(DeviceClass::Encoder, 0),
            Err(Error::NotFound { .. })
        ));
        assert!(registry.get_any(DeviceClass::Encoder, 0).unwrap().is_some());
        assert!(matches!(
            registry.get(DeviceClass::Encoder, 9),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_requires_matching_token() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        put(&registry, &record(DeviceClass::Encoder, 0, 4));
        put(&registry, &record(DeviceClass::Encoder, 1, 4));

        let wrong = registry
            .locks()
            .acquire(LockKey::device(DeviceClass::Encoder, 1), Duration::ZERO)
            .unwrap();
        let result = registry.update(DeviceClass::Encoder, 0, &wrong, |r| {
            r.model_load = 99;
            Ok(())
        });
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(registry.get(DeviceClass::Encoder, 0).unwrap().model_load, 0);
    }

    #[test]
    fn test_failed_mutation_not_persisted() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        put(&registry, &record(DeviceClass::Encoder, 0, 4));

        let token = registry
            .locks()
            .acquire(LockKey::device(DeviceClass::Encoder, 0), Duration::ZERO)
            .unwrap();
        let result: Result<()> = registry.update(DeviceClass::Encoder, 0, &token, |r| {
            r.model_load = 50;
            Err(Error::Cancelled)
        });
        assert!(result.is_err());
        assert_eq!(registry.get(DeviceClass::Encoder, 0).unwrap().model_load, 0);
    }

    #[test]
    fn test_list_follows_index() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        for id in 0..3 {
            put(&registry, &record(DeviceClass::Decoder, id, 4));
        }

        let pool = registry.locks().acquire(LockKey::Pool, Duration::ZERO).unwrap();
        let mut index = PoolIndex::default();
        index.insert(DeviceClass::Decoder, 2).unwrap();
        index.insert(DeviceClass::Decoder, 0).unwrap();
        registry.store_pool_index(&pool, &index).unwrap();

        let ids: Vec<ModuleId> = registry
            .list(DeviceClass::Decoder)
            .unwrap()
            .map(|r| r.unwrap().module_id)
            .collect();
        assert_eq!(ids, vec![0, 2]);
        assert_eq!(registry.list_all(false).unwrap().len(), 2);
        assert_eq!(registry.list_all(true).unwrap().len(), 3);
    }

    #[test]
    fn test_rebuild_from_records() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        put(&registry, &record(DeviceClass::Decoder, 3, 4));
        put(&registry, &record(DeviceClass::Encoder, 3, 4));
        let mut gone = record(DeviceClass::Encoder, 5, 4);
        gone.retired = true;
        put(&registry, &gone);
        fs::write(registry.region().pool_path(), b"garbage").unwrap();
        fs::write(
            registry.region().record_path(DeviceClass::Ai, 1),
            b"{\"truncated\":",
        )
        .unwrap();
        fs::write(registry.region().record_path(DeviceClass::Encoder, 7), b"").unwrap();

        let pool = registry.locks().acquire(LockKey::Pool, Duration::ZERO).unwrap();
        let index = registry.load_or_rebuild_index(&pool).unwrap();
        assert_eq!(index.ids(DeviceClass::Decoder), &[3]);
        assert_eq!(index.ids(DeviceClass::Encoder), &[3]);
        // encoder-7 was discarded but its id stays taken.
        assert_eq!(index.next_module_id(), 8);
        assert_eq!(index.identities().len(), 2);
        assert_eq!(index.present_units(), 1);
        assert!(!registry.region().record_path(DeviceClass::Ai, 1).exists());
        assert!(!registry.region().record_path(DeviceClass::Encoder, 7).exists());
    }
}
