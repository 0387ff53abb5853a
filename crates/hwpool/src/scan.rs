// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Registry reconciliation against present hardware
//!
//! A scan runs under the pool lock:
//!
//! 1. List the handles of physically present devices.
//! 2. Read identity, firmware and capabilities of each one.
//! 3. Match each unit to an existing identity by serial and model, reusing
//!    its module id, or assign a fresh id.
//! 4. Create or update one record per function under that record's lock.
//! 5. Retire records of units that are no longer present.
//! 6. When firmware matching is required, keep units with no compatibility
//!    out of the candidate queues while still recording them.
//!
//! Per-device problems (transport errors, duplicate identities, lock
//! timeouts) are counted in the [`ScanReport`] and never abort the scan.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;

use crate::device::{check_len, DeviceClass, DeviceRecord, ModuleId, DEVICE_NAME_LEN};
use crate::firmware::{Compatibility, FirmwareTable};
use crate::hardware::{DeviceInfo, Function, Hardware};
use crate::lock::{LockKey, LockToken};
use crate::registry::{DeviceRegistry, Identity, PoolIndex};
use crate::{Error, Result};

/// Outcome of a scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Physical units known and present after the scan
    pub known: usize,
    /// Records created
    pub added: usize,
    /// Records refreshed in place
    pub updated: usize,
    /// Records retired
    pub retired: usize,
    /// Handles whose identity could not be read
    pub transport_errors: Vec<String>,
    /// Handles skipped because another handle reported the same identity
    pub duplicates: Vec<String>,
    /// Handles kept out of the pool for unsupported firmware
    pub incompatible: Vec<String>,
    /// Records skipped because their lock could not be taken
    pub lock_timeouts: usize,
}

impl ScanReport {
    /// Number of devices skipped for any reason
    pub fn skipped(&self) -> usize {
        self.transport_errors.len() + self.duplicates.len() + self.lock_timeouts
    }
}

/// Reconciles the registry with the hardware
pub struct ScanService<'a> {
    registry: &'a DeviceRegistry,
    hardware: &'a dyn Hardware,
    firmware: &'a FirmwareTable,
    lock_timeout: Duration,
}

impl<'a> ScanService<'a> {
    pub fn new(
        registry: &'a DeviceRegistry,
        hardware: &'a dyn Hardware,
        firmware: &'a FirmwareTable,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            hardware,
            firmware,
            lock_timeout,
        }
    }

    /// Rescan every present device.
    ///
    /// Fails only if enumeration itself fails or the pool lock or region
    /// cannot be used.
    pub fn refresh(&self, require_fw_match: bool) -> Result<ScanReport> {
        let pool = self
            .registry
            .locks()
            .acquire(LockKey::Pool, self.lock_timeout)?;
        let mut index = self.registry.load_or_rebuild_index(&pool)?;
        let mut report = ScanReport::default();

        let handles = self.hardware.enumerate()?;
        log::debug!("Enumerated {} device handles", handles.len());

        let mut seen = HashSet::new();
        for handle in &handles {
            if let Err(err) =
                self.admit(&mut index, handle, require_fw_match, &mut seen, &mut report)
            {
                if !err.is_recoverable() {
                    return Err(err);
                }
            }
        }

        let absent: Vec<ModuleId> = index
            .identities()
            .iter()
            .filter(|unit| unit.present && !seen.contains(&unit.module_id))
            .map(|unit| unit.module_id)
            .collect();
        for module_id in absent {
            self.retire_unit(&mut index, module_id, &mut report)?;
        }

        report.known = index.present_units();
        self.registry.store_pool_index(&pool, &index)?;
        self.registry.locks().release(pool);

        log::info!(
            "Scan complete: {} known, {} added, {} updated, {} retired, {} skipped",
            report.known,
            report.added,
            report.updated,
            report.retired,
            report.skipped()
        );
        Ok(report)
    }

    /// Admit the single device at `handle` without touching other units.
    pub fn add_device(&self, handle: &str, require_fw_match: bool) -> Result<ScanReport> {
        let pool = self
            .registry
            .locks()
            .acquire(LockKey::Pool, self.lock_timeout)?;
        let mut index = self.registry.load_or_rebuild_index(&pool)?;
        let mut report = ScanReport::default();

        // Every other present unit counts as already seen for duplicate
        // detection.
        let mut seen: HashSet<ModuleId> = index
            .identities()
            .iter()
            .filter(|unit| unit.present && unit.handle != handle)
            .map(|unit| unit.module_id)
            .collect();

        self.admit(&mut index, handle, require_fw_match, &mut seen, &mut report)?;

        report.known = index.present_units();
        self.registry.store_pool_index(&pool, &index)?;
        self.registry.locks().release(pool);
        Ok(report)
    }

    /// Retire the unit last seen at `handle`.
    ///
    /// Returns the number of records retired.
    pub fn remove_device(&self, handle: &str) -> Result<usize> {
        let pool = self
            .registry
            .locks()
            .acquire(LockKey::Pool, self.lock_timeout)?;
        let mut index = self.registry.load_or_rebuild_index(&pool)?;

        let module_id = index
            .identity_by_handle(handle)
            .map(|unit| unit.module_id)
            .ok_or_else(|| Error::UnknownHandle(handle.to_string()))?;

        let mut report = ScanReport::default();
        self.retire_unit(&mut index, module_id, &mut report)?;
        self.registry.store_pool_index(&pool, &index)?;
        self.registry.locks().release(pool);

        log::info!("Removed {} (module {})", handle, module_id);
        Ok(report.retired)
    }

    fn admit(
        &self,
        index: &mut PoolIndex,
        handle: &str,
        require_fw_match: bool,
        seen: &mut HashSet<ModuleId>,
        report: &mut ScanReport,
    ) -> Result<()> {
        let info = match check_len("dev_name", handle, DEVICE_NAME_LEN)
            .and_then(|()| self.hardware.read_info(handle))
            .and_then(|info| info.validate().map(|()| info))
        {
            Ok(info) => info,
            Err(err) => {
                log::warn!("Skipping {}: {}", handle, err);
                report.transport_errors.push(handle.to_string());
                return Err(match err {
                    err @ Error::Transport { .. } => err,
                    other => Error::Transport {
                        handle: handle.to_string(),
                        reason: other.to_string(),
                    },
                });
            }
        };

        if let Some(unit) = index.identity(&info.serial, &info.model) {
            if seen.contains(&unit.module_id) {
                let err = Error::DuplicateDevice {
                    handle: handle.to_string(),
                    serial: info.serial.clone(),
                    model: info.model.clone(),
                };
                log::warn!("Skipping {}", err);
                report.duplicates.push(handle.to_string());
                return Err(err);
            }
        }

        let compatibility = self.firmware.check(&info.firmware);
        let admitted = !require_fw_match || compatibility != Compatibility::None;
        if !admitted {
            log::warn!(
                "{}",
                Error::IncompatibleFirmware {
                    handle: handle.to_string(),
                    revision: info.firmware.to_string(),
                }
            );
            report.incompatible.push(handle.to_string());
        }

        let module_id = match index.identity(&info.serial, &info.model) {
            Some(unit) => unit.module_id,
            None => {
                let module_id = index.assign_module_id();
                index.add_identity(Identity {
                    serial: info.serial.clone(),
                    model: info.model.clone(),
                    handle: handle.to_string(),
                    module_id,
                    classes: Vec::new(),
                    present: true,
                });
                log::info!(
                    "New device {} (serial {}, model {}) assigned module {}",
                    handle,
                    info.serial,
                    info.model,
                    module_id
                );
                module_id
            }
        };
        seen.insert(module_id);

        let previous: Vec<DeviceClass> = index
            .identity(&info.serial, &info.model)
            .map(|unit| unit.classes.clone())
            .unwrap_or_default();
        let mut classes = Vec::new();

        for function in &info.functions {
            let class = function.class;
            let token = match self.lock_record(class, module_id, report) {
                Some(token) => token,
                None => continue,
            };

            let existing = match self.registry.get_any(class, module_id) {
                Ok(existing) => existing,
                Err(Error::Json(err)) => {
                    log::warn!("Replacing corrupt record {} {}: {}", class, module_id, err);
                    None
                }
                Err(err) => return Err(err),
            };
            let record = build_record(
                existing.as_ref(),
                handle,
                &info,
                function,
                module_id,
                compatibility,
            );
            self.registry.put(&token, &record)?;
            self.registry.locks().release(token);

            if existing.is_some() {
                report.updated += 1;
            } else {
                report.added += 1;
            }

            if admitted {
                index.insert(class, module_id)?;
            } else {
                index.remove(class, module_id);
            }
            classes.push(class);
        }

        // Functions the unit stopped reporting are retired on their own.
        for class in previous.iter().filter(|c| !classes.contains(c)) {
            if self.retire_record(*class, module_id, report)? {
                index.remove(*class, module_id);
            }
        }

        if let Some(unit) = index.identity_mut(&info.serial, &info.model) {
            unit.handle = handle.to_string();
            unit.present = true;
            for class in previous {
                if !classes.contains(&class) {
                    classes.push(class);
                }
            }
            classes.sort();
            unit.classes = classes;
        }
        Ok(())
    }

    fn retire_unit(
        &self,
        index: &mut PoolIndex,
        module_id: ModuleId,
        report: &mut ScanReport,
    ) -> Result<()> {
        let Some(unit) = index.identities_mut().find(|u| u.module_id == module_id) else {
            return Ok(());
        };
        unit.present = false;
        let classes = unit.classes.clone();
        log::info!("Device {} (module {}) is gone", unit.handle, module_id);

        for class in classes {
            index.remove(class, module_id);
            self.retire_record(class, module_id, report)?;
        }
        Ok(())
    }

    /// Mark one record retired; returns whether it was changed.
    fn retire_record(
        &self,
        class: DeviceClass,
        module_id: ModuleId,
        report: &mut ScanReport,
    ) -> Result<bool> {
        let Some(token) = self.lock_record(class, module_id, report) else {
            return Ok(false);
        };
        let changed = self.registry.modify(class, module_id, &token, |record| {
            let changed = !record.retired;
            record.retired = true;
            Ok(changed)
        });
        self.registry.locks().release(token);

        match changed {
            Ok(true) => {
                report.retired += 1;
                Ok(true)
            }
            Ok(false) | Err(Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn lock_record(
        &self,
        class: DeviceClass,
        module_id: ModuleId,
        report: &mut ScanReport,
    ) -> Option<LockToken> {
        match self
            .registry
            .locks()
            .acquire(LockKey::device(class, module_id), self.lock_timeout)
        {
            Ok(token) => Some(token),
            Err(err) => {
                log::warn!("Skipping {} {}: {}", class, module_id, err);
                report.lock_timeouts += 1;
                None
            }
        }
    }
}

/// Record for `function`, keeping the live load state of `existing`.
fn build_record(
    existing: Option<&DeviceRecord>,
    handle: &str,
    info: &DeviceInfo,
    function: &Function,
    module_id: ModuleId,
    compatibility: Compatibility,
) -> DeviceRecord {
    let (load, model_load, sw_instances, next_instance_id) = match existing {
        Some(prev) => (
            prev.load,
            prev.model_load,
            prev.sw_instances.clone(),
            prev.next_instance_id,
        ),
        None => (0, 0, Vec::new(), 0),
    };

    DeviceRecord {
        class: function.class,
        module_id,
        dev_name: handle.to_string(),
        blk_name: info.blk_name.clone(),
        hw_id: info.hw_id,
        serial_number: info.serial.clone(),
        model_number: info.model.clone(),
        fw_rev: info.firmware,
        fw_info: info.firmware_info.clone(),
        compatibility,
        load,
        model_load,
        max_fps_4k: info.max_fps_4k,
        max_instance_cnt: function.max_instances,
        capabilities: function.capabilities.clone(),
        sw_instances,
        next_instance_id,
        retired: false,
    }
}
