// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Resource manager facade
//!
//! [`ResourceManager`] ties a region, its registry, a hardware backend and a
//! load model together and exposes the caller-facing operations.

use std::thread;
use std::time::{Duration, Instant};

use crate::alloc::{
    Allocation, AllocationEngine, AllocationRule, DeviceContext, LoadModel, PixelRateLoad,
};
use crate::config::Config;
use crate::device::{Codec, DeviceClass, DeviceRecord, ModuleId, SwInstance};
use crate::firmware::{Compatibility, FirmwareRevision};
use crate::hardware::Hardware;
use crate::lock::{LockKey, LockManager, LockToken};
use crate::region::SharedRegion;
use crate::registry::{DeviceRegistry, PoolIndex, Records};
use crate::scan::{ScanReport, ScanService};
use crate::Result;

const INIT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Process-side entry point to a shared accelerator pool
///
/// Any number of managers, in this or other processes, may be opened on the
/// same region root; they coordinate only through the region's locks.
///
/// # Example
///
/// ```no_run
/// use hwpool::{Config, DeviceClass, ResourceManager};
/// use hwpool::hardware::Inventory;
///
/// let manager = ResourceManager::open(Config::default(), Inventory::new())?;
/// for record in manager.list_devices(DeviceClass::Decoder)? {
///     println!("{}", record?);
/// }
/// # Ok::<(), hwpool::Error>(())
/// ```
pub struct ResourceManager {
    config: Config,
    registry: DeviceRegistry,
    hardware: Box<dyn Hardware>,
    load_model: Box<dyn LoadModel>,
}

impl ResourceManager {
    /// Open (creating if needed) the region at `config.root`.
    pub fn open<H: Hardware + 'static>(config: Config, hardware: H) -> Result<Self> {
        let region = SharedRegion::open(&config.root)?;
        Ok(Self {
            registry: DeviceRegistry::new(region),
            config,
            hardware: Box::new(hardware),
            load_model: Box::new(PixelRateLoad),
        })
    }

    /// Replace the cost function applied to encoder allocations.
    pub fn with_load_model<M: LoadModel + 'static>(mut self, model: M) -> Self {
        self.load_model = Box::new(model);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn locks(&self) -> &LockManager {
        self.registry.locks()
    }

    pub fn scanner(&self) -> ScanService<'_> {
        ScanService::new(
            &self.registry,
            self.hardware.as_ref(),
            &self.config.firmware,
            self.config.lock_timeout,
        )
    }

    pub fn engine(&self) -> AllocationEngine<'_> {
        AllocationEngine::new(
            &self.registry,
            self.load_model.as_ref(),
            self.config.lock_timeout,
            self.config.candidate_lock_timeout,
        )
    }

    /// Scan until at least one device is known or `timeout` has elapsed.
    ///
    /// Scans are retried once per second. A zero timeout scans once. The
    /// report of the last scan is returned either way.
    pub fn init(&self, require_fw_match: bool, timeout: Duration) -> Result<ScanReport> {
        let deadline = Instant::now() + timeout;
        loop {
            let report = self.refresh(require_fw_match)?;
            if report.known > 0 {
                return Ok(report);
            }

            let now = Instant::now();
            if now >= deadline {
                log::warn!("No devices found in {}", self.config.root.display());
                return Ok(report);
            }
            log::debug!("No devices yet, retrying");
            thread::sleep(INIT_RETRY_INTERVAL.min(deadline - now));
        }
    }

    /// Reconcile the registry with the devices present now.
    pub fn refresh(&self, require_fw_match: bool) -> Result<ScanReport> {
        self.scanner().refresh(require_fw_match)
    }

    /// Admit the device at `handle`.
    pub fn add_device(&self, handle: &str, require_fw_match: bool) -> Result<ScanReport> {
        self.scanner().add_device(handle, require_fw_match)
    }

    /// Retire the device at `handle`, returning how many records it had.
    pub fn remove_device(&self, handle: &str) -> Result<usize> {
        self.scanner().remove_device(handle)
    }

    /// Handles of up to `max` physically present devices.
    pub fn local_device_handles(&self, max: usize) -> Result<Vec<String>> {
        let mut handles = self.hardware.enumerate()?;
        handles.truncate(max);
        Ok(handles)
    }

    /// Open a context on a live record without claiming an instance.
    pub fn get_device_context(
        &self,
        class: DeviceClass,
        module_id: ModuleId,
    ) -> Result<DeviceContext> {
        let record = self.registry.get(class, module_id)?;
        Ok(DeviceContext::open(&record, None))
    }

    /// Candidate records of `class`.
    pub fn list_devices(&self, class: DeviceClass) -> Result<Records<'_>> {
        self.registry.list(class)
    }

    /// Every record; with `include_uninitialized` retired and
    /// firmware-excluded records too.
    pub fn list_all_devices(&self, include_uninitialized: bool) -> Result<Vec<DeviceRecord>> {
        self.registry.list_all(include_uninitialized)
    }

    pub fn device_info(&self, class: DeviceClass, module_id: ModuleId) -> Result<DeviceRecord> {
        self.registry.get(class, module_id)
    }

    /// Least loaded device that could take the workload, without claiming it.
    pub fn available_device(
        &self,
        width: u32,
        height: u32,
        _fps: u32,
        codec: Codec,
        class: DeviceClass,
    ) -> Result<Option<ModuleId>> {
        Ok(self
            .engine()
            .available_device(class, codec, width, height)?
            .map(|record| record.module_id))
    }

    pub fn allocate_auto(
        &self,
        class: DeviceClass,
        rule: AllocationRule,
        codec: Codec,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Allocation> {
        self.engine()
            .allocate_auto(class, rule, codec, width, height, fps)
    }

    pub fn allocate_direct(
        &self,
        class: DeviceClass,
        module_id: ModuleId,
        codec: Codec,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Allocation> {
        self.engine()
            .allocate_direct(class, module_id, codec, width, height, fps)
    }

    pub fn allocate_simple_direct(
        &self,
        class: DeviceClass,
        module_id: ModuleId,
    ) -> Result<DeviceContext> {
        self.engine().allocate_simple_direct(class, module_id)
    }

    /// Give back a context and the load its allocation reported.
    pub fn release_resource(&self, context: &mut DeviceContext, load: u64) -> Result<()> {
        self.engine().release(context, load)
    }

    /// Whether `module_id` is a live candidate of `class` that still answers
    /// on its transport.
    pub fn check_device_available(&self, module_id: ModuleId, class: DeviceClass) -> bool {
        let record = match self.registry.get(class, module_id) {
            Ok(record) => record,
            Err(err) => {
                log::debug!("{}", err);
                return false;
            }
        };
        match self.registry.pool_index() {
            Ok(index) if index.contains(class, module_id) => {}
            _ => return false,
        }
        match self.hardware.read_info(&record.dev_name) {
            Ok(_) => true,
            Err(err) => {
                log::debug!("{} {} unreachable: {}", class, module_id, err);
                false
            }
        }
    }

    /// Snapshot of the pool index.
    pub fn device_pool(&self) -> Result<PoolIndex> {
        self.registry.pool_index()
    }

    /// Hold the pool lock, blocking scans and pool changes by other processes.
    pub fn lock_pool(&self) -> Result<LockToken> {
        self.locks().acquire(LockKey::Pool, self.config.lock_timeout)
    }

    pub fn unlock(&self, token: LockToken) {
        self.locks().release(token)
    }

    /// Store the load and instance table a device reported for `context`.
    pub fn update_device_load(
        &self,
        context: &DeviceContext,
        load: u32,
        instances: &[SwInstance],
    ) -> Result<()> {
        self.engine().update_device_load(context, load, instances)
    }

    /// Read the load `module_id` reports and store it in its record.
    pub fn poll_device_load(&self, class: DeviceClass, module_id: ModuleId) -> Result<u32> {
        let record = self.registry.get(class, module_id)?;
        let load = self.hardware.read_load(&record.dev_name)?;

        let token = self
            .locks()
            .acquire(LockKey::device(class, module_id), self.config.lock_timeout)?;
        let result = self.registry.update(class, module_id, &token, |record| {
            record.load = load;
            Ok(())
        });
        self.locks().release(token);

        result.map(|()| load)
    }

    /// Compatibility of `revision` against the configured firmware table.
    pub fn firmware_compat(&self, revision: &FirmwareRevision) -> Compatibility {
        self.config.firmware.check(revision)
    }
}
