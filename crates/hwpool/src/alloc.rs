// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Device allocation and release
//!
//! Three ways to claim a device:
//!
//! | Entry point | Selection | Load tracking |
//! |-------------|-----------|---------------|
//! | [`AllocationEngine::allocate_auto`] | ranked by [`AllocationRule`] | yes |
//! | [`AllocationEngine::allocate_direct`] | by module id | yes |
//! | [`AllocationEngine::allocate_simple_direct`] | by module id | no |
//!
//! Each returns a [`DeviceContext`], which must be handed back to
//! [`AllocationEngine::release`] together with the load the allocation
//! reported.
//!
//! Candidates are ranked from lock-free snapshots. The chosen record is then
//! locked and checked again, since another process may have claimed its last
//! slot in between; on any recoverable failure the next candidate is tried.
//! Only one device lock is held at a time.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::device::{Codec, DeviceClass, DeviceRecord, ModuleId};
use crate::lock::{LockKey, LockToken};
use crate::registry::DeviceRegistry;
use crate::{Error, Result};

/// Ranking used by [`AllocationEngine::allocate_auto`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationRule {
    /// Lowest modeled load first
    LeastLoad,
    /// Fewest active instances first
    LeastInstance,
}

/// Cost of a workload in modeled load units
///
/// Implementations must not decrease when resolution or frame rate grow.
pub trait LoadModel: Send + Sync {
    fn load_delta(&self, codec: Codec, width: u32, height: u32, fps: u32) -> u64;
}

/// Pixel rate cost model: `width * height * fps`
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelRateLoad;

impl LoadModel for PixelRateLoad {
    fn load_delta(&self, _codec: Codec, width: u32, height: u32, fps: u32) -> u64 {
        u64::from(width) * u64::from(height) * u64::from(fps)
    }
}

/// Lifecycle of a [`DeviceContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    Unopened,
    Open,
    Released,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Unopened => write!(f, "unopened"),
            ContextState::Open => write!(f, "open"),
            ContextState::Released => write!(f, "released"),
        }
    }
}

/// Caller-held claim on one device record
///
/// Created open by allocation and lookup calls and released exactly once.
/// Every operation on a context that is not open fails with
/// [`Error::InvalidHandle`].
#[derive(Debug)]
pub struct DeviceContext {
    class: DeviceClass,
    module_id: ModuleId,
    dev_name: String,
    instance: Option<u32>,
    state: ContextState,
}

impl DeviceContext {
    /// A context that has not been opened by any allocation.
    pub fn unopened(class: DeviceClass, module_id: ModuleId) -> Self {
        Self {
            class,
            module_id,
            dev_name: String::new(),
            instance: None,
            state: ContextState::Unopened,
        }
    }

    pub(crate) fn open(record: &DeviceRecord, instance: Option<u32>) -> Self {
        Self {
            class: record.class,
            module_id: record.module_id,
            dev_name: record.dev_name.clone(),
            instance,
            state: ContextState::Open,
        }
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    /// Handle name used to open the device
    pub fn dev_name(&self) -> &str {
        &self.dev_name
    }

    /// Instance recorded for this claim, if it is load tracked
    pub fn instance_id(&self) -> Option<u32> {
        self.instance
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn lock_key(&self) -> LockKey {
        LockKey::device(self.class, self.module_id)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.state {
            ContextState::Open => Ok(()),
            state => Err(Error::InvalidHandle(state)),
        }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if self.state == ContextState::Open && self.instance.is_some() {
            log::warn!(
                "{} {} context dropped without release; its load stays attributed",
                self.class,
                self.module_id
            );
        }
    }
}

/// A successful load-tracked allocation
#[derive(Debug)]
pub struct Allocation {
    pub context: DeviceContext,
    /// Load added to the device; pass it back on release
    pub load: u64,
}

/// Allocation strategies over a [`DeviceRegistry`]
pub struct AllocationEngine<'a> {
    registry: &'a DeviceRegistry,
    model: &'a dyn LoadModel,
    lock_timeout: Duration,
    candidate_timeout: Duration,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> AllocationEngine<'a> {
    pub fn new(
        registry: &'a DeviceRegistry,
        model: &'a dyn LoadModel,
        lock_timeout: Duration,
        candidate_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            model,
            lock_timeout,
            candidate_timeout,
            cancel: None,
        }
    }

    /// Abandon automatic allocation at the next candidate once `flag` is set.
    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Candidates of `class` able to take the workload, best first.
    ///
    /// Full devices are never candidates. Encoder candidates must also cover
    /// `codec` at `width` x `height`; decoder selection ignores both.
    pub fn candidates(
        &self,
        class: DeviceClass,
        rule: AllocationRule,
        codec: Codec,
        width: u32,
        height: u32,
    ) -> Result<Vec<DeviceRecord>> {
        let mut candidates = Vec::new();
        for record in self.registry.list(class)? {
            let record = match record {
                Ok(record) => record,
                Err(Error::Json(err)) => {
                    log::warn!("Skipping unreadable {} record: {}", class, err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            if record.is_full() {
                continue;
            }
            if class == DeviceClass::Encoder && !record.supports(codec, width, height) {
                continue;
            }
            candidates.push(record);
        }

        match rule {
            AllocationRule::LeastLoad => candidates.sort_by_key(|r| (r.model_load, r.module_id)),
            AllocationRule::LeastInstance => {
                candidates.sort_by_key(|r| (r.active_instance_count(), r.module_id))
            }
        }
        Ok(candidates)
    }

    /// Least loaded device able to take the workload, without claiming it.
    pub fn available_device(
        &self,
        class: DeviceClass,
        codec: Codec,
        width: u32,
        height: u32,
    ) -> Result<Option<DeviceRecord>> {
        Ok(self
            .candidates(class, AllocationRule::LeastLoad, codec, width, height)?
            .into_iter()
            .next())
    }

    /// Claim the best ranked candidate of `class`.
    ///
    /// A candidate whose lock is busy past the candidate timeout, or that
    /// turns out full once locked, is skipped in favour of the next one.
    /// Fails with [`Error::NotAvailable`] once every candidate was tried.
    pub fn allocate_auto(
        &self,
        class: DeviceClass,
        rule: AllocationRule,
        codec: Codec,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Allocation> {
        let load = self.load_for(class, codec, width, height, fps)?;

        for candidate in self.candidates(class, rule, codec, width, height)? {
            if self.cancel.is_some_and(|flag| flag.load(Ordering::Acquire)) {
                return Err(Error::Cancelled);
            }

            let key = LockKey::device(class, candidate.module_id);
            let token = match self.registry.locks().acquire(key, self.candidate_timeout) {
                Ok(token) => token,
                Err(err @ Error::LockTimeout(_)) => {
                    log::debug!("Passing over {}: {}", key, err);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let claimed = self.claim(
                &token,
                class,
                candidate.module_id,
                codec,
                width,
                height,
                fps,
                load,
                true,
            );
            self.registry.locks().release(token);

            match claimed {
                Ok(context) => {
                    log::debug!(
                        "Allocated {} {} ({}) load {}",
                        class,
                        context.module_id(),
                        context.dev_name(),
                        load
                    );
                    return Ok(Allocation { context, load });
                }
                Err(err) if err.is_recoverable() => {
                    log::debug!("Passing over {}: {}", key, err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::NotAvailable(class))
    }

    /// Claim the device `module_id` of `class`.
    ///
    /// Fails with [`Error::Full`] if the device has no free instance slot.
    pub fn allocate_direct(
        &self,
        class: DeviceClass,
        module_id: ModuleId,
        codec: Codec,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Allocation> {
        let load = self.load_for(class, codec, width, height, fps)?;
        let token = self
            .registry
            .locks()
            .acquire(LockKey::device(class, module_id), self.lock_timeout)?;
        let claimed = self.claim(
            &token,
            class,
            module_id,
            codec,
            width,
            height,
            fps,
            load,
            false,
        );
        self.registry.locks().release(token);

        Ok(Allocation {
            context: claimed?,
            load,
        })
    }

    /// Open the device `module_id` of `class` without load tracking.
    ///
    /// The record lock is held only while the context is built.
    pub fn allocate_simple_direct(
        &self,
        class: DeviceClass,
        module_id: ModuleId,
    ) -> Result<DeviceContext> {
        let token = self
            .registry
            .locks()
            .acquire(LockKey::device(class, module_id), self.lock_timeout)?;
        let record = self.registry.get(class, module_id);
        self.registry.locks().release(token);

        Ok(DeviceContext::open(&record?, None))
    }

    /// Return `load` and the context's instance to the device.
    ///
    /// If the record lock cannot be taken the context stays open and the
    /// release may be retried. Once the lock is held the context is
    /// invalidated and the lock released even when the update fails; the
    /// failure is still reported. Modeled load never goes below zero.
    pub fn release(&self, context: &mut DeviceContext, load: u64) -> Result<()> {
        context.ensure_open()?;

        let token = self
            .registry
            .locks()
            .acquire(context.lock_key(), self.lock_timeout)
            .map_err(|err| {
                log::warn!("Release of {} deferred: {}", context.lock_key(), err);
                err
            })?;
        context.state = ContextState::Released;

        let instance = context.instance;
        let result = self
            .registry
            .modify(context.class, context.module_id, &token, |record| {
                record.model_load = record.model_load.saturating_sub(load);
                if let Some(id) = instance {
                    if !record.remove_instance(id) {
                        log::warn!(
                            "{} {} had no instance {} to release",
                            record.class,
                            record.module_id,
                            id
                        );
                    }
                }
                Ok(())
            });
        self.registry.locks().release(token);

        if let Err(err) = &result {
            log::warn!("Release of {} failed: {}", context.lock_key(), err);
        }
        result
    }

    /// Store device-reported load and instance table for an open context.
    pub fn update_device_load(
        &self,
        context: &DeviceContext,
        load: u32,
        instances: &[crate::device::SwInstance],
    ) -> Result<()> {
        context.ensure_open()?;
        let token = self
            .registry
            .locks()
            .acquire(context.lock_key(), self.lock_timeout)?;
        let result = self
            .registry
            .update(context.class, context.module_id, &token, |record| {
                record.set_instances(instances)?;
                record.load = load;
                Ok(())
            });
        self.registry.locks().release(token);
        result
    }

    fn load_for(
        &self,
        class: DeviceClass,
        codec: Codec,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<u64> {
        if class != DeviceClass::Encoder {
            return Ok(0);
        }
        if width == 0 || height == 0 || fps == 0 {
            return Err(Error::InvalidArgument(format!(
                "encoder allocation needs a non-zero resolution and frame rate, got {}x{}@{}",
                width, height, fps
            )));
        }
        Ok(self.model.load_delta(codec, width, height, fps))
    }

    #[allow(clippy::too_many_arguments)]
    fn claim(
        &self,
        token: &LockToken,
        class: DeviceClass,
        module_id: ModuleId,
        codec: Codec,
        width: u32,
        height: u32,
        fps: u32,
        load: u64,
        check_capability: bool,
    ) -> Result<DeviceContext> {
        self.registry.update(class, module_id, token, |record| {
            if check_capability
                && class == DeviceClass::Encoder
                && !record.supports(codec, width, height)
            {
                return Err(Error::NotAvailable(class));
            }
            let instance = record.push_instance(codec, width, height, fps)?;
            record.model_load = record.model_load.saturating_add(load);
            Ok(DeviceContext::open(record, Some(instance)))
        })
    }
}
