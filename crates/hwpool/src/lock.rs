// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Cross-process exclusive locks
//!
//! Each [`LockKey`] names one lock file in the shared region. Acquisition
//! takes an advisory exclusive lock on a freshly opened descriptor, so any
//! number of unrelated processes (or independent managers inside one
//! process) contend for it and exactly one holds it at a time.
//!
//! Acquisition polls with exponential backoff and gives up with
//! [`Error::LockTimeout`] once the timeout has elapsed. A [`LockToken`]
//! releases its lock when passed to [`LockManager::release`] or dropped.
//!
//! A thread may hold the pool lock together with one device lock, never two
//! device locks at once.

use std::cell::Cell;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::device::{DeviceClass, ModuleId};
use crate::region::SharedRegion;
use crate::{Error, Result};

const BACKOFF_START: Duration = Duration::from_millis(1);
const BACKOFF_MAX: Duration = Duration::from_millis(32);

thread_local! {
    static DEVICE_LOCKS_HELD: Cell<u32> = const { Cell::new(0) };
}

/// Name of a lockable resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Guards the pool index
    Pool,
    /// Guards one device record
    Device {
        class: DeviceClass,
        module_id: ModuleId,
    },
}

impl LockKey {
    pub fn device(class: DeviceClass, module_id: ModuleId) -> Self {
        LockKey::Device { class, module_id }
    }

    fn file_name(&self) -> String {
        match self {
            LockKey::Pool => "pool.lock".to_string(),
            LockKey::Device { class, module_id } => format!("{}-{}.lock", class.key(), module_id),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Pool => write!(f, "pool"),
            LockKey::Device { class, module_id } => write!(f, "{}-{}", class.key(), module_id),
        }
    }
}

/// Proof that the caller holds the lock for [`key`](Self::key)
///
/// A token stays on the thread that acquired it, since the device lock
/// nesting count is tracked per thread.
///
/// ```compile_fail
/// fn require_send<T: Send>() {}
/// require_send::<hwpool::lock::LockToken>();
/// ```
#[derive(Debug)]
pub struct LockToken {
    key: LockKey,
    file: File,
    acquired: Instant,
    _thread_bound: PhantomData<*const ()>,
}

impl LockToken {
    pub fn key(&self) -> LockKey {
        self.key
    }

    /// Time since the lock was acquired
    pub fn held_for(&self) -> Duration {
        self.acquired.elapsed()
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            log::warn!("Failed to unlock {}: {}", self.key, err);
        }
        if matches!(self.key, LockKey::Device { .. }) {
            DEVICE_LOCKS_HELD.with(|held| held.set(held.get().saturating_sub(1)));
        }
    }
}

/// Acquires and releases named locks in a shared region
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    pub fn new(region: &SharedRegion) -> Self {
        Self {
            dir: region.lock_dir(),
        }
    }

    /// Acquire `key`, waiting at most `timeout`.
    ///
    /// A zero timeout makes a single attempt.
    pub fn acquire(&self, key: LockKey, timeout: Duration) -> Result<LockToken> {
        let deadline = Instant::now() + timeout;
        let mut backoff = BACKOFF_START;

        loop {
            if let Some(token) = self.try_acquire(key)? {
                return Ok(token);
            }

            let now = Instant::now();
            if now >= deadline {
                log::debug!("Timed out after {:?} waiting for {}", timeout, key);
                return Err(Error::LockTimeout(key.to_string()));
            }
            thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }

    /// Make one attempt at `key`, returning `None` if another holder has it.
    pub fn try_acquire(&self, key: LockKey) -> Result<Option<LockToken>> {
        let is_device = matches!(key, LockKey::Device { .. });
        if is_device && DEVICE_LOCKS_HELD.with(|held| held.get()) > 0 {
            return Err(Error::InvalidArgument(format!(
                "lock {} requested while another device lock is held",
                key
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(key.file_name()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                if is_device {
                    DEVICE_LOCKS_HELD.with(|held| held.set(held.get() + 1));
                }
                log::trace!("Acquired {}", key);
                Ok(Some(LockToken {
                    key,
                    file,
                    acquired: Instant::now(),
                    _thread_bound: PhantomData,
                }))
            }
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Release a lock taken by [`acquire`](Self::acquire).
    pub fn release(&self, token: LockToken) {
        log::trace!("Released {} after {:?}", token.key, token.held_for());
        drop(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> LockManager {
        LockManager::new(&SharedRegion::open(dir.path()).unwrap())
    }

    #[test]
    fn test_lock_key_display() {
        assert_eq!(format!("{}", LockKey::Pool), "pool");
        assert_eq!(
            format!("{}", LockKey::device(DeviceClass::Encoder, 3)),
            "encoder-3"
        );
    }

    #[test]
    fn test_exclusive_between_managers() {
        let dir = TempDir::new().unwrap();
        let a = manager(&dir);
        let b = manager(&dir);

        let token = a.acquire(LockKey::Pool, Duration::from_millis(10)).unwrap();
        assert!(b.try_acquire(LockKey::Pool).unwrap().is_none());
        assert!(matches!(
            b.acquire(LockKey::Pool, Duration::from_millis(20)),
            Err(Error::LockTimeout(_))
        ));

        a.release(token);
        assert!(b.try_acquire(LockKey::Pool).unwrap().is_some());
    }

    #[test]
    fn test_distinct_keys_do_not_contend() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir);
        let pool = locks.acquire(LockKey::Pool, Duration::ZERO).unwrap();
        let dev = locks
            .acquire(LockKey::device(DeviceClass::Decoder, 0), Duration::ZERO)
            .unwrap();
        assert_eq!(dev.key(), LockKey::device(DeviceClass::Decoder, 0));
        locks.release(dev);
        locks.release(pool);
    }

    #[test]
    fn test_nested_device_locks_rejected() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir);
        let first = locks
            .acquire(LockKey::device(DeviceClass::Encoder, 0), Duration::ZERO)
            .unwrap();
        assert!(matches!(
            locks.acquire(LockKey::device(DeviceClass::Encoder, 1), Duration::ZERO),
            Err(Error::InvalidArgument(_))
        ));
        drop(first);
        assert!(locks
            .acquire(LockKey::device(DeviceClass::Encoder, 1), Duration::ZERO)
            .is_ok());
    }

    #[test]
    fn test_waiter_acquires_after_release() {
        let dir = TempDir::new().unwrap();
        let holder = manager(&dir);
        let waiter = manager(&dir);
        let key = LockKey::device(DeviceClass::Encoder, 5);

        let token = holder.acquire(key, Duration::ZERO).unwrap();
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            tx.send(()).unwrap();
            waiter.acquire(key, Duration::from_secs(5)).map(|t| t.key())
        });

        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        holder.release(token);
        assert_eq!(handle.join().unwrap().unwrap(), key);
    }
}
