// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! hwpool - Accelerator Resource Pool for Rust
//!
//! Shared bookkeeping for a pool of fixed-function video accelerators
//! (decoders, encoders, scalers, AI engines) used concurrently by many
//! unrelated host processes.
//!
//! Every process opens the same named shared region: a directory holding the
//! pool index and one record per device. All mutation goes through
//! cross-process file locks, so two processes never interleave a
//! read-modify-write of the same record.
//!
//! # Quick Start
//!
//! ## Scanning Devices
//!
//! ```no_run
//! use hwpool::{Config, ResourceManager};
//! use hwpool::hardware::Inventory;
//!
//! let inventory = Inventory::load("/etc/hwpool/inventory.json")?;
//! let manager = ResourceManager::open(Config::from_env()?, inventory)?;
//! let report = manager.refresh(true)?;
//! println!("{} devices known", report.known);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Allocating an Encoder
//!
//! ```no_run
//! use hwpool::{AllocationRule, Codec, Config, DeviceClass, ResourceManager};
//! use hwpool::hardware::Inventory;
//!
//! let manager = ResourceManager::open(Config::from_env()?, Inventory::new())?;
//! let mut alloc = manager.allocate_auto(
//!     DeviceClass::Encoder,
//!     AllocationRule::LeastLoad,
//!     Codec::H265,
//!     1920,
//!     1080,
//!     30,
//! )?;
//! println!("Encoding on {} ({})", alloc.context.module_id(), alloc.context.dev_name());
//! // ... run the workload ...
//! manager.release_resource(&mut alloc.context, alloc.load)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Features
//!
//! - Least-load and least-instance allocation with bounded lock fallback
//! - Direct allocation by module id, with or without load tracking
//! - Hot-plug aware rescans with stable module ids
//! - Firmware revision gating of the candidate pool

use std::{error, fmt, io};

/// Error type for hwpool operations
#[derive(Debug)]
pub enum Error {
    /// No live record exists for the class and module id
    NotFound {
        class: DeviceClass,
        module_id: ModuleId,
    },

    /// No device in the registry uses this physical handle name
    UnknownHandle(String),

    /// A cross-process lock could not be acquired within the timeout
    LockTimeout(String),

    /// The device is already running its maximum number of instances
    Full {
        class: DeviceClass,
        module_id: ModuleId,
    },

    /// No candidate device satisfies the request
    NotAvailable(DeviceClass),

    /// Reading identity or load from the device failed
    Transport { handle: String, reason: String },

    /// Another handle already reported the same serial and model
    DuplicateDevice {
        handle: String,
        serial: String,
        model: String,
    },

    /// The device context is not open
    InvalidHandle(ContextState),

    /// The device firmware is not supported by this library
    IncompatibleFirmware { handle: String, revision: String },

    /// A caller supplied a malformed argument
    InvalidArgument(String),

    /// A fixed-capacity field would overflow
    Overflow { field: &'static str, limit: usize },

    /// The allocation was cancelled between candidates
    Cancelled,

    /// I/O error on the shared region or lock files
    Io(io::Error),

    /// A shared region file could not be encoded or decoded
    Json(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotFound { class, module_id } => {
                write!(f, "{} {} not found", class, module_id)
            }
            Error::UnknownHandle(handle) => write!(f, "no device registered for {}", handle),
            Error::LockTimeout(key) => write!(f, "timed out waiting for lock {}", key),
            Error::Full { class, module_id } => {
                write!(f, "{} {} has no free instance slots", class, module_id)
            }
            Error::NotAvailable(class) => write!(f, "no {} available", class),
            Error::Transport { handle, reason } => {
                write!(f, "transport error on {}: {}", handle, reason)
            }
            Error::DuplicateDevice {
                handle,
                serial,
                model,
            } => write!(
                f,
                "{} duplicates serial {} model {}",
                handle, serial, model
            ),
            Error::InvalidHandle(state) => write!(f, "device context is {}", state),
            Error::IncompatibleFirmware { handle, revision } => {
                write!(f, "{} runs unsupported firmware {}", handle, revision)
            }
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::Overflow { field, limit } => {
                write!(f, "{} exceeds its limit of {}", field, limit)
            }
            Error::Cancelled => write!(f, "allocation cancelled"),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl Error {
    /// Whether the allocation engine may move on to another candidate.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::LockTimeout(_)
                | Error::Full { .. }
                | Error::NotAvailable(_)
                | Error::Transport { .. }
                | Error::DuplicateDevice { .. }
                | Error::IncompatibleFirmware { .. }
        )
    }
}

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The device module provides the device record data model.
pub mod device;

/// The firmware module provides revision compatibility checks.
pub mod firmware;

/// The hardware module defines the enumeration and transport collaborators.
pub mod hardware;

/// The region module provides the named shared region.
pub mod region;

/// The lock module provides cross-process exclusive locks.
pub mod lock;

/// The registry module provides device records and the pool index.
pub mod registry;

/// The scan module reconciles the registry against present hardware.
pub mod scan;

/// The alloc module provides the allocation and release algorithms.
pub mod alloc;

/// The config module provides runtime configuration.
pub mod config;

mod manager;

pub use alloc::{
    Allocation, AllocationEngine, AllocationRule, ContextState, DeviceContext, LoadModel,
    PixelRateLoad,
};
pub use config::Config;
pub use device::{
    Codec, CodecCapability, DeviceClass, DeviceRecord, InstanceStatus, ModuleId, SwInstance,
    DEVICE_NAME_LEN, MODEL_NUMBER_LEN, SERIAL_NUMBER_LEN,
};
pub use firmware::{firmware_compat, Compatibility, FirmwareRevision, FirmwareTable};
pub use manager::ResourceManager;
pub use registry::{DeviceRegistry, PoolIndex};
pub use scan::{ScanReport, ScanService};
