// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Hardware enumeration and transport
//!
//! The pool never talks to devices itself. It consumes three operations
//! through the [`Hardware`] trait:
//!
//! - [`Hardware::enumerate`] lists the handle names of present devices
//! - [`Hardware::read_info`] reads identity, firmware and capabilities
//! - [`Hardware::read_load`] reads the load reported by the device
//!
//! [`Inventory`] implements the trait from a JSON description. It backs the
//! CLI on hosts where an external agent publishes the device list, and the
//! test suites where devices are plugged and pulled at will.
//!
//! # Inventory Format
//!
//! ```json
//! {
//!   "devices": [
//!     {
//!       "handle": "/dev/nvme0",
//!       "serial": "Q1A230000101",
//!       "model": "T2A",
//!       "firmware": "6r3",
//!       "functions": [
//!         {
//!           "class": "encoder",
//!           "max_instances": 32,
//!           "capabilities": [
//!             { "codec": "h265", "min_width": 144, "min_height": 144,
//!               "max_width": 8192, "max_height": 8192 }
//!           ]
//!         }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::device::{
    check_len, Codec, CodecCapability, DeviceClass, DEVICE_NAME_LEN, MAX_INSTANCES_PER_DEVICE,
    MODEL_NUMBER_LEN, SERIAL_NUMBER_LEN,
};
use crate::firmware::{FirmwareInfo, FirmwareRevision};
use crate::{Error, Result};

/// One functional class exposed by a physical device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub class: DeviceClass,
    pub max_instances: u32,
    #[serde(default)]
    pub capabilities: Vec<CodecCapability>,
}

/// Identity and capability read from a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub model: String,
    pub firmware: FirmwareRevision,
    pub firmware_info: FirmwareInfo,
    pub blk_name: String,
    pub hw_id: i32,
    pub max_fps_4k: u32,
    pub functions: Vec<Function>,
}

impl DeviceInfo {
    /// Reject identity fields that are missing or do not fit the record.
    pub fn validate(&self) -> Result<()> {
        if self.serial.is_empty() || self.model.is_empty() {
            return Err(Error::InvalidArgument(
                "device reported an empty serial or model".to_string(),
            ));
        }
        check_len("serial_number", &self.serial, SERIAL_NUMBER_LEN)?;
        check_len("model_number", &self.model, MODEL_NUMBER_LEN)?;
        check_len("blk_name", &self.blk_name, DEVICE_NAME_LEN)?;
        self.firmware_info.validate()?;

        if self.functions.is_empty() {
            return Err(Error::InvalidArgument(
                "device reported no functions".to_string(),
            ));
        }
        for (i, function) in self.functions.iter().enumerate() {
            if self.functions[..i].iter().any(|f| f.class == function.class) {
                return Err(Error::InvalidArgument(format!(
                    "{} function reported twice",
                    function.class
                )));
            }
            if function.max_instances as usize > MAX_INSTANCES_PER_DEVICE {
                return Err(Error::Overflow {
                    field: "max_instance_cnt",
                    limit: MAX_INSTANCES_PER_DEVICE,
                });
            }
            if function.capabilities.len() > Codec::COUNT {
                return Err(Error::Overflow {
                    field: "capabilities",
                    limit: Codec::COUNT,
                });
            }
            for (j, cap) in function.capabilities.iter().enumerate() {
                if function.capabilities[..j].iter().any(|c| c.codec == cap.codec) {
                    return Err(Error::InvalidArgument(format!(
                        "{} capability reported twice",
                        cap.codec
                    )));
                }
                cap.validate()?;
            }
        }
        Ok(())
    }
}

/// Enumeration and transport collaborators
pub trait Hardware: Send + Sync {
    /// Handle names of all physically present devices.
    fn enumerate(&self) -> Result<Vec<String>>;

    /// Identity, firmware and capability of the device at `handle`.
    ///
    /// Failures are reported as [`Error::Transport`].
    fn read_info(&self, handle: &str) -> Result<DeviceInfo>;

    /// Load currently reported by the device at `handle`.
    fn read_load(&self, handle: &str) -> Result<u32>;
}

impl<T: Hardware + ?Sized> Hardware for Arc<T> {
    fn enumerate(&self) -> Result<Vec<String>> {
        (**self).enumerate()
    }

    fn read_info(&self, handle: &str) -> Result<DeviceInfo> {
        (**self).read_info(handle)
    }

    fn read_load(&self, handle: &str) -> Result<u32> {
        (**self).read_load(handle)
    }
}

/// A device entry in an [`Inventory`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryDevice {
    pub handle: String,
    pub serial: String,
    pub model: String,
    pub firmware: String,
    #[serde(default)]
    pub firmware_info: FirmwareInfo,
    #[serde(default)]
    pub blk_name: String,
    #[serde(default)]
    pub hw_id: i32,
    #[serde(default)]
    pub max_fps_4k: u32,
    #[serde(default)]
    pub load: u32,
    pub functions: Vec<Function>,
    /// When set, every transport read fails with this reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl InventoryDevice {
    /// Create a device with a single function and no capabilities.
    pub fn new(handle: &str, serial: &str, model: &str, firmware: &str) -> Self {
        Self {
            handle: handle.to_string(),
            serial: serial.to_string(),
            model: model.to_string(),
            firmware: firmware.to_string(),
            firmware_info: FirmwareInfo::default(),
            blk_name: String::new(),
            hw_id: 0,
            max_fps_4k: 0,
            load: 0,
            functions: Vec::new(),
            fault: None,
        }
    }

    /// Add a function exposing `capabilities`.
    pub fn with_function(
        mut self,
        class: DeviceClass,
        max_instances: u32,
        capabilities: Vec<CodecCapability>,
    ) -> Self {
        self.functions.push(Function {
            class,
            max_instances,
            capabilities,
        });
        self
    }

    fn transport_error(&self, reason: &str) -> Error {
        Error::Transport {
            handle: self.handle.clone(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InventoryFile {
    devices: Vec<InventoryDevice>,
}

/// JSON-described device inventory with hot-plug support
#[derive(Debug, Default)]
pub struct Inventory {
    devices: Mutex<Vec<InventoryDevice>>,
}

impl Inventory {
    /// Create an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_devices(devices: Vec<InventoryDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }

    /// Load an inventory file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let file: InventoryFile = serde_json::from_str(&contents)?;
        log::debug!(
            "Loaded {} devices from {}",
            file.devices.len(),
            path.as_ref().display()
        );
        Ok(Self::from_devices(file.devices))
    }

    /// Write the inventory to `path` in the format read by [`load`](Self::load).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = InventoryFile {
            devices: self.devices().clone(),
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Hot-plug a device, replacing any entry with the same handle.
    pub fn plug(&self, device: InventoryDevice) {
        let mut devices = self.devices();
        devices.retain(|d| d.handle != device.handle);
        devices.push(device);
    }

    /// Hot-remove the device at `handle`, returning whether it was present.
    pub fn unplug(&self, handle: &str) -> bool {
        let mut devices = self.devices();
        let before = devices.len();
        devices.retain(|d| d.handle != handle);
        devices.len() != before
    }

    /// Set the load the device at `handle` reports.
    pub fn set_load(&self, handle: &str, load: u32) -> bool {
        self.with_device(handle, |d| d.load = load)
    }

    /// Make every transport read of `handle` fail (or succeed again).
    pub fn set_fault(&self, handle: &str, fault: Option<&str>) -> bool {
        self.with_device(handle, |d| d.fault = fault.map(str::to_string))
    }

    fn with_device<F: FnOnce(&mut InventoryDevice)>(&self, handle: &str, f: F) -> bool {
        match self.devices().iter_mut().find(|d| d.handle == handle) {
            Some(device) => {
                f(device);
                true
            }
            None => false,
        }
    }

    fn devices(&self) -> MutexGuard<'_, Vec<InventoryDevice>> {
        self.devices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup(&self, handle: &str) -> Result<InventoryDevice> {
        let device = self
            .devices()
            .iter()
            .find(|d| d.handle == handle)
            .cloned()
            .ok_or_else(|| Error::Transport {
                handle: handle.to_string(),
                reason: "device not present".to_string(),
            })?;
        if let Some(reason) = &device.fault {
            return Err(device.transport_error(reason));
        }
        Ok(device)
    }
}

impl Hardware for Inventory {
    fn enumerate(&self) -> Result<Vec<String>> {
        Ok(self.devices().iter().map(|d| d.handle.clone()).collect())
    }

    fn read_info(&self, handle: &str) -> Result<DeviceInfo> {
        let device = self.lookup(handle)?;
        let firmware = device
            .firmware
            .parse()
            .map_err(|e: Error| device.transport_error(&e.to_string()))?;

        Ok(DeviceInfo {
            serial: device.serial,
            model: device.model,
            firmware,
            firmware_info: device.firmware_info,
            blk_name: device.blk_name,
            hw_id: device.hw_id,
            max_fps_4k: device.max_fps_4k,
            functions: device.functions,
        })
    }

    fn read_load(&self, handle: &str) -> Result<u32> {
        Ok(self.lookup(handle)?.load)
    }
}
