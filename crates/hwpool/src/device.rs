// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Device record types
//!
//! This module defines the data persisted in the shared region for every
//! accelerator function:
//!
//! - [`DeviceClass`] - Functional class of a record (decoder, encoder, ...)
//! - [`Codec`] - Codec kinds indexed by the capability table
//! - [`CodecCapability`] - Resolution range and profile strings per codec
//! - [`SwInstance`] - One workload running on a device
//! - [`DeviceRecord`] - Complete record with capability and load state

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::firmware::{Compatibility, FirmwareInfo, FirmwareRevision};
use crate::{Error, Result};

/// Stable numeric identity of one physical unit within a device class.
pub type ModuleId = u32;

/// Maximum number of devices tracked per class.
pub const MAX_DEVICE_COUNT: usize = 128;

/// Maximum number of software instances a single device can host.
pub const MAX_INSTANCES_PER_DEVICE: usize = 128;

/// Maximum length of the supported profiles string.
pub const PROFILES_SUPPORTED_LEN: usize = 128;

/// Maximum length of the supported levels string.
pub const LEVELS_SUPPORTED_LEN: usize = 64;

/// Maximum length of the additional information string.
pub const ADDITIONAL_INFO_LEN: usize = 64;

/// Maximum length of a device handle or block device name.
pub const DEVICE_NAME_LEN: usize = 32;

/// Maximum length of a unit serial number.
pub const SERIAL_NUMBER_LEN: usize = 20;

/// Maximum length of a unit model number.
pub const MODEL_NUMBER_LEN: usize = 40;

/// Functional class of an accelerator record
///
/// A physical card can expose several classes; each class gets its own
/// record and its own entry in the pool index, all sharing the card's
/// module id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Compressed bitstream to raw frames
    Decoder,
    /// Raw frames to compressed bitstream
    Encoder,
    /// Raw frame scaling and conversion
    Scaler,
    /// Inference engine
    Ai,
}

impl DeviceClass {
    /// Every class, in pool index order.
    pub const ALL: [DeviceClass; 4] = [
        DeviceClass::Decoder,
        DeviceClass::Encoder,
        DeviceClass::Scaler,
        DeviceClass::Ai,
    ];

    /// Get human-readable name for this class
    pub fn name(&self) -> &'static str {
        match self {
            DeviceClass::Decoder => "Decoder",
            DeviceClass::Encoder => "Encoder",
            DeviceClass::Scaler => "Scaler",
            DeviceClass::Ai => "AI",
        }
    }

    /// Lowercase key used in shared region file names
    pub fn key(&self) -> &'static str {
        match self {
            DeviceClass::Decoder => "decoder",
            DeviceClass::Encoder => "encoder",
            DeviceClass::Scaler => "scaler",
            DeviceClass::Ai => "ai",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DeviceClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "decoder" | "dec" => Ok(DeviceClass::Decoder),
            "encoder" | "enc" => Ok(DeviceClass::Encoder),
            "scaler" => Ok(DeviceClass::Scaler),
            "ai" => Ok(DeviceClass::Ai),
            _ => Err(Error::InvalidArgument(format!("unknown device class {:?}", s))),
        }
    }
}

/// Codec kinds understood by the capability table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H264,
    H265,
    Vp9,
    Jpeg,
    Av1,
}

impl Codec {
    /// Number of codec kinds, and so the capacity of a capability table.
    pub const COUNT: usize = 5;

    /// Display name such as "H.264"
    pub fn name(&self) -> &'static str {
        match self {
            Codec::H264 => "H.264",
            Codec::H265 => "H.265",
            Codec::Vp9 => "VP9",
            Codec::Jpeg => "JPEG",
            Codec::Av1 => "AV1",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('.', "").as_str() {
            "h264" | "avc" => Ok(Codec::H264),
            "h265" | "hevc" => Ok(Codec::H265),
            "vp9" => Ok(Codec::Vp9),
            "jpeg" | "mjpeg" => Ok(Codec::Jpeg),
            "av1" => Ok(Codec::Av1),
            _ => Err(Error::InvalidArgument(format!("unknown codec {:?}", s))),
        }
    }
}

/// Capability of one device function for one codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecCapability {
    pub codec: Codec,
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// Vendor profile list, opaque to the pool
    #[serde(default)]
    pub profiles: String,
    /// Vendor level list, opaque to the pool
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub additional_info: String,
}

impl CodecCapability {
    /// Create a capability covering `min..=max` with empty vendor strings.
    pub fn new(codec: Codec, min: (u32, u32), max: (u32, u32)) -> Self {
        Self {
            codec,
            min_width: min.0,
            min_height: min.1,
            max_width: max.0,
            max_height: max.1,
            profiles: String::new(),
            level: String::new(),
            additional_info: String::new(),
        }
    }

    /// Whether a `width` x `height` stream fits the supported range.
    pub fn covers(&self, width: u32, height: u32) -> bool {
        (self.min_width..=self.max_width).contains(&width)
            && (self.min_height..=self.max_height).contains(&height)
    }

    /// Reject vendor strings that do not fit their fixed-size fields.
    pub fn validate(&self) -> Result<()> {
        check_len("profiles", &self.profiles, PROFILES_SUPPORTED_LEN)?;
        check_len("level", &self.level, LEVELS_SUPPORTED_LEN)?;
        check_len("additional_info", &self.additional_info, ADDITIONAL_INFO_LEN)?;
        if self.min_width > self.max_width || self.min_height > self.max_height {
            return Err(Error::InvalidArgument(format!(
                "{} capability has min resolution above max",
                self.codec
            )));
        }
        Ok(())
    }
}

pub(crate) fn check_len(field: &'static str, value: &str, limit: usize) -> Result<()> {
    if value.len() > limit {
        return Err(Error::Overflow { field, limit });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Idle,
    Active,
}

/// One workload hosted by a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwInstance {
    /// Unique within the owning device
    pub id: u32,
    pub status: InstanceStatus,
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Shared record describing one accelerator function
///
/// Records are created by the scan service, mutated in place by allocation,
/// release and load refresh, and retired (never deleted) when the physical
/// unit disappears so that the module id stays reserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub class: DeviceClass,
    pub module_id: ModuleId,
    /// Handle used to open the device (e.g. "/dev/nvme0")
    pub dev_name: String,
    /// Block device name, if the transport exposes one
    #[serde(default)]
    pub blk_name: String,
    #[serde(default)]
    pub hw_id: i32,
    pub serial_number: String,
    pub model_number: String,
    pub fw_rev: FirmwareRevision,
    #[serde(default)]
    pub fw_info: FirmwareInfo,
    pub compatibility: Compatibility,
    /// Load reported by the device itself
    pub load: u32,
    /// Load modeled from allocation and release accounting
    pub model_load: u64,
    #[serde(default)]
    pub max_fps_4k: u32,
    pub max_instance_cnt: u32,
    pub capabilities: Vec<CodecCapability>,
    pub sw_instances: Vec<SwInstance>,
    #[serde(default)]
    pub next_instance_id: u32,
    /// The physical unit was not seen by the last scan
    #[serde(default)]
    pub retired: bool,
}

impl DeviceRecord {
    /// Capability entry for `codec`, if the device supports it
    pub fn capability(&self, codec: Codec) -> Option<&CodecCapability> {
        self.capabilities.iter().find(|cap| cap.codec == codec)
    }

    /// Whether the device can handle `codec` at `width` x `height`
    pub fn supports(&self, codec: Codec, width: u32, height: u32) -> bool {
        self.capability(codec)
            .is_some_and(|cap| cap.covers(width, height))
    }

    /// Number of instances currently marked active
    pub fn active_instance_count(&self) -> usize {
        self.sw_instances
            .iter()
            .filter(|inst| inst.status == InstanceStatus::Active)
            .count()
    }

    /// Whether no further instance can be appended
    pub fn is_full(&self) -> bool {
        self.sw_instances.len() >= self.max_instance_cnt as usize
    }

    /// Append an active instance and return its id.
    ///
    /// Fails with [`Error::Full`] at `max_instance_cnt`.
    pub fn push_instance(
        &mut self,
        codec: Codec,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<u32> {
        if self.is_full() {
            return Err(Error::Full {
                class: self.class,
                module_id: self.module_id,
            });
        }

        let mut id = self.next_instance_id;
        while self.sw_instances.iter().any(|inst| inst.id == id) {
            id = id.wrapping_add(1);
        }
        self.next_instance_id = id.wrapping_add(1);

        self.sw_instances.push(SwInstance {
            id,
            status: InstanceStatus::Active,
            codec,
            width,
            height,
            fps,
        });
        Ok(id)
    }

    /// Remove the instance with `id`, returning whether it was present.
    pub fn remove_instance(&mut self, id: u32) -> bool {
        let before = self.sw_instances.len();
        self.sw_instances.retain(|inst| inst.id != id);
        self.sw_instances.len() != before
    }

    /// Replace the instance table.
    ///
    /// Rejects lists above the device limit and lists that repeat an instance
    /// id. Ids handed out later start past the highest stored id.
    pub fn set_instances(&mut self, instances: &[SwInstance]) -> Result<()> {
        if instances.len() > self.max_instance_cnt as usize {
            return Err(Error::Overflow {
                field: "sw_instances",
                limit: self.max_instance_cnt as usize,
            });
        }
        for (i, inst) in instances.iter().enumerate() {
            if instances[..i].iter().any(|prev| prev.id == inst.id) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate instance id {} for {} {}",
                    inst.id, self.class, self.module_id
                )));
            }
        }

        if let Some(highest) = instances.iter().map(|inst| inst.id).max() {
            self.next_instance_id = self.next_instance_id.max(highest.wrapping_add(1));
        }
        self.sw_instances = instances.to_vec();
        Ok(())
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} ({} {}) fw {} load {} model {} inst {}/{}",
            self.class,
            self.module_id,
            self.dev_name,
            self.model_number,
            self.serial_number,
            self.fw_rev,
            self.load,
            self.model_load,
            self.sw_instances.len(),
            self.max_instance_cnt
        )
    }
}
