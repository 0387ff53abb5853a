// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Firmware revision compatibility
//!
//! Devices report an eight byte firmware revision such as `6r3`. Byte 0
//! carries the API major version and byte 2 the API minor version. A
//! [`FirmwareTable`] maps those to a [`Compatibility`] level:
//!
//! | Major | Minor | Level |
//! |-------|-------|-------|
//! | listed | within range | [`Compatibility::Full`] |
//! | listed | outside range | [`Compatibility::Partial`] |
//! | not listed | any | [`Compatibility::None`] |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::device::check_len;
use crate::{Error, Result};

/// Maximum length of the firmware branch name.
pub const FW_BRANCH_NAME_LEN: usize = 255;

/// Maximum length of the commit and build timestamps.
pub const FW_TIME_LEN: usize = 25;

/// Maximum length of the commit hash.
pub const FW_COMMIT_HASH_LEN: usize = 40;

/// Maximum length of the build id.
pub const FW_BUILD_ID_LEN: usize = 255;

/// Length of the raw firmware revision field.
pub const FW_REV_LEN: usize = 8;

/// Index of the API major version byte.
pub const FW_API_MAJOR_IDX: usize = 0;

/// Index of the API minor version byte.
pub const FW_API_MINOR_IDX: usize = 2;

/// Raw firmware revision bytes, zero padded
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FirmwareRevision(pub [u8; FW_REV_LEN]);

impl FirmwareRevision {
    /// Create from raw bytes, rejecting anything longer than the field.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FW_REV_LEN {
            return Err(Error::Overflow {
                field: "fw_rev",
                limit: FW_REV_LEN,
            });
        }
        let mut rev = [0u8; FW_REV_LEN];
        rev[..bytes.len()].copy_from_slice(bytes);
        Ok(FirmwareRevision(rev))
    }

    pub fn api_major(&self) -> u8 {
        self.0[FW_API_MAJOR_IDX]
    }

    pub fn api_minor(&self) -> u8 {
        self.0[FW_API_MINOR_IDX]
    }
}

impl FromStr for FirmwareRevision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_bytes(s.as_bytes())
    }
}

impl fmt::Display for FirmwareRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(FW_REV_LEN);
        for &b in &self.0[..end] {
            write!(f, "{}", std::ascii::escape_default(b))?;
        }
        Ok(())
    }
}

impl fmt::Debug for FirmwareRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FirmwareRevision")
            .field(&format_args!("{}", self))
            .finish()
    }
}

/// Build metadata reported alongside the revision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareInfo {
    pub branch_name: String,
    pub commit_time: String,
    pub commit_hash: String,
    pub build_time: String,
    pub build_id: String,
}

impl FirmwareInfo {
    pub fn validate(&self) -> Result<()> {
        check_len("fw_branch_name", &self.branch_name, FW_BRANCH_NAME_LEN)?;
        check_len("fw_commit_time", &self.commit_time, FW_TIME_LEN)?;
        check_len("fw_commit_hash", &self.commit_hash, FW_COMMIT_HASH_LEN)?;
        check_len("fw_build_time", &self.build_time, FW_TIME_LEN)?;
        check_len("fw_build_id", &self.build_id, FW_BUILD_ID_LEN)
    }
}

/// How well a firmware revision matches this library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compatibility {
    Full,
    Partial,
    None,
}

impl Compatibility {
    pub fn name(&self) -> &'static str {
        match self {
            Compatibility::Full => "full",
            Compatibility::Partial => "partial",
            Compatibility::None => "none",
        }
    }
}

impl fmt::Display for Compatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One supported API major version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareSupport {
    pub api_major: u8,
    /// Lowest API minor with full compatibility
    pub min_minor: u8,
    /// Highest API minor with full compatibility
    pub max_minor: u8,
}

/// Revisions supported by this library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareTable {
    entries: Vec<FirmwareSupport>,
}

impl FirmwareTable {
    pub fn new(entries: Vec<FirmwareSupport>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[FirmwareSupport] {
        &self.entries
    }

    /// Compatibility level of `rev` against this table.
    pub fn check(&self, rev: &FirmwareRevision) -> Compatibility {
        match self
            .entries
            .iter()
            .find(|entry| entry.api_major == rev.api_major())
        {
            Some(entry) if (entry.min_minor..=entry.max_minor).contains(&rev.api_minor()) => {
                Compatibility::Full
            }
            Some(_) => Compatibility::Partial,
            None => Compatibility::None,
        }
    }
}

impl Default for FirmwareTable {
    fn default() -> Self {
        Self::new(vec![FirmwareSupport {
            api_major: b'6',
            min_minor: b'2',
            max_minor: b'5',
        }])
    }
}

/// Check `rev` against the library's built-in revision table.
pub fn firmware_compat(rev: &FirmwareRevision) -> Compatibility {
    FirmwareTable::default().check(rev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_parse_and_display() {
        let rev: FirmwareRevision = "6r3".parse().unwrap();
        assert_eq!(rev.0, *b"6r3\0\0\0\0\0");
        assert_eq!(format!("{}", rev), "6r3");
        assert_eq!(rev.api_major(), b'6');
        assert_eq!(rev.api_minor(), b'3');
    }

    #[test]
    fn test_revision_too_long() {
        assert!(matches!(
            "6r3-release".parse::<FirmwareRevision>(),
            Err(Error::Overflow { field: "fw_rev", .. })
        ));
    }

    #[test]
    fn test_default_table_levels() {
        assert_eq!(firmware_compat(&"6r3".parse().unwrap()), Compatibility::Full);
        assert_eq!(firmware_compat(&"6r5X".parse().unwrap()), Compatibility::Full);
        assert_eq!(firmware_compat(&"6r1".parse().unwrap()), Compatibility::Partial);
        assert_eq!(firmware_compat(&"6rA".parse().unwrap()), Compatibility::Partial);
        assert_eq!(firmware_compat(&"5r9".parse().unwrap()), Compatibility::None);
        assert_eq!(firmware_compat(&FirmwareRevision::default()), Compatibility::None);
    }

    #[test]
    fn test_custom_table() {
        let table = FirmwareTable::new(vec![
            FirmwareSupport {
                api_major: b'5',
                min_minor: b'0',
                max_minor: b'9',
            },
            FirmwareSupport {
                api_major: b'6',
                min_minor: b'0',
                max_minor: b'0',
            },
        ]);
        assert_eq!(table.check(&"5r7".parse().unwrap()), Compatibility::Full);
        assert_eq!(table.check(&"6r3".parse().unwrap()), Compatibility::Partial);
        assert_eq!(table.check(&"7r0".parse().unwrap()), Compatibility::None);
    }

    #[test]
    fn test_firmware_info_overflow() {
        let info = FirmwareInfo {
            commit_hash: "f".repeat(41),
            ..Default::default()
        };
        assert!(info.validate().is_err());
        assert!(FirmwareInfo::default().validate().is_ok());
    }
}
