// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Runtime configuration
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `HWPOOL_ROOT` | [`Config::root`] | `/dev/shm/hwpool`, else `$TMPDIR/hwpool` |
//! | `HWPOOL_LOCK_TIMEOUT_MS` | [`Config::lock_timeout`] | 5000 |
//! | `HWPOOL_CANDIDATE_TIMEOUT_MS` | [`Config::candidate_lock_timeout`] | 100 |

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::firmware::FirmwareTable;
use crate::{Error, Result};

pub const ROOT_ENV: &str = "HWPOOL_ROOT";
pub const LOCK_TIMEOUT_ENV: &str = "HWPOOL_LOCK_TIMEOUT_MS";
pub const CANDIDATE_TIMEOUT_ENV: &str = "HWPOOL_CANDIDATE_TIMEOUT_MS";

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CANDIDATE_TIMEOUT: Duration = Duration::from_millis(100);

/// Settings shared by every manager opened on a region
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory backing the shared region
    pub root: PathBuf,
    /// Bound on pool lock and direct record lock acquisition
    pub lock_timeout: Duration,
    /// Bound on each candidate lock during automatic allocation
    pub candidate_lock_timeout: Duration,
    /// Supported firmware revisions
    pub firmware: FirmwareTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            candidate_lock_timeout: DEFAULT_CANDIDATE_TIMEOUT,
            firmware: FirmwareTable::default(),
        }
    }
}

impl Config {
    /// Defaults with the `HWPOOL_*` environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults with overrides taken from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(root) = lookup(ROOT_ENV).filter(|r| !r.is_empty()) {
            config.root = PathBuf::from(root);
        }
        if let Some(ms) = lookup(LOCK_TIMEOUT_ENV) {
            config.lock_timeout = parse_millis(LOCK_TIMEOUT_ENV, &ms)?;
        }
        if let Some(ms) = lookup(CANDIDATE_TIMEOUT_ENV) {
            config.candidate_lock_timeout = parse_millis(CANDIDATE_TIMEOUT_ENV, &ms)?;
        }
        Ok(config)
    }

    pub fn with_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }
}

fn default_root() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.join("hwpool")
    } else {
        env::temp_dir().join("hwpool")
    }
}

fn parse_millis(name: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| {
            Error::InvalidArgument(format!("{} must be milliseconds, got {:?}", name, value))
        })
}
