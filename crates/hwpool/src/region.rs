// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Named shared region
//!
//! The region is a directory every cooperating process opens by name:
//!
//! ```text
//! <root>/pool.json                     pool index and module id counter
//! <root>/devices/<class>-<id>.json     one device record each
//! <root>/locks/pool.lock               pool-level lock
//! <root>/locks/<class>-<id>.lock       per-record locks
//! ```
//!
//! Files are replaced atomically (write, fsync, rename), so a reader that
//! holds no lock still observes a whole snapshot. The region outlives the
//! processes using it.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{de::DeserializeOwned, Serialize};

use crate::device::{DeviceClass, ModuleId};
use crate::Result;

const POOL_FILE: &str = "pool.json";
const DEVICES_DIR: &str = "devices";
const LOCKS_DIR: &str = "locks";

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Handle on the shared region directory
#[derive(Debug, Clone)]
pub struct SharedRegion {
    root: PathBuf,
}

impl SharedRegion {
    /// Open the region at `root`, creating its directories if needed.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(DEVICES_DIR))?;
        fs::create_dir_all(root.join(LOCKS_DIR))?;
        log::debug!("Opened shared region {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pool_path(&self) -> PathBuf {
        self.root.join(POOL_FILE)
    }

    pub fn record_path(&self, class: DeviceClass, module_id: ModuleId) -> PathBuf {
        self.root
            .join(DEVICES_DIR)
            .join(format!("{}-{}.json", class.key(), module_id))
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    /// Paths of every record file currently in the region.
    pub fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(self.root.join(DEVICES_DIR))? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Read and parse `path`, or `None` if it does not exist.
    pub fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Replace `path` with the serialized `value` in one rename.
    pub fn write<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let serialized = serde_json::to_vec_pretty(value)?;
        let temp_path = path.with_extension(format!(
            "json.{}.{}.tmp",
            process::id(),
            WRITE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let written = (|| -> Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
            fs::rename(&temp_path, path)?;
            Ok(())
        })();

        if written.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        written
    }
}
