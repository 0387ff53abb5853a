// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use hwpool::hardware::Inventory;
use hwpool::{Config, ResourceManager};
use serde::Serialize;
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Options shared by every subcommand
#[derive(Debug, Clone)]
pub struct Context {
    pub root: Option<PathBuf>,
    pub inventory: Option<PathBuf>,
    pub json: bool,
}

impl Context {
    /// Open a manager on the configured region and inventory.
    ///
    /// Without an inventory no devices are present, which is enough for
    /// commands that only read the registry.
    pub fn manager(&self) -> Result<ResourceManager, CliError> {
        let mut config = Config::from_env()?;
        if let Some(root) = &self.root {
            config.root = root.clone();
        }

        let inventory = match &self.inventory {
            Some(path) => Inventory::load(path).map_err(|e| {
                CliError::InvalidArgs(format!("Cannot load inventory {}: {}", path.display(), e))
            })?,
            None => Inventory::new(),
        };

        log::debug!("Using region {}", config.root.display());
        Ok(ResourceManager::open(config, inventory)?)
    }
}

/// Print `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let json_str = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
    println!("{}", json_str);
    Ok(())
}

/// Parse resolution string in format "WxH" or "W*H"
pub fn parse_resolution(s: &str) -> Result<(u32, u32), CliError> {
    let (width_str, height_str) = s
        .split_once('x')
        .or_else(|| s.split_once('*'))
        .ok_or_else(|| {
            CliError::InvalidArgs(format!(
                "Invalid resolution format (expected WxH or W*H): {}",
                s
            ))
        })?;

    let width = width_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid width in resolution: {}", s)))?;
    let height = height_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid height in resolution: {}", s)))?;

    if width == 0 || height == 0 {
        return Err(CliError::InvalidArgs(format!(
            "Resolution dimensions must be positive: {}",
            s
        )));
    }

    Ok((width, height))
}

/// Install signal handler for graceful shutdown on Ctrl+C
///
/// Returns an Arc<AtomicBool> that will be set to true when SIGINT is received.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, CliError> {
    let term = Arc::new(AtomicBool::new(false));

    flag::register(SIGINT, Arc::clone(&term))
        .map_err(|e| CliError::General(format!("Failed to register signal handler: {}", e)))?;

    log::debug!("Installed SIGINT handler");
    Ok(term)
}
