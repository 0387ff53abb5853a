// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Device load polling.
//!
//! Reads the load each device reports and stores it in its record, either
//! once or periodically until interrupted.

use crate::error::CliError;
use crate::utils::{install_signal_handler, Context};
use clap::Args as ClapArgs;
use hwpool::{DeviceClass, ModuleId, ResourceManager};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Poll only this class (decoder, encoder, scaler, ai)
    #[arg(short, long)]
    class: Option<DeviceClass>,

    /// Poll only this module id
    #[arg(short, long)]
    module_id: Option<ModuleId>,

    /// Seconds between polls; 0 polls once
    #[arg(short, long, default_value = "0")]
    interval: u64,

    /// Stop after this many polls (0 = until Ctrl+C)
    #[arg(short = 'n', long, default_value = "0")]
    count: u64,
}

#[derive(Debug, Serialize)]
struct Sample {
    class: DeviceClass,
    module_id: ModuleId,
    load: u32,
}

pub fn execute(args: Args, ctx: &Context) -> Result<(), CliError> {
    log::debug!("Executing load command: {:?}", args);
    let manager = ctx.manager()?;

    if args.interval == 0 {
        return poll_once(&manager, &args, ctx);
    }

    let term = install_signal_handler()?;
    let interval = Duration::from_secs(args.interval);
    let mut polls = 0;

    while !term.load(Ordering::Relaxed) {
        let started = Instant::now();
        poll_once(&manager, &args, ctx)?;
        polls += 1;
        if args.count > 0 && polls >= args.count {
            break;
        }

        // Sleep in short slices so Ctrl+C is honoured promptly.
        while started.elapsed() < interval && !term.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(100).min(interval));
        }
    }

    log::debug!("Stopped after {} polls", polls);
    Ok(())
}

fn poll_once(manager: &ResourceManager, args: &Args, ctx: &Context) -> Result<(), CliError> {
    let targets: Vec<(DeviceClass, ModuleId)> = manager
        .list_all_devices(false)?
        .into_iter()
        .filter(|r| args.class.map_or(true, |class| r.class == class))
        .filter(|r| args.module_id.map_or(true, |id| r.module_id == id))
        .map(|r| (r.class, r.module_id))
        .collect();

    if targets.is_empty() && (args.class.is_some() || args.module_id.is_some()) {
        return Err(CliError::DeviceNotFound(
            "no registered device matches the filter".to_string(),
        ));
    }

    let mut samples = Vec::with_capacity(targets.len());
    for (class, module_id) in targets {
        match manager.poll_device_load(class, module_id) {
            Ok(load) => samples.push(Sample {
                class,
                module_id,
                load,
            }),
            Err(err) if err.is_recoverable() => {
                log::warn!("{} {}: {}", class, module_id, err);
            }
            Err(err) => return Err(err.into()),
        }
    }

    if ctx.json {
        let line = serde_json::to_string(&samples)
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
        println!("{}", line);
    } else {
        for sample in &samples {
            println!("{} {}: load {}", sample.class, sample.module_id, sample.load);
        }
    }
    Ok(())
}
