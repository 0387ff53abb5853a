// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Registry scanning: init, refresh, add and remove.

use crate::error::CliError;
use crate::utils::{print_json, Context};
use clap::Args as ClapArgs;
use hwpool::ScanReport;
use serde::Serialize;
use std::time::Duration;

#[derive(ClapArgs, Debug)]
pub struct InitArgs {
    /// Admit devices regardless of firmware compatibility
    #[arg(long)]
    no_fw_check: bool,

    /// Seconds to keep retrying while no device is found
    #[arg(short, long, default_value = "0")]
    timeout: u64,
}

#[derive(ClapArgs, Debug)]
pub struct RefreshArgs {
    /// Admit devices regardless of firmware compatibility
    #[arg(long)]
    no_fw_check: bool,
}

#[derive(ClapArgs, Debug)]
pub struct AddArgs {
    /// Device handle, e.g. /dev/nvme0n1
    handle: String,

    /// Admit the device regardless of firmware compatibility
    #[arg(long)]
    no_fw_check: bool,
}

#[derive(ClapArgs, Debug)]
pub struct RemoveArgs {
    /// Device handle, e.g. /dev/nvme0n1
    handle: String,
}

#[derive(Debug, Serialize)]
struct RemoveOutput<'a> {
    handle: &'a str,
    retired: usize,
}

pub fn init(args: InitArgs, ctx: &Context) -> Result<(), CliError> {
    log::debug!("Executing init command: {:?}", args);
    let manager = ctx.manager()?;
    let report = manager.init(!args.no_fw_check, Duration::from_secs(args.timeout))?;
    if report.known == 0 {
        print_report(&report, ctx)?;
        return Err(CliError::Unavailable("no devices found".to_string()));
    }
    print_report(&report, ctx)
}

pub fn refresh(args: RefreshArgs, ctx: &Context) -> Result<(), CliError> {
    log::debug!("Executing refresh command: {:?}", args);
    let report = ctx.manager()?.refresh(!args.no_fw_check)?;
    print_report(&report, ctx)
}

pub fn add(args: AddArgs, ctx: &Context) -> Result<(), CliError> {
    log::debug!("Executing add command: {:?}", args);
    let report = ctx.manager()?.add_device(&args.handle, !args.no_fw_check)?;
    print_report(&report, ctx)
}

pub fn remove(args: RemoveArgs, ctx: &Context) -> Result<(), CliError> {
    log::debug!("Executing remove command: {:?}", args);
    let retired = ctx.manager()?.remove_device(&args.handle)?;
    if ctx.json {
        print_json(&RemoveOutput {
            handle: &args.handle,
            retired,
        })
    } else {
        println!("Removed {} ({} records retired)", args.handle, retired);
        Ok(())
    }
}

fn print_report(report: &ScanReport, ctx: &Context) -> Result<(), CliError> {
    if ctx.json {
        return print_json(report);
    }

    println!("Devices known: {}", report.known);
    println!(
        "Records: {} added, {} updated, {} retired",
        report.added, report.updated, report.retired
    );
    for handle in &report.transport_errors {
        println!("  skipped {} (unreadable)", handle);
    }
    for handle in &report.duplicates {
        println!("  skipped {} (duplicate identity)", handle);
    }
    for handle in &report.incompatible {
        println!("  excluded {} (unsupported firmware)", handle);
    }
    if report.lock_timeouts > 0 {
        println!("  {} records busy", report.lock_timeouts);
    }
    Ok(())
}
