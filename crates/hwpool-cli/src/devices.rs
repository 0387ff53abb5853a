// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Registry inspection with class filtering.

use crate::error::CliError;
use crate::utils::{print_json, Context};
use clap::Args as ClapArgs;
use hwpool::{DeviceClass, DeviceRecord, ModuleId};
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct HandlesArgs {
    /// Maximum number of handles to list
    #[arg(short, long, default_value = "128")]
    max: usize,
}

#[derive(ClapArgs, Debug)]
pub struct ListArgs {
    /// Show only this class (decoder, encoder, scaler, ai)
    #[arg(short, long)]
    class: Option<DeviceClass>,

    /// Include retired and firmware-excluded records
    #[arg(short, long)]
    all: bool,

    /// Show capabilities and instances
    #[arg(short, long)]
    detail: bool,
}

#[derive(ClapArgs, Debug)]
pub struct InfoArgs {
    /// Device class (decoder, encoder, scaler, ai)
    class: DeviceClass,

    /// Module id
    module_id: ModuleId,
}

#[derive(ClapArgs, Debug)]
pub struct PoolArgs {}

#[derive(Debug, Serialize)]
struct Summary {
    total_records: usize,
    decoders: usize,
    encoders: usize,
    scalers: usize,
    ai: usize,
}

#[derive(Debug, Serialize)]
struct ListOutput {
    devices: Vec<DeviceRecord>,
    summary: Summary,
}

#[derive(Debug, Serialize)]
struct PoolQueue {
    class: DeviceClass,
    count: usize,
    module_ids: Vec<ModuleId>,
}

#[derive(Debug, Serialize)]
struct PoolOutput {
    queues: Vec<PoolQueue>,
    present_units: usize,
    next_module_id: ModuleId,
}

pub fn handles(args: HandlesArgs, ctx: &Context) -> Result<(), CliError> {
    log::debug!("Executing handles command: {:?}", args);
    let handles = ctx.manager()?.local_device_handles(args.max)?;
    if ctx.json {
        return print_json(&handles);
    }
    println!("{} device handles", handles.len());
    for handle in handles {
        println!("  {}", handle);
    }
    Ok(())
}

pub fn list(args: ListArgs, ctx: &Context) -> Result<(), CliError> {
    log::debug!("Executing list command: {:?}", args);
    let manager = ctx.manager()?;

    let devices: Vec<DeviceRecord> = manager
        .list_all_devices(args.all)?
        .into_iter()
        .filter(|r| args.class.map_or(true, |class| r.class == class))
        .collect();

    let count = |class| devices.iter().filter(|r| r.class == class).count();
    let output = ListOutput {
        summary: Summary {
            total_records: devices.len(),
            decoders: count(DeviceClass::Decoder),
            encoders: count(DeviceClass::Encoder),
            scalers: count(DeviceClass::Scaler),
            ai: count(DeviceClass::Ai),
        },
        devices,
    };

    if ctx.json {
        return print_json(&output);
    }

    if output.devices.is_empty() {
        println!("No devices registered");
        return Ok(());
    }
    for class in DeviceClass::ALL {
        let records: Vec<&DeviceRecord> =
            output.devices.iter().filter(|r| r.class == class).collect();
        if records.is_empty() {
            continue;
        }
        println!("{}s:", class);
        for record in records {
            print_record(record, args.detail);
        }
    }
    Ok(())
}

pub fn info(args: InfoArgs, ctx: &Context) -> Result<(), CliError> {
    log::debug!("Executing info command: {:?}", args);
    let record = ctx.manager()?.device_info(args.class, args.module_id)?;
    if ctx.json {
        return print_json(&record);
    }
    print_record(&record, true);
    Ok(())
}

pub fn pool(args: PoolArgs, ctx: &Context) -> Result<(), CliError> {
    log::debug!("Executing pool command: {:?}", args);
    let index = ctx.manager()?.device_pool()?;

    let output = PoolOutput {
        queues: DeviceClass::ALL
            .iter()
            .map(|&class| PoolQueue {
                class,
                count: index.count(class),
                module_ids: index.ids(class).to_vec(),
            })
            .collect(),
        present_units: index.present_units(),
        next_module_id: index.next_module_id(),
    };

    if ctx.json {
        return print_json(&output);
    }
    for queue in &output.queues {
        println!("{:>8}: {} {:?}", queue.class, queue.count, queue.module_ids);
    }
    println!("Units present: {}", output.present_units);
    println!("Next module id: {}", output.next_module_id);
    Ok(())
}

fn print_record(record: &DeviceRecord, detail: bool) {
    let state = if record.retired { " [retired]" } else { "" };
    println!("  {}{}", record, state);
    if !detail {
        return;
    }

    println!("    serial:        {}", record.serial_number);
    println!("    model:         {}", record.model_number);
    println!(
        "    firmware:      {} ({})",
        record.fw_rev, record.compatibility
    );
    if !record.fw_info.branch_name.is_empty() {
        println!("    branch:        {}", record.fw_info.branch_name);
    }
    if !record.blk_name.is_empty() {
        println!("    block device:  {}", record.blk_name);
    }
    println!("    max fps (4K):  {}", record.max_fps_4k);
    for cap in &record.capabilities {
        println!(
            "    {:<6} {}x{} - {}x{} {}",
            cap.codec.name(),
            cap.min_width,
            cap.min_height,
            cap.max_width,
            cap.max_height,
            cap.profiles
        );
    }
    for inst in &record.sw_instances {
        println!(
            "    instance {:>3}: {} {}x{}@{} {:?}",
            inst.id,
            inst.codec.name(),
            inst.width,
            inst.height,
            inst.fps,
            inst.status
        );
    }
}
