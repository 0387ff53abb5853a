// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils::{parse_resolution, print_json, Context};
use clap::Args as ClapArgs;
use hwpool::{Codec, DeviceClass, ModuleId};
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct AvailableArgs {
    /// Device class (decoder, encoder, scaler, ai)
    #[arg(short, long, default_value = "encoder")]
    class: DeviceClass,

    /// Codec (h264, h265, vp9, jpeg, av1)
    #[arg(long, default_value = "h264")]
    codec: Codec,

    /// Resolution (WxH)
    #[arg(short, long, default_value = "1920x1080")]
    resolution: String,

    /// Frame rate
    #[arg(short, long, default_value = "30")]
    fps: u32,
}

#[derive(ClapArgs, Debug)]
pub struct CheckArgs {
    /// Device class (decoder, encoder, scaler, ai)
    class: DeviceClass,

    /// Module id
    module_id: ModuleId,
}

#[derive(Debug, Serialize)]
struct AvailableOutput {
    class: DeviceClass,
    module_id: Option<ModuleId>,
}

#[derive(Debug, Serialize)]
struct CheckOutput {
    class: DeviceClass,
    module_id: ModuleId,
    available: bool,
}

pub fn available(args: AvailableArgs, ctx: &Context) -> Result<(), CliError> {
    log::debug!("Executing available command: {:?}", args);
    let (width, height) = parse_resolution(&args.resolution)?;
    let module_id =
        ctx.manager()?
            .available_device(width, height, args.fps, args.codec, args.class)?;

    if ctx.json {
        print_json(&AvailableOutput {
            class: args.class,
            module_id,
        })?;
    } else if let Some(id) = module_id {
        println!("{}", id);
    }

    match module_id {
        Some(_) => Ok(()),
        None => Err(CliError::Unavailable(format!(
            "no {} can take {} {}@{}",
            args.class, args.codec, args.resolution, args.fps
        ))),
    }
}

pub fn check(args: CheckArgs, ctx: &Context) -> Result<(), CliError> {
    log::debug!("Executing check command: {:?}", args);
    let available = ctx
        .manager()?
        .check_device_available(args.module_id, args.class);

    if ctx.json {
        print_json(&CheckOutput {
            class: args.class,
            module_id: args.module_id,
            available,
        })?;
    } else {
        println!(
            "{} {} {}",
            args.class,
            args.module_id,
            if available { "available" } else { "unavailable" }
        );
    }

    if available {
        Ok(())
    } else {
        Err(CliError::Unavailable(format!(
            "{} {}",
            args.class, args.module_id
        )))
    }
}
