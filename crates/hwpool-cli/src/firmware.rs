// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils::{print_json, Context};
use clap::Args as ClapArgs;
use hwpool::{Compatibility, FirmwareRevision, FirmwareTable};
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Firmware revision string, e.g. 6r3
    revision: String,
}

#[derive(Debug, Serialize)]
struct Output {
    revision: String,
    compatibility: Compatibility,
}

/// Does not touch the shared region.
pub fn execute(args: Args, ctx: &Context) -> Result<(), CliError> {
    log::debug!("Executing fw-compat command: {:?}", args);
    let revision: FirmwareRevision = args.revision.parse()?;
    let compatibility = FirmwareTable::default().check(&revision);

    if ctx.json {
        print_json(&Output {
            revision: revision.to_string(),
            compatibility,
        })
    } else {
        println!("{}: {}", revision, compatibility);
        Ok(())
    }
}
