// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

mod devices;
mod error;
mod firmware;
mod load;
mod query;
mod scan;
mod utils;

use clap::{Parser, Subcommand};
use error::result_to_exit_code;
use std::path::PathBuf;
use std::process::ExitCode;
use utils::Context;

/// hwpool CLI - Accelerator pool scanning, inspection and administration
#[derive(Parser)]
#[command(name = "hwpool")]
#[command(version)]
#[command(about = "hwpool CLI - Accelerator pool scanning, inspection and administration")]
#[command(long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (use RUST_LOG=debug for more)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Shared region directory (default /dev/shm/hwpool)
    #[arg(long, global = true, env = "HWPOOL_ROOT")]
    root: Option<PathBuf>,

    /// Device inventory JSON describing the present hardware
    #[arg(long, global = true, env = "HWPOOL_INVENTORY")]
    inventory: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan devices, retrying until at least one is found
    Init(scan::InitArgs),

    /// Rescan devices once and reconcile the registry
    Refresh(scan::RefreshArgs),

    /// Admit a single device by handle
    Add(scan::AddArgs),

    /// Retire a device by handle
    Remove(scan::RemoveArgs),

    /// List handles of physically present devices
    Handles(devices::HandlesArgs),

    /// List registered devices
    List(devices::ListArgs),

    /// Show one device record
    Info(devices::InfoArgs),

    /// Show the pool index
    Pool(devices::PoolArgs),

    /// Find the least loaded device able to take a workload
    Available(query::AvailableArgs),

    /// Check that a device is in the pool and answering
    Check(query::CheckArgs),

    /// Report the compatibility of a firmware revision
    FwCompat(firmware::Args),

    /// Poll device-reported load into the registry
    Load(load::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbose, cli.quiet);

    let ctx = Context {
        root: cli.root,
        inventory: cli.inventory,
        json: cli.json,
    };

    // Execute the subcommand and convert result to exit code
    let result = match cli.command {
        Commands::Init(args) => scan::init(args, &ctx),
        Commands::Refresh(args) => scan::refresh(args, &ctx),
        Commands::Add(args) => scan::add(args, &ctx),
        Commands::Remove(args) => scan::remove(args, &ctx),
        Commands::Handles(args) => devices::handles(args, &ctx),
        Commands::List(args) => devices::list(args, &ctx),
        Commands::Info(args) => devices::info(args, &ctx),
        Commands::Pool(args) => devices::pool(args, &ctx),
        Commands::Available(args) => query::available(args, &ctx),
        Commands::Check(args) => query::check(args, &ctx),
        Commands::FwCompat(args) => firmware::execute(args, &ctx),
        Commands::Load(args) => load::execute(args, &ctx),
    };

    result_to_exit_code(result)
}

/// Initialize env_logger based on verbosity flags
fn init_logging(verbose: bool, quiet: bool) {
    let env = env_logger::Env::default();

    let env = if quiet {
        env.default_filter_or("error")
    } else if verbose {
        env.default_filter_or("debug")
    } else {
        env.default_filter_or("info")
    };

    env_logger::Builder::from_env(env)
        .format_timestamp(None) // Disable timestamps for cleaner CLI output
        .format_target(false)
        .init();

    log::debug!("Logging initialized");
}
