//! volctl - Main entry point
//!
//! Builds a command context, runs one subcommand against it and tears the
//! context down again.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use volctl::{CommandContext, ContextBuilder, LogOptions};
use volctl_core::ConfigTree;

#[derive(Parser, Debug)]
#[command(name = "volctl")]
#[command(about = "Volume management tool context: device filtering and metadata formats")]
#[command(version)]
struct Args {
    /// System directory holding lvm.conf and the device cache
    /// (default: $LVM_SYSTEM_DIR or /etc/lvm)
    #[arg(short, long)]
    system_dir: Option<PathBuf>,

    /// Increase verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List devices that pass the device filter
    Scan,
    /// List registered metadata formats
    Formats,
    /// Forget every cached filter verdict
    WipeCache,
    /// Print the resolved settings
    Settings,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let opts = LogOptions {
        level: args.log_level,
        verbosity: args.verbose,
    };

    let mut builder = ContextBuilder::new().with_log_init(Box::new(move |cf: &ConfigTree| {
        Some(volctl::logging::install(cf, &opts))
    }));
    if let Some(dir) = args.system_dir {
        builder = builder.system_dir(dir);
    }
    let mut ctx = builder.build().context("Failed to initialise command context")?;

    info!("volctl v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Scan => scan(&mut ctx)?,
        Command::Formats => formats(&ctx),
        Command::WipeCache => wipe_cache(&mut ctx)?,
        Command::Settings => {
            let settings = toml::to_string_pretty(ctx.current_settings())?;
            print!("{}", settings);
        }
    }

    Ok(())
}

fn scan(ctx: &mut CommandContext) -> Result<()> {
    let devices = ctx.scan_devices();

    println!("Found {} devices:", devices.len());
    for device in &devices {
        let name = ctx.pool().alloc_str(&device.path_str())?;
        match (device.major(), device.minor()) {
            (Some(major), Some(minor)) => println!("  - {} [{}:{}]", name, major, minor),
            _ => println!("  - {}", name),
        }
    }

    Ok(())
}

fn formats(ctx: &CommandContext) {
    let default = ctx.default_format().name();
    let backup = ctx.backup_format().name();

    for fmt in ctx.formats().formats() {
        let mut tags = Vec::new();
        if fmt.name() == default {
            tags.push("default");
        }
        if fmt.name() == backup {
            tags.push("backup");
        }
        if fmt.is_dynamic() {
            tags.push("shared");
        }

        let features = fmt.ops().features();
        let alias = fmt.alias().map(|a| format!(" ({})", a)).unwrap_or_default();
        println!(
            "{}{} create={} read={} write={} {}",
            fmt.name(),
            alias,
            features.create,
            features.read,
            features.write,
            tags.join(",")
        );
    }
}

fn wipe_cache(ctx: &mut CommandContext) -> Result<()> {
    let entries = ctx.filter().len();
    let written = ctx.wipe_cache().context("Failed to write device cache")?;

    println!("Wiped {} cached verdicts", entries);
    if !written {
        println!("No system directory or devices/cache set: nothing written");
    }
    Ok(())
}
