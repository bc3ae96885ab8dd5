// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The `subvol` command line: argument parsing and command execution.

pub mod output;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use subvol_config::{OutputFormat, SubvolConfig};
use subvol_core::Scope;
use subvol_ioctl::{is_subvolume, Filesystem};
use subvol_logging::CliLoggingArgs;
use tracing::debug;
use uuid::Uuid;

pub use clap::Parser;

use crate::output::FsReport;

#[derive(clap::Parser, Debug)]
#[command(
    name = "subvol",
    about = "List and look up btrfs subvolumes",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file to use instead of the per-user one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Bytes requested per tree search call
    #[arg(long, global = true)]
    pub search_buffer_size: Option<usize>,

    #[command(flatten)]
    pub logging: CliLoggingArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// List subvolumes with their paths
    List(ListArgs),
    /// Show one subvolume
    Show(ShowArgs),
    /// Show filesystem information for a mount
    FsInfo(FsInfoArgs),
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Any directory on the mounted filesystem
    pub mount: PathBuf,

    /// Only list read-only subvolumes
    #[arg(long)]
    pub readonly_only: bool,

    /// Only list this subvolume and the ones below it
    #[arg(long, value_name = "ID")]
    pub subtree: Option<u64>,

    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    pub mount: PathBuf,

    #[command(flatten)]
    pub target: ShowTarget,

    #[arg(long)]
    pub json: bool,
}

/// Exactly one way of naming the subvolume to show
#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
pub struct ShowTarget {
    #[arg(long)]
    pub id: Option<u64>,

    #[arg(long)]
    pub uuid: Option<Uuid>,

    #[arg(long, value_name = "UUID")]
    pub received_uuid: Option<Uuid>,

    /// A path inside the subvolume
    #[arg(long)]
    pub path: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct FsInfoArgs {
    pub mount: PathBuf,

    #[arg(long)]
    pub json: bool,
}

impl Commands {
    pub fn json(&self) -> bool {
        match self {
            Commands::List(args) => args.json,
            Commands::Show(args) => args.json,
            Commands::FsInfo(args) => args.json,
        }
    }
}

impl Cli {
    /// Options given on the command line, as configuration overrides
    pub fn config_flags(&self) -> Vec<(&'static str, Value)> {
        let mut flags = Vec::new();
        if let Some(size) = self.search_buffer_size {
            flags.push(("search-buffer-size", json!(size)));
        }
        if let Some(level) = self.logging.log_level {
            flags.push(("log-level", json!(level.to_string())));
        }
        if let Some(format) = self.logging.log_format {
            flags.push(("log-format", json!(format.to_string())));
        }
        if self.command.json() {
            flags.push(("output", json!("json")));
        }
        flags
    }
}

fn open(mount: &Path, config: &SubvolConfig) -> Result<Filesystem> {
    let fs = Filesystem::open(mount, true)
        .with_context(|| format!("opening {}", mount.display()))?;
    Ok(fs.with_options(config.search_options()))
}

/// Execute `command`, writing its result to `out`.
pub fn run<W: Write>(command: &Commands, config: &SubvolConfig, out: &mut W) -> Result<()> {
    match command {
        Commands::List(args) => list(args, config, out),
        Commands::Show(args) => show(args, config, out),
        Commands::FsInfo(args) => fs_info(args, config.output, out),
    }
}

fn list<W: Write>(args: &ListArgs, config: &SubvolConfig, out: &mut W) -> Result<()> {
    let fs = open(&args.mount, config)?;
    let scope = args.subtree.map_or(Scope::All, Scope::Subtree);
    let readonly_only = args.readonly_only;
    let listed = fs
        .subvolumes()
        .list_scope(scope, |info| !readonly_only || info.is_read_only())
        .with_context(|| format!("listing subvolumes of {}", args.mount.display()))?;
    debug!(operation = "cli_list", count = listed.len(), "Listing complete");
    output::write_list(out, &listed, config.output)
}

fn show<W: Write>(args: &ShowArgs, config: &SubvolConfig, out: &mut W) -> Result<()> {
    let fs = open(&args.mount, config)?;
    let subvolumes = fs.subvolumes();
    let target = &args.target;
    let found = if let Some(id) = target.id {
        subvolumes.by_id(id)
    } else if let Some(uuid) = &target.uuid {
        subvolumes.by_uuid(uuid)
    } else if let Some(uuid) = &target.received_uuid {
        subvolumes.by_received_uuid(uuid)
    } else if let Some(path) = &target.path {
        subvolumes.by_path(path)
    } else {
        bail!("one of --id, --uuid, --received-uuid or --path is required");
    };
    let info = found.context("looking up subvolume")?;
    output::write_detail(out, &info, config.output)
}

fn fs_info<W: Write>(args: &FsInfoArgs, format: OutputFormat, out: &mut W) -> Result<()> {
    let fs = Filesystem::open(&args.mount, true)
        .with_context(|| format!("opening {}", args.mount.display()))?;
    let report = FsReport {
        path: args.mount.clone(),
        subvolume_id: fs.subvolume_id()?,
        read_only: fs.subvolume_flags()?.is_read_only(),
        subvolume_root: is_subvolume(&args.mount)
            .with_context(|| format!("checking {}", args.mount.display()))?,
        info: fs.info()?,
        features: fs.features()?,
        supported_features: fs.supported_features()?,
        devices: fs.devices()?,
        space: fs.space_info()?,
    };
    debug!(
        operation = "cli_fs_info",
        devices = report.devices.len(),
        spaces = report.space.len(),
        "Filesystem report complete"
    );
    output::write_fs_report(out, &report, format)
}
