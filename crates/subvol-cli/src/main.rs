// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::io;

use anyhow::{Context, Result};
use subvol_cli::{run, Cli, Parser};
use subvol_config::Sources;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let sources = Sources::discover(cli.config.clone());
    let config =
        subvol_config::load(&sources, &cli.config_flags()).context("loading configuration")?;
    cli.logging.init("subvol", config.log_level, config.log_format)?;

    let stdout = io::stdout();
    run(&cli.command, &config, &mut stdout.lock())
}
