// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use hostpatch::{
    patch::{file, Payload},
    path::{default_config_path, default_state_dir},
    JsonSettingsFile, PatchDefinition, Patcher,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::{collections::BTreeMap, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  hostpatch [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Apply(opts) => run_apply(self.global, opts),
            Command::Restore => run_restore(self.global),
            Command::Status => run_status(self.global),
            Command::Check => run_check(self.global),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Patch host files with supplied content.
    #[command(override_usage = "hostpatch apply [options] --payload <target=file>...")]
    Apply(ApplyOptions),

    /// Undo every change made to host files and settings.
    #[command(override_usage = "hostpatch restore [options]")]
    Restore,

    /// Show whether host is currently patched.
    #[command(override_usage = "hostpatch status [options]")]
    Status,

    /// Validate patch definition and print it resolved.
    #[command(override_usage = "hostpatch check [options]")]
    Check,
}

#[derive(Args, Clone, Debug)]
struct GlobalOptions {
    /// Path to patch definition file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Directory to keep campaign state in.
    #[arg(short, long, global = true, value_name = "path")]
    pub state_dir: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ApplyOptions {
    /// Content to place inside the marker block of a target.
    #[arg(short, long, value_name = "target=file", value_parser = parse_assignment)]
    pub payload: Vec<(String, PathBuf)>,

    /// Content of the side resource written next to a target.
    #[arg(long, value_name = "target=file", value_parser = parse_assignment)]
    pub side: Vec<(String, PathBuf)>,
}

fn parse_assignment(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected <target>=<file>, got {raw:?}")),
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn open_patcher(global: GlobalOptions) -> Result<Patcher<JsonSettingsFile>> {
    let config = match global.config {
        Some(config) => config,
        None => default_config_path()?,
    };
    let state_dir = match global.state_dir {
        Some(state_dir) => state_dir,
        None => default_state_dir()?,
    };

    let definition: PatchDefinition = file::read_text(&config)
        .with_context(|| format!("cannot load patch definition {:?}", config.display()))?
        .parse::<PatchDefinition>()
        .with_context(|| format!("invalid patch definition {:?}", config.display()))?;

    // Without a host settings file, overrides land in the state directory.
    let settings_file = definition
        .host
        .settings_file
        .clone()
        .unwrap_or_else(|| state_dir.join("settings.json"));
    let settings = JsonSettingsFile::open(settings_file)?;

    Ok(Patcher::new(definition, state_dir, settings))
}

fn run_apply(global: GlobalOptions, opts: ApplyOptions) -> Result<()> {
    let mut patcher = open_patcher(global)?;

    let mut payloads = BTreeMap::new();
    for (name, path) in opts.payload {
        if patcher.definition().target(&name).is_none() {
            bail!("no target named {name:?} in patch definition");
        }
        payloads.insert(name, Payload::new(file::read_text(&path)?));
    }
    for (name, path) in opts.side {
        let payload = payloads
            .get_mut(&name)
            .ok_or_else(|| anyhow!("side resource given for {name:?} without a payload"))?;
        payload.side_resource = Some(file::read(&path)?);
    }

    let report = patcher.apply(&payloads)?;
    for (name, result) in &report.targets {
        match result {
            Ok(applied) => info!("patched {name} at {:?}", applied.path.display()),
            Err(error) => warn!("{name}: {error}"),
        }
    }

    if !report.is_complete() {
        bail!("some targets were not patched");
    }

    Ok(())
}

fn run_restore(global: GlobalOptions) -> Result<()> {
    let mut patcher = open_patcher(global)?;
    let report = patcher.restore()?;

    for name in report.best_effort() {
        warn!("{name} had no backup; marker blocks were stripped instead");
    }
    if !report.is_complete() {
        bail!("some targets could not be restored; run restore again once fixed");
    }
    info!("host restored");

    Ok(())
}

fn run_status(global: GlobalOptions) -> Result<()> {
    let patcher = open_patcher(global)?;
    if patcher.is_applied() {
        println!("applied");
    } else {
        println!("not applied");
    }

    Ok(())
}

fn run_check(global: GlobalOptions) -> Result<()> {
    let patcher = open_patcher(global)?;
    print!("{}", patcher.definition());

    Ok(())
}
