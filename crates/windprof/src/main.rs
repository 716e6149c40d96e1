use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use windprof_core::{DeploymentRegistry, HarmoniseConfig, StationIndex, TimeWindow};

#[derive(Parser, Debug)]
#[command(author, version, about = "Doppler wind-profile harmonisation tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate deployment metadata, site metadata and the processing configuration
    Validate(ValidateArgs),
    /// Show which instrument serves each station over a time window
    Roster(RosterArgs),
}

#[derive(Args, Debug)]
struct MetadataArgs {
    /// Deployment metadata JSON file
    #[arg(long)]
    deployments: PathBuf,
    /// Station site metadata JSON file
    #[arg(long)]
    stations: PathBuf,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    #[command(flatten)]
    metadata: MetadataArgs,
    /// Processing configuration TOML; built-in defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RosterArgs {
    #[command(flatten)]
    metadata: MetadataArgs,
    /// Window start, RFC 3339
    #[arg(long)]
    start: DateTime<Utc>,
    /// Window end, RFC 3339
    #[arg(long)]
    end: DateTime<Utc>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate(args) => handle_validate(args),
        Command::Roster(args) => handle_roster(args),
    }
}

fn handle_validate(args: ValidateArgs) -> Result<()> {
    let (registry, stations) = load_metadata(&args.metadata)?;
    let config = load_config(args.config.as_deref())?;

    // The pipeline fails these stations one by one; catch them up front.
    let missing: Vec<&str> = registry
        .station_codes()
        .into_iter()
        .filter(|code| stations.get(code).is_none())
        .collect();
    if !missing.is_empty() {
        bail!(
            "deployed stations without site metadata: {}",
            missing.join(", ")
        );
    }

    println!(
        "{} deployments across {} stations, {} sites on file.",
        registry.len(),
        registry.station_codes().len(),
        stations.len()
    );
    println!(
        "Grid {}..{} m at {} m resolution, {} s windows over {} s periods.",
        config.grid.min_height_m,
        config.grid.max_height_m,
        config.grid.resolution_m,
        config.aggregation_window_s,
        config.period_s
    );
    println!("Metadata and configuration are valid.");
    Ok(())
}

fn handle_roster(args: RosterArgs) -> Result<()> {
    if args.end <= args.start {
        bail!("window end {} must be after start {}", args.end, args.start);
    }
    let (registry, stations) = load_metadata(&args.metadata)?;
    let window = TimeWindow::new(args.start, args.end);

    println!("Roster for {window}:");
    for code in registry.station_codes() {
        let name = stations
            .get(code)
            .map(|s| s.name.as_str())
            .unwrap_or("unknown site");
        match registry.resolve(code, &window) {
            Ok(Some(dep)) => println!(
                "  {code} ({name}): {} [{}] at {} m ASL",
                dep.instrument_serial, dep.model, dep.above_sea_level_m
            ),
            Ok(None) => println!("  {code} ({name}): no instrument deployed"),
            Err(error) => println!("  {code} ({name}): {error}"),
        }
    }
    Ok(())
}

fn load_metadata(args: &MetadataArgs) -> Result<(DeploymentRegistry, StationIndex)> {
    let registry = DeploymentRegistry::from_json_path(&args.deployments)
        .with_context(|| format!("loading deployments from {}", args.deployments.display()))?;
    let stations = StationIndex::from_json_path(&args.stations)
        .with_context(|| format!("loading stations from {}", args.stations.display()))?;
    info!(
        deployments = registry.len(),
        stations = stations.len(),
        "metadata loaded"
    );
    Ok((registry, stations))
}

fn load_config(path: Option<&Path>) -> Result<HarmoniseConfig> {
    match path {
        Some(path) => HarmoniseConfig::from_toml_path(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(HarmoniseConfig::default()),
    }
}
