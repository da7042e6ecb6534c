//! stagecache - run memoized, date-partitioned pipelines
//!
//! Every stage output is stored under a key derived from its arguments, so a
//! second run for the same date reads results back instead of recomputing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::{Backend, Config};

#[derive(Parser)]
#[command(name = "stagecache")]
#[command(about = "Run memoized, date-partitioned pipelines")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Config file path (default: ./stagecache.toml or ~/.config/stagecache/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Blob store backend
    #[arg(long, global = true, value_enum)]
    backend: Option<Backend>,

    /// Root directory of the local store
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Endpoint of the HTTP store
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Request timeout in seconds for HTTP stores and seed downloads
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the jaffle shop pipeline for one date
    Run(cmd::run::RunArgs),
    /// Show which stages are cached for a date
    Status(cmd::status::StatusArgs),
    /// Print a stored table
    Show(cmd::show::ShowArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    stagecache_core::init_logging(cli.quiet, cli.debug);

    let mut config = if let Some(path) = &cli.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    // CLI overrides
    if let Some(backend) = cli.backend {
        config.store.backend = backend;
    }
    if let Some(root) = cli.root {
        config.store.root = root;
    }
    if let Some(endpoint) = cli.endpoint {
        config.store.endpoint = Some(endpoint);
    }
    if let Some(timeout) = cli.timeout {
        config.store.timeout_secs = timeout;
    }

    if let Command::Config = cli.command {
        print_config(&config);
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(async {
        match cli.command {
            Command::Run(args) => cmd::run::run(args, &config).await,
            Command::Status(args) => cmd::status::run(args, &config).await,
            Command::Show(args) => cmd::show::run(args, &config).await,
            Command::Config => Ok(()),
        }
    })
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec!["Store backend", &config.store.backend.to_string()]);
    table.add_row(vec![
        "Store root",
        &config.store.root.display().to_string(),
    ]);
    table.add_row(vec![
        "Store endpoint",
        config.store.endpoint.as_deref().unwrap_or("not set"),
    ]);
    table.add_row(vec!["Timeout", &format!("{}s", config.store.timeout_secs)]);
    table.add_row(vec![
        "Compression level",
        &config.output.compression_level.to_string(),
    ]);
    table.add_row(vec!["Prefix", &config.pipeline.prefix]);
    table.add_row(vec!["Seed base URL", &config.pipeline.seed_base_url]);
    table.add_row(vec!["Format", &config.pipeline.format.to_string()]);

    eprintln!("\n{table}");
}
