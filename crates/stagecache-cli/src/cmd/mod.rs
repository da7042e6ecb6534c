//! Subcommands and the wiring they share

pub mod run;
pub mod show;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use stagecache_core::Codec;
use stagecache_jaffle::{HttpSeeds, Pipeline, PipelineConfig, SeedSource, StagePlan};
use stagecache_memo::{AsyncMemoizer, MemoizerOptions, StageStatus};
use stagecache_store::{AsyncBlobStore, HttpStore, LocalStore, MemoryStore, SpawnBlocking};

use crate::config::{Backend, Config};

/// Open the configured blob store.
pub fn open_store(config: &Config) -> Result<Arc<dyn AsyncBlobStore>> {
    let codec = Codec::new(config.output.compression_level);
    let store: Arc<dyn AsyncBlobStore> = match config.store.backend {
        Backend::Memory => Arc::new(MemoryStore::with_codec(codec)),
        Backend::Local => {
            log::debug!("Local store at {}", config.store.root.display());
            Arc::new(SpawnBlocking::new(
                LocalStore::new(&config.store.root).with_codec(codec),
            ))
        }
        Backend::Http => {
            let endpoint = config
                .store
                .endpoint
                .as_deref()
                .context("store.endpoint is required for the http backend")?;
            let store = HttpStore::new(endpoint, Duration::from_secs(config.store.timeout_secs))
                .with_context(|| format!("Failed to create HTTP store for {endpoint}"))?;
            Arc::new(store.with_codec(codec))
        }
    };
    Ok(store)
}

/// Build the memoizer and the jaffle pipeline over `store`.
pub fn pipeline(
    config: &Config,
    store: Arc<dyn AsyncBlobStore>,
    options: MemoizerOptions,
) -> Result<(AsyncMemoizer, Pipeline)> {
    let seeds = HttpSeeds::new(
        &config.pipeline.seed_base_url,
        Duration::from_secs(config.store.timeout_secs),
    )?;
    let memo = AsyncMemoizer::new(store).with_options(options);
    let pipeline_config = PipelineConfig {
        prefix: config.pipeline.prefix.clone(),
        format: config.pipeline.format,
    };
    let pipeline = Pipeline::new(
        &memo,
        Arc::new(seeds) as Arc<dyn SeedSource>,
        &pipeline_config,
    );
    Ok((memo, pipeline))
}

/// Parse `YYYYMMDD`, defaulting to today.
pub fn parse_date(date: Option<&str>) -> Result<NaiveDate> {
    match date {
        Some(s) => NaiveDate::parse_from_str(s, "%Y%m%d")
            .with_context(|| format!("Invalid date {s:?}, expected YYYYMMDD")),
        None => Ok(Local::now().date_naive()),
    }
}

/// Render a stage plan as a table.
pub fn plan_table(plan: &[StagePlan]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Stage").fg(Color::Cyan),
            Cell::new("Key").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
        ]);

    for entry in plan {
        let status = match entry.status {
            StageStatus::Cached => Cell::new(entry.status.to_string()).fg(Color::Green),
            StageStatus::NeedsRun => Cell::new(entry.status.to_string()).fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(entry.stage.as_str()),
            Cell::new(entry.key.as_str()),
            status,
        ]);
    }
    table
}
