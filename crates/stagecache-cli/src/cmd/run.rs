//! `stagecache run` - produce the jaffle shop models for one date

use std::time::Instant;

use anyhow::Result;
use clap::Args;
use stagecache_memo::MemoizerOptions;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Partition date as YYYYMMDD (default: today)
    #[arg(long)]
    pub date: Option<String>,

    /// Force re-run all stages (ignore cache)
    #[arg(long)]
    pub force: bool,

    /// Show stage status without executing
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn run(args: RunArgs, config: &Config) -> Result<()> {
    let date = super::parse_date(args.date.as_deref())?;
    let store = super::open_store(config)?;
    let (memo, pipeline) = super::pipeline(
        config,
        store,
        MemoizerOptions { force: args.force },
    )?;

    let plan = pipeline.plan(date).await?;
    println!("=== Pipeline Plan ===");
    println!("{}", super::plan_table(&plan));
    println!();

    if args.dry_run {
        println!("(dry-run mode, no execution)");
        return Ok(());
    }

    let started = Instant::now();
    let outputs = pipeline.run(date).await?;
    log::info!("Run finished in {:.1?}", started.elapsed());

    println!(
        "customers: {} rows x {} cols",
        outputs.customers.num_rows(),
        outputs.customers.num_columns()
    );
    println!(
        "orders:    {} rows x {} cols",
        outputs.orders.num_rows(),
        outputs.orders.num_columns()
    );
    println!("{}", memo.stats());
    Ok(())
}
