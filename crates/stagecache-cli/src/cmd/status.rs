//! `stagecache status` - cache state of every stage for a date

use anyhow::Result;
use clap::Args;
use stagecache_memo::{MemoizerOptions, StageStatus};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Partition date as YYYYMMDD (default: today)
    #[arg(long)]
    pub date: Option<String>,
}

pub async fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let date = super::parse_date(args.date.as_deref())?;
    let store = super::open_store(config)?;
    let (_memo, pipeline) = super::pipeline(config, store, MemoizerOptions::default())?;

    let plan = pipeline.plan(date).await?;
    let cached = plan
        .iter()
        .filter(|p| p.status == StageStatus::Cached)
        .count();
    println!("{}", super::plan_table(&plan));
    println!("{cached}/{} stages cached", plan.len());
    Ok(())
}
