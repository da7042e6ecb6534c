//! `stagecache show` - print a stored table

use anyhow::{Context, Result};
use clap::Args;
use stagecache_store::{AsyncBlobStore, CacheKey};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Object URI, e.g. s3://mybucket/20240101/orders.csv
    pub uri: String,

    /// Maximum rows to print
    #[arg(short = 'n', long, default_value_t = 20)]
    pub limit: usize,
}

pub async fn run(args: ShowArgs, config: &Config) -> Result<()> {
    let key = CacheKey::parse(args.uri.as_str())?;
    let store = super::open_store(config)?;
    let table = store.read(&key).await?;

    let rendered = table
        .pretty(args.limit)
        .with_context(|| format!("Failed to format {key}"))?;
    println!("{rendered}");
    if table.num_rows() > args.limit {
        println!("... {} more rows", table.num_rows() - args.limit);
    }
    println!("{} rows x {} cols", table.num_rows(), table.num_columns());
    Ok(())
}
