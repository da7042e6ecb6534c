//! Run SQL over in-memory tables with DuckDB.
//!
//! Inputs are handed to DuckDB as parquet files in a scratch directory and
//! the result comes back the same way, so the engine and the rest of the
//! workspace only share the file format.

use std::fs;

use anyhow::{Context, Result};
use bytes::Bytes;
use duckdb::Connection;
use stagecache_core::{Codec, Format, Table};

use crate::sql;

/// Evaluate `query` with each `(name, table)` input visible as a view.
pub fn query(inputs: &[(&str, &Table)], query: &str) -> Result<Table> {
    let codec = Codec::default();
    let scratch = tempfile::Builder::new()
        .prefix("stagecache-duck")
        .tempdir()
        .context("Failed to create DuckDB scratch dir")?;

    let conn =
        Connection::open_in_memory().context("Failed to open DuckDB in-memory connection")?;

    for (name, table) in inputs {
        let path = scratch.path().join(format!("{name}.parquet"));
        let data = codec
            .encode(table, Format::Parquet)
            .with_context(|| format!("Failed to encode input {name}"))?;
        fs::write(&path, data).with_context(|| format!("Failed to write {}", path.display()))?;
        conn.execute_batch(&sql::create_view(name, &path))
            .with_context(|| format!("Failed to create view {name}"))?;
    }

    let out = scratch.path().join("result.parquet");
    conn.execute_batch(&sql::export(query, &out))
        .with_context(|| format!("Query failed: {query}"))?;

    let data = fs::read(&out).with_context(|| format!("Failed to read {}", out.display()))?;
    let table = codec
        .decode(Bytes::from(data), Format::Parquet)
        .context("Failed to decode DuckDB result")?;
    log::debug!(
        "duckdb: {} input(s) -> {} rows x {} cols",
        inputs.len(),
        table.num_rows(),
        table.num_columns()
    );
    Ok(table)
}

/// [`query`] on tokio's blocking pool.
pub async fn query_async(inputs: Vec<(&'static str, Table)>, sql: String) -> Result<Table> {
    tokio::task::spawn_blocking(move || {
        let views: Vec<(&str, &Table)> = inputs.iter().map(|(n, t)| (*n, t)).collect();
        query(&views, &sql)
    })
    .await
    .context("DuckDB task failed")?
}
