//! Raw seed tables for the jaffle shop

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use stagecache_core::{Codec, Format, Table};

/// Upstream CSV seeds published with the dbt jaffle_shop project.
pub const DEFAULT_SEED_BASE_URL: &str =
    "https://raw.githubusercontent.com/dbt-labs/jaffle_shop/main/seeds";

/// Seed table names, each fetched as `{name}.csv`.
pub const SEEDS: [&str; 3] = ["raw_customers", "raw_orders", "raw_payments"];

/// Where raw tables come from.
pub trait SeedSource: Send + Sync {
    fn fetch<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Table>>;
}

/// Downloads `{base_url}/{name}.csv` and parses it with a header row.
#[derive(Debug, Clone)]
pub struct HttpSeeds {
    client: reqwest::Client,
    base_url: String,
    codec: Codec,
}

impl HttpSeeds {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            codec: Codec::default(),
        })
    }

    pub fn url_for(&self, name: &str) -> String {
        format!("{}/{name}.csv", self.base_url)
    }

    async fn fetch_csv(&self, name: &str) -> Result<Table> {
        let url = self.url_for(name);
        log::info!("Downloading seed {name} from {url}");
        let body = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("Failed to GET {url}"))?
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {url}"))?;
        self.codec
            .decode(body, Format::Csv)
            .with_context(|| format!("Failed to parse {url} as CSV"))
    }
}

impl SeedSource for HttpSeeds {
    fn fetch<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Table>> {
        Box::pin(self.fetch_csv(name))
    }
}

/// Seeds held in memory, for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct FixedSeeds {
    tables: FxHashMap<String, Table>,
}

impl FixedSeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, table: Table) -> Self {
        self.tables.insert(name.to_string(), table);
        self
    }

    /// Parse CSV text for `name`.
    pub fn with_csv(self, name: &str, csv: &str) -> Result<Self> {
        let table = Codec::default()
            .decode(bytes::Bytes::copy_from_slice(csv.as_bytes()), Format::Csv)
            .with_context(|| format!("Failed to parse seed {name}"))?;
        Ok(self.with(name, table))
    }
}

impl SeedSource for FixedSeeds {
    fn fetch<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Table>> {
        let result = self
            .tables
            .get(name)
            .cloned()
            .with_context(|| format!("No seed named {name}"));
        Box::pin(async move { result })
    }
}
