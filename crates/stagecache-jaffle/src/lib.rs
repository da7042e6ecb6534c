//! stagecache-jaffle: the jaffle shop models as a memoized, date-partitioned
//! pipeline
//!
//! ```text
//! raw_customers ─▶ stg_customers ───────────────┐
//! raw_orders    ─▶ stg_orders    ─┬────────────▶ customers
//! raw_payments  ─▶ stg_payments  ─┴─┬──────────┘
//!                                   └──────────▶ orders (also reads stg_orders)
//! ```
//!
//! Every stage is stored at `{prefix}/{YYYYMMDD}/{stage}.{ext}`. Running the
//! same date twice reads everything back instead of downloading seeds or
//! running SQL again.

pub mod duck;
pub mod seeds;
pub mod sql;

pub use seeds::{DEFAULT_SEED_BASE_URL, FixedSeeds, HttpSeeds, SEEDS, SeedSource};

use std::sync::Arc;

use chrono::NaiveDate;
use stagecache_core::{Format, MemoError, Table};
use stagecache_memo::{
    AsyncMemoizedStage, AsyncMemoizer, KeyPolicy, Partition, StageId, StageStatus, gather,
};
use stagecache_store::{AsyncBlobStore, CacheKey};

/// Default location of stage outputs.
pub const DEFAULT_PREFIX: &str = "s3://mybucket";

/// Where and how stage outputs are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// `scheme://bucket[/path]` under which date partitions live.
    pub prefix: String,
    /// Encoding of every stage output.
    pub format: Format,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            format: Format::Csv,
        }
    }
}

/// Final tables of one run.
#[derive(Debug, Clone)]
pub struct Outputs {
    pub customers: Table,
    pub orders: Table,
}

/// One stage's cache state for a date.
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub stage: StageId,
    pub key: CacheKey,
    pub status: StageStatus,
}

type Stage<S> = AsyncMemoizedStage<NaiveDate, S>;

/// The eight jaffle shop stages wired to one memoizer.
pub struct Pipeline<S: ?Sized = dyn AsyncBlobStore> {
    raw_customers: Stage<S>,
    raw_orders: Stage<S>,
    raw_payments: Stage<S>,
    stg_customers: Stage<S>,
    stg_orders: Stage<S>,
    stg_payments: Stage<S>,
    customers: Stage<S>,
    orders: Stage<S>,
}

impl<S: AsyncBlobStore + ?Sized + 'static> Pipeline<S> {
    pub fn new(
        memo: &AsyncMemoizer<S>,
        seeds: Arc<dyn SeedSource>,
        config: &PipelineConfig,
    ) -> Self {
        let policy = |stage: &str| -> KeyPolicy<NaiveDate> {
            KeyPolicy::partitioned(
                config.prefix.as_str(),
                format!("{stage}.{}", config.format.extension()),
            )
        };

        let seed = |name: &'static str| {
            let seeds = Arc::clone(&seeds);
            memo.memoize(name, policy(name), move |_date: NaiveDate| {
                let seeds = Arc::clone(&seeds);
                async move { seeds.fetch(name).await }
            })
        };
        let raw_customers = seed("raw_customers");
        let raw_orders = seed("raw_orders");
        let raw_payments = seed("raw_payments");

        let model = |name: &'static str, inputs: Vec<(&'static str, Stage<S>)>, query: String| {
            memo.memoize(name, policy(name), move |date: NaiveDate| {
                let names: Vec<&'static str> = inputs.iter().map(|(alias, _)| *alias).collect();
                let calls: Vec<_> = inputs.iter().map(|(_, stage)| stage.call(date)).collect();
                let query = query.clone();
                async move {
                    let tables = gather(calls).await?;
                    duck::query_async(names.into_iter().zip(tables).collect(), query).await
                }
            })
        };
        let stg_customers = model(
            "stg_customers",
            vec![("source", raw_customers.clone())],
            sql::stg_customers().to_string(),
        );
        let stg_orders = model(
            "stg_orders",
            vec![("source", raw_orders.clone())],
            sql::stg_orders().to_string(),
        );
        let stg_payments = model(
            "stg_payments",
            vec![("source", raw_payments.clone())],
            sql::stg_payments().to_string(),
        );
        let customers = model(
            "customers",
            vec![
                ("customers", stg_customers.clone()),
                ("orders", stg_orders.clone()),
                ("payments", stg_payments.clone()),
            ],
            sql::customers().to_string(),
        );
        let orders = model(
            "orders",
            vec![
                ("orders", stg_orders.clone()),
                ("payments", stg_payments.clone()),
            ],
            sql::orders(),
        );

        Self {
            raw_customers,
            raw_orders,
            raw_payments,
            stg_customers,
            stg_orders,
            stg_payments,
            customers,
            orders,
        }
    }

    /// All stages, upstream first.
    pub fn stages(&self) -> [&Stage<S>; 8] {
        [
            &self.raw_customers,
            &self.raw_orders,
            &self.raw_payments,
            &self.stg_customers,
            &self.stg_orders,
            &self.stg_payments,
            &self.customers,
            &self.orders,
        ]
    }

    /// Look up a stage by name.
    pub fn stage(&self, name: &str) -> Option<&Stage<S>> {
        self.stages().into_iter().find(|s| s.id().as_str() == name)
    }

    /// Produce `customers` and `orders` for `date`, running both concurrently.
    pub async fn run(&self, date: NaiveDate) -> Result<Outputs, MemoError> {
        log::info!("Running jaffle shop for {}", date.partition());
        let mut tables = gather([self.customers.call(date), self.orders.call(date)])
            .await?
            .into_iter();
        match (tables.next(), tables.next()) {
            (Some(customers), Some(orders)) => Ok(Outputs { customers, orders }),
            _ => Err(MemoError::TaskFailed {
                message: "missing pipeline output".into(),
            }),
        }
    }

    /// Cache state of every stage for `date`, without computing anything.
    pub async fn plan(&self, date: NaiveDate) -> Result<Vec<StagePlan>, MemoError> {
        let mut plan = Vec::with_capacity(8);
        for stage in self.stages() {
            plan.push(StagePlan {
                stage: stage.id().clone(),
                key: stage.key(&date)?,
                status: stage.status(&date).await?,
            });
        }
        Ok(plan)
    }
}
