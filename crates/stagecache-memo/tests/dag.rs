//! Date-partitioned stage graphs: B(date) depends on A(date) and C(date).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;
use arrow::array::{Array, ArrayRef, Int64Array, StringArray};
use stagecache_core::{MemoError, Table, table_from_columns};
use stagecache_memo::{AsyncMemoizedStage, AsyncMemoizer, KeyPolicy, Memoizer, StageStatus, gather};
use stagecache_store::{AsyncBlobStore, BlobStore, LocalStore, MemoryStore, SpawnBlocking};

fn numbers(values: Vec<i64>) -> Table {
    table_from_columns(vec![("n", Arc::new(Int64Array::from(values)) as ArrayRef)]).unwrap()
}

fn at(stage: &'static str) -> KeyPolicy<String> {
    KeyPolicy::derived(move |date: &String| format!("store://data/{date}/{stage}"))
}

fn sum(tables: &[Table]) -> Table {
    let total = tables
        .iter()
        .map(|t| {
            let col = t.column(0).unwrap();
            let ints = col.as_any().downcast_ref::<Int64Array>().unwrap();
            ints.values().iter().sum::<i64>()
        })
        .sum::<i64>();
    numbers(vec![total])
}

struct Graph {
    memo: AsyncMemoizer<MemoryStore>,
    a: AsyncMemoizedStage<String, MemoryStore>,
    b: AsyncMemoizedStage<String, MemoryStore>,
    c: AsyncMemoizedStage<String, MemoryStore>,
    a_calls: Arc<AtomicUsize>,
    b_calls: Arc<AtomicUsize>,
    c_calls: Arc<AtomicUsize>,
}

fn graph(a_fails: Arc<AtomicBool>) -> Graph {
    let memo = AsyncMemoizer::new(Arc::new(MemoryStore::new()));
    let a_calls = Arc::new(AtomicUsize::new(0));
    let b_calls = Arc::new(AtomicUsize::new(0));
    let c_calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&a_calls);
    let a = memo.memoize("A", at("A"), move |_date: String| {
        counter.fetch_add(1, Ordering::SeqCst);
        let fail = a_fails.load(Ordering::SeqCst);
        async move {
            if fail {
                bail!("source system returned no rows");
            }
            Ok(numbers(vec![1, 2]))
        }
    });

    let counter = Arc::clone(&c_calls);
    let c = memo.memoize("C", at("C"), move |_date: String| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(numbers(vec![10]))
        }
    });

    let counter = Arc::clone(&b_calls);
    let (up_a, up_c) = (a.clone(), c.clone());
    let b = memo.memoize("B", at("B"), move |date: String| {
        counter.fetch_add(1, Ordering::SeqCst);
        let (a, c) = (up_a.clone(), up_c.clone());
        async move {
            let inputs = gather([a.call(date.clone()), c.call(date)]).await?;
            Ok(sum(&inputs))
        }
    });

    Graph {
        memo,
        a,
        b,
        c,
        a_calls,
        b_calls,
        c_calls,
    }
}

#[tokio::test]
async fn repeated_call_computes_once() {
    let g = graph(Arc::new(AtomicBool::new(false)));
    let date = "20240101".to_string();

    g.a.call(date.clone()).await.unwrap();
    g.a.call(date.clone()).await.unwrap();
    assert_eq!(g.a_calls.load(Ordering::SeqCst), 1);
    assert!(
        AsyncBlobStore::exists(g.memo.store().as_ref(), &g.a.key(&date).unwrap())
            .await
            .unwrap()
    );
    assert_eq!(
        g.memo.store().keys(),
        vec!["store://data/20240101/A".to_string()]
    );
}

#[tokio::test]
async fn downstream_uses_both_upstreams() {
    let g = graph(Arc::new(AtomicBool::new(false)));
    let date = "20240101".to_string();

    assert_eq!(g.b.call(date.clone()).await.unwrap(), numbers(vec![13]));
    assert_eq!(g.b.call(date.clone()).await.unwrap(), numbers(vec![13]));
    assert_eq!(g.a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(g.b_calls.load(Ordering::SeqCst), 1);
    assert_eq!(g.c_calls.load(Ordering::SeqCst), 1);
    assert_eq!(g.memo.store().len(), 3);

    // A new partition recomputes everything.
    g.b.call("20240102".to_string()).await.unwrap();
    assert_eq!(g.a_calls.load(Ordering::SeqCst), 2);
    assert_eq!(g.memo.store().len(), 6);
}

#[tokio::test]
async fn failing_upstream_fails_downstream_but_sibling_is_cached() {
    let a_fails = Arc::new(AtomicBool::new(true));
    let g = graph(Arc::clone(&a_fails));
    let date = "20240101".to_string();

    let err = g.b.call(date.clone()).await.unwrap_err();
    assert_eq!(err.failed_stage(), Some("A"));
    assert!(matches!(err, MemoError::ComputationFailed { .. }));

    // C was dispatched alongside A and still completes.
    g.c.call(date.clone()).await.unwrap();
    assert_eq!(g.c_calls.load(Ordering::SeqCst), 1);
    assert_eq!(g.c.status(&date).await.unwrap(), StageStatus::Cached);
    assert_eq!(g.a.status(&date).await.unwrap(), StageStatus::NeedsRun);
    assert_eq!(g.b.status(&date).await.unwrap(), StageStatus::NeedsRun);
    assert!(g.memo.registry().is_empty());

    // Once A recovers, only A and B run.
    a_fails.store(false, Ordering::SeqCst);
    assert_eq!(g.b.call(date).await.unwrap(), numbers(vec![13]));
    assert_eq!(g.a_calls.load(Ordering::SeqCst), 2);
    assert_eq!(g.b_calls.load(Ordering::SeqCst), 2);
    assert_eq!(g.c_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_downstreams_share_upstreams() {
    let g = graph(Arc::new(AtomicBool::new(false)));
    let date = "20240101".to_string();

    let calls: Vec<_> = (0..8).map(|_| g.b.call(date.clone())).collect();
    let tables = gather(calls).await.unwrap();

    assert!(tables.iter().all(|t| *t == numbers(vec![13])));
    assert_eq!(g.a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(g.b_calls.load(Ordering::SeqCst), 1);
    assert_eq!(g.c_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn local_store_through_blocking_pool() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SpawnBlocking::new(LocalStore::new(dir.path())));
    let memo = AsyncMemoizer::new(store);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let stage = memo.memoize(
        "orders",
        KeyPolicy::partitioned("s3://mybucket", "orders.csv"),
        move |_date: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(numbers(vec![4, 5])) }
        },
    );

    let date = "20240101".to_string();
    stage.call(date.clone()).await.unwrap();
    assert!(dir.path().join("mybucket/20240101/orders.csv").is_file());
    assert_eq!(stage.call(date).await.unwrap(), numbers(vec![4, 5]));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn csv_stage_reads_back_what_it_returned() {
    let dir = tempfile::tempdir().unwrap();
    let memo = AsyncMemoizer::new(Arc::new(SpawnBlocking::new(LocalStore::new(dir.path()))));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let stage = memo.memoize(
        "customers",
        KeyPolicy::partitioned("s3://mybucket", "customers.csv"),
        move |_date: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                table_from_columns(vec![
                    ("zip", Arc::new(StringArray::from(vec!["01234", "99501"])) as ArrayRef),
                    ("name", Arc::new(StringArray::from(vec![Some("Ann"), None])) as ArrayRef),
                ])
                .map_err(anyhow::Error::from)
            }
        },
    );

    let date = "20240101".to_string();
    let first = stage.call(date.clone()).await.unwrap();
    let second = stage.call(date).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert_eq!(first.column_names(), vec!["zip", "name"]);
}

#[test]
fn sync_chain() {
    let memo = Memoizer::new(Arc::new(MemoryStore::new()));
    let a_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&a_calls);
    let a = Arc::new(memo.memoize("A", at("A"), move |_: &String| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(numbers(vec![1, 2]))
    }));
    let c = Arc::new(memo.memoize("C", at("C"), |_: &String| Ok(numbers(vec![10]))));
    let (up_a, up_c) = (Arc::clone(&a), Arc::clone(&c));
    let b = memo.memoize("B", at("B"), move |date: &String| {
        Ok(sum(&[up_a.call(date)?, up_c.call(date)?]))
    });

    let date = "20240101".to_string();
    assert_eq!(b.call(&date).unwrap(), numbers(vec![13]));
    assert_eq!(a.call(&date).unwrap(), numbers(vec![1, 2]));
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert!(BlobStore::exists(memo.store().as_ref(), &b.key(&date).unwrap()).unwrap());
    assert_eq!(memo.stats().misses, 3);
    assert_eq!(memo.stats().hits, 1);
}
