//! Fan-out over independent memoized calls

use futures_util::future::{self, BoxFuture};
use stagecache_core::{MemoError, Table};
use tokio::task::JoinError;

use crate::registry::MemoResult;

pub(crate) fn join_error(e: JoinError) -> MemoError {
    let message = if e.is_panic() {
        "stage task panicked".to_string()
    } else {
        e.to_string()
    };
    MemoError::TaskFailed { message }
}

/// Run every call as its own task and collect the results in order.
///
/// Returns the first failure as soon as it is observed. Calls still running
/// at that point are detached rather than cancelled, so they finish and
/// populate the store. Must be called from within a tokio runtime.
pub async fn gather<I>(calls: I) -> Result<Vec<Table>, MemoError>
where
    I: IntoIterator<Item = BoxFuture<'static, MemoResult>>,
{
    let handles = calls.into_iter().map(|call| {
        let handle = tokio::spawn(call);
        async move { handle.await.map_err(join_error)? }
    });
    future::try_join_all(handles).await
}
