//! stagecache-memo: memoize pure table-producing stages to a blob store
//!
//! ```text
//! call(args) ─▶ key = policy(args) ─▶ store.read(key)
//!                                      ├─ Ok(table)  ─▶ return table        (hit)
//!                                      ├─ NotFound   ─▶ stage(args)
//!                                      │                 ─▶ store.write(key)
//!                                      │                 ─▶ return table    (miss)
//!                                      └─ other err  ─▶ return err          (never recompute)
//! ```
//!
//! [`Memoizer`] does this synchronously. [`AsyncMemoizer`] does it on tokio
//! and coalesces concurrent calls for the same key through an
//! [`InFlightRegistry`]; [`gather`] fans out sibling calls as tasks.

pub mod concurrent;
pub mod gather;
pub mod hash;
pub mod key;
pub mod memoizer;
pub mod registry;
pub mod stats;

pub use concurrent::{AsyncMemoizedStage, AsyncMemoizer};
pub use gather::gather;
pub use key::{KeyPolicy, Partition, StageId};
pub use memoizer::{MemoizedStage, Memoizer, MemoizerOptions, StageStatus};
pub use registry::{Claim, ClaimGuard, InFlightRegistry, MemoResult};
pub use stats::{MemoStats, StatsSnapshot};
