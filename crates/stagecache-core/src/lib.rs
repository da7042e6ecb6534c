//! stagecache-core - shared types for memoized pipeline stages
//!
//! Defines the tabular value passed between stages and the blob store,
//! the on-store encodings, the error taxonomy used by the memoization
//! layer, and logging setup for binaries.

pub mod codec;
pub mod error;
pub mod logging;
pub mod table;

pub use codec::{Codec, CodecError, Format};
pub use error::{MemoError, StoreError};
pub use logging::init_logging;
pub use table::{Table, table_from_columns};
