//! Cross-translation-unit SCIP indexer for C and C++.
//!
//! C and C++ re-parse every header in every translation unit that includes
//! it, and the resulting AST can differ with the ambient macro state. This
//! crate indexes a whole compilation database without emitting conflicting
//! duplicates: a driver process hashes each header's preprocessor effect
//! per TU, elects exactly one canonical indexing TU per `(header, hash)`
//! pair, and merges the per-TU shards into one SCIP index.

pub mod cli;
pub mod compdb;
pub mod driver;
pub mod error;
pub mod indexer;
pub mod ipc;
pub mod logging;
pub mod preprocessor;
pub mod raii;
pub mod scip;
pub mod types;
pub mod worker;

pub use error::{IndexError, IndexResult};
pub use types::{AbsolutePath, FileRange, HashValue, JobId, RootPath, StableFileId};
