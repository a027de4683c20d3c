//! Build error taxonomy.
//!
//! The sequential phases (ingestion through tiling) fail fast with one of
//! these variants. Invariant violations inside the parallel tile writer are
//! logged and do not abort the build, so they have no variant here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// A source node id exceeded the id-table maximum. Raise the maximum
    /// and re-run.
    #[error("node id {id} exceeds the id-table maximum {max}")]
    IdOutOfRange { id: u64, max: u64 },

    #[error("failed to read input dump: {0}")]
    Parse(#[from] osmpbf::Error),

    #[error("tag transform failed: {0}")]
    TagTransform(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
