//! Binary metadata extractors.
//!
//! The scan coordinator only talks to [`MetadataExtractor`]; the PE backend is
//! the one shipped implementation. Extractors are shared across worker threads
//! and must not hold per-file state.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::BinaryMetadata;

mod image;
pub mod pe;
pub mod version;

#[cfg(test)]
pub(crate) mod fixture;

pub use pe::PeExtractor;

/// Failures that prevent a record from being produced at all.
///
/// Anything short of an unreadable file becomes a `ParseIssue` on the record.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Trait implemented by metadata extraction backends.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<BinaryMetadata, ExtractError>;
    fn name(&self) -> &'static str;
}
