//! dllscan-core
//!
//! Inventory and dependency confirmation for Windows binary images.
//!
//! The crate walks a directory for DLL-like files, extracts PE metadata
//! (architecture, version resource, imports, exports, signature presence) and,
//! when given a source tree, searches it for evidence that each library is
//! actually loaded or referenced.
//!
//! All substantive logic lives here so it is testable and reusable from
//! multiple frontends; the `dllscan` CLI is a thin layer on top.

pub mod model;
pub mod analysis;
pub mod patterns;
pub mod config;
pub mod backends;
pub mod services;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
