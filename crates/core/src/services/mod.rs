//! Scan orchestration: worker pool, cancellation, and the scan coordinator.

pub mod pool;
pub mod scan;

pub use pool::{CancellationToken, WorkerPool};
pub use scan::{ScanCoordinator, ScanError, ScanRequest};
