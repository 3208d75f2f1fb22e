//! Kusto Sink Observability
//!
//! Metrics and logging setup shared by the connector crate and its binaries.
//!
//! # Usage
//!
//! ```no_run
//! use kusto_sink_observability::{logging, metrics};
//!
//! logging::init_from_env();
//! metrics::init();
//!
//! let text = metrics::gather_text();
//! println!("{}", text);
//! ```

pub mod logging;
pub mod metrics;

pub use metrics::{init as init_metrics, REGISTRY};

/// Initialize all observability components (metrics registry only; logging
/// is installed by binaries since a library must not own the global subscriber).
pub fn init() {
    metrics::init();
}
