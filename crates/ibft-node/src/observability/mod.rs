//! # Observability Module
//!
//! - **Structured Logging**: JSON or pretty logs with an `EnvFilter`
//! - **Prometheus Metrics**: transport counters; consensus metrics live in
//!   [`ibft_consensus::ConsensusMetrics`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ibft_node::observability::{init_logging, LogFormat, NetworkMetrics};
//!
//! init_logging("info", LogFormat::Pretty);
//! let metrics = NetworkMetrics::new();
//! println!("{}", metrics.encode());
//! ```

mod logging;
mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{DeliveryLabels, NetworkMetrics};
