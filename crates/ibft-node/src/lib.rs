//! # IBFT Node
//!
//! Runs the IBFT consensus engine against an in-memory chain. Validators
//! talk over an in-process transport, so a whole network fits in one
//! process: useful for development, demos and integration tests.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Devnet                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌────────────────┐   ┌────────────────┐                    │
//! │  │ ValidatorNode  │   │ ValidatorNode  │   ...              │
//! │  │  • processor   │   │  • processor   │                    │
//! │  │  • chain       │   │  • chain       │                    │
//! │  │  • builder     │   │  • builder     │                    │
//! │  └───────┬────────┘   └───────┬────────┘                    │
//! │          │                    │                             │
//! │  ┌───────┴────────────────────┴─────────────────────────┐  │
//! │  │                    LocalNetwork                       │  │
//! │  │  • one EventQueue per node                            │  │
//! │  │  • partitions and duplicate delivery for testing      │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin ibft-node -- devnet --validators 4 --max-height 10
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Node configuration (file + environment)
//! - [`chain`] - In-memory chain and block builder
//! - [`network`] - In-process transport
//! - [`node`] - A single validator
//! - [`devnet`] - Several validators in one process
//! - [`observability`] - Logging and transport metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use ibft_consensus::IbftConfig;
//! use ibft_node::devnet::Devnet;
//! use std::time::Duration;
//!
//! # async fn run() -> ibft_node::Result<()> {
//! let devnet = Devnet::start_local(4, IbftConfig::default())?;
//! devnet.wait_for_height(3, Duration::from_secs(30)).await?;
//! assert!(devnet.conflicting_heights().is_empty());
//! devnet.shutdown().await
//! # }
//! ```

pub mod chain;
pub mod config;
pub mod devnet;
mod error;
pub mod network;
pub mod node;
pub mod observability;

pub use error::{NodeError, Result};
