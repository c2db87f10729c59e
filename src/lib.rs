//! Tinyurl - URL shortener storage core
//!
//! This library holds the in-process storage engine of the tinyurl service and
//! the background worker that batches link deletions.
//!
//! # Architecture
//! - `storage`: storage engine, keeper backends (memory, JSON-lines file, SeaORM) and data model
//! - `worker`: deletion worker that coalesces delete requests into periodic batch writes
//! - `runtime`: wiring from configuration, graceful shutdown
//! - `config`: static configuration (TOML + environment)
//! - `system`: logging setup
//! - `errors`: error taxonomy

pub mod config;
pub mod errors;
pub mod runtime;
pub mod storage;
pub mod system;
pub mod worker;

pub use errors::{Result, TinyurlError};
pub use runtime::Runtime;
pub use storage::Storage;
pub use worker::DeletionWorker;
