//! Recload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared building blocks for the recload workspace members.
//!
//! # Overview
//!
//! - **Configuration**: immutable YAML-backed tree with dot-path lookup
//! - **Error Handling**: common error type and result alias
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Checksums**: content hashing for persisted records
//!
//! # Example
//!
//! ```no_run
//! use recload_common::{Configuration, Result};
//!
//! fn data_path() -> Result<String> {
//!     let config = Configuration::load("settings.yml")?;
//!     Ok(config.string("processes.companies.datasource.data-path", "./data"))
//! }
//! ```

pub mod checksum;
pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::Configuration;
pub use error::{Error, Result};
