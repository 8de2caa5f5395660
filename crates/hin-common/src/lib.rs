//! HIN Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging setup, and error handling for the HIN workspace.
//!
//! - **Error Handling**: [`HinError`] and its [`Result`] alias
//! - **Logging**: one place to configure the `tracing` subscriber
//! - **CRS**: the [`Crs`] identifier stamped onto persisted geometries
//!
//! # Example
//!
//! ```
//! use hin_common::Crs;
//!
//! let crs: Crs = "EPSG:26918".parse().unwrap();
//! assert_eq!(crs.srid(), 26918);
//! ```

pub mod crs;
pub mod error;
pub mod logging;

pub use crs::Crs;
pub use error::{HinError, Result};
