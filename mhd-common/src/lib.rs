//! # MHD Common Library
//!
//! Shared code for the MHD model lifecycle services:
//! - Error type shared by every crate
//! - Configuration loading (CLI → ENV → TOML → compiled defaults)
//! - SQLite document store bootstrap
//! - Atomic file writes for deployment manifests
//! - Logging initialisation
//! - Time helpers

pub mod config;
pub mod db;
pub mod error;
pub mod fs;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
