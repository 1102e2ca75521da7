//! Database bootstrap
//!
//! The document store is a single SQLite database. Every table is created
//! idempotently at startup so a fresh root folder needs no setup step.

pub mod init;

pub use init::*;
