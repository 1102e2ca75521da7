//! Database access for mhd-pipeline
//!
//! Thin query functions over the tables created by `mhd_common::db`.
//! Timestamps are stored in canonical RFC 3339 form (`mhd_common::time`),
//! JSON columns hold feature bags, params and results.

pub mod features;
pub mod jobs;
pub mod predictions;
pub mod records;
pub mod rollups;
