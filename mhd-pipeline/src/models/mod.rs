//! Typed records passed between pipeline stages

pub mod job;
pub mod monitoring;
pub mod records;
pub mod run;

pub use job::*;
pub use monitoring::*;
pub use records::*;
pub use run::*;
