//! Versioned feature builders

pub mod injury_risk;
pub mod session;

pub use injury_risk::build_injury_risk_features;
pub use session::{build_session_features, SessionInputs};
