//! Learners, splits and validation metrics

pub mod forest;
pub mod logistic;
pub mod metrics;
pub mod model;
pub mod split;

pub use forest::{ForestParams, RandomForestRegressor};
pub use logistic::{LogisticParams, LogisticRegression};
pub use model::{Estimator, ModelArtifact};
