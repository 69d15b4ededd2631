pub mod analyze;
pub mod metrics;
pub mod moments;
pub mod project;
