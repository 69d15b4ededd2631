pub mod config;
pub mod pipeline;
pub mod request;
pub mod response;

pub use config::EngineConfig;
pub use pipeline::{AnalysisEngine, MarketSnapshot};
pub use request::{validate_universe, AnalysisRequest};
pub use response::{
    AnalysisResponse, BlackLittermanReport, EstimationReport, PredictionReport,
    ReportedEquityPoint, StrategyOutcome, StrategyReport,
};
