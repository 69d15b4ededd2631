pub mod metrics;
pub mod simulator;

pub use metrics::{
    calculate_performance_metrics, max_drawdown, MetricsInput, PerformanceMetrics, ReportedMetrics,
};
pub use simulator::{
    BacktestResult, BacktestSettings, BacktestSimulator, EquityPoint, RebalancePolicy,
};
