pub mod allocation;
pub mod black_litterman;
pub mod constraints;
pub mod equal_weight;
pub mod mean_variance;
pub mod qp;

pub use allocation::{Allocation, Strategy};
pub use black_litterman::{
    BlackLittermanAllocation, BlackLittermanOptimizer, BlackLittermanSettings, MarketPrior,
    MarketProxy, Posterior,
};
pub use constraints::{
    project_weights, ConstraintProjector, Projection, ProjectionInput, ProjectionOutput,
    TickerWeight, WeightBounds,
};
pub use equal_weight::EqualWeightBaseline;
pub use mean_variance::{MeanVarianceOptimizer, Objective};
pub use qp::{FrontierPoint, FrontierSolver, SolverSettings};
