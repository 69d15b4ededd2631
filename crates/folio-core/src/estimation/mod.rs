pub mod moments;

pub use moments::{
    estimate_moments, regularize, shrink, MomentEstimate, MomentEstimator, MomentInput,
    MomentSettings, Regularized,
};
