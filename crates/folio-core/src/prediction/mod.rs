pub mod predictor;

pub use predictor::{
    predict_universe, ModelKind, PredictedView, ReturnPredictor, StaticPredictor, TrendPredictor,
};
