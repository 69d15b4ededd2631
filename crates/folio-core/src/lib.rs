pub mod cancel;
pub mod error;
pub mod linalg;
pub mod market_data;
pub mod types;

#[cfg(feature = "estimation")]
pub mod estimation;

#[cfg(feature = "prediction")]
pub mod prediction;

#[cfg(feature = "optimization")]
pub mod optimization;

#[cfg(feature = "backtest")]
pub mod backtest;

#[cfg(feature = "analysis")]
pub mod analysis;

pub use cancel::CancelToken;
pub use error::{ErrorKind, FolioError};
pub use types::*;

/// Standard result type for all folio operations
pub type FolioResult<T> = Result<T, FolioError>;
