pub mod provider;
pub mod series;

pub use provider::{InMemoryPriceProvider, PriceHistoryProvider};
pub use series::{AlignedPrices, PricePoint, PriceSeries, ReturnSeries};
