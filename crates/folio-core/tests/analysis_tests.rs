use chrono::{Duration, NaiveDate};
use folio_core::analysis::{AnalysisEngine, AnalysisRequest, AnalysisResponse, EngineConfig};
use folio_core::error::{ErrorKind, FolioError};
use folio_core::market_data::{InMemoryPriceProvider, PriceSeries};
use folio_core::prediction::{ModelKind, PredictedView, StaticPredictor, TrendPredictor};
use folio_core::types::{Ratio, ReturnFrequency, Ticker};
use folio_core::CancelToken;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn day0() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 3).unwrap()
}

/// Deterministic price path driven by two sine waves per asset.
fn wave_series(ticker: &str, k: usize, days: usize) -> PriceSeries {
    let kf = k as f64;
    let drift = 0.0002 + 0.0001 * kf;
    let mut price = 100.0;
    let mut pairs = Vec::with_capacity(days);
    for t in 0..days {
        if t > 0 {
            let tf = t as f64;
            let r = drift
                + 0.008 * (tf * (0.31 + 0.17 * kf) + kf).sin()
                + 0.004 * (tf * (1.13 + 0.07 * kf)).cos();
            price *= 1.0 + r;
        }
        pairs.push((day0() + Duration::days(t as i64), price));
    }
    PriceSeries::from_pairs(ticker, &pairs)
}

fn flat_series(ticker: &str, days: usize) -> PriceSeries {
    let pairs: Vec<(NaiveDate, f64)> = (0..days)
        .map(|t| (day0() + Duration::days(t as i64), 50.0))
        .collect();
    PriceSeries::from_pairs(ticker, &pairs)
}

fn tickers(names: &[&str]) -> Vec<Ticker> {
    names.iter().map(|s| s.to_string()).collect()
}

fn request(names: &[&str], days: usize, min_pct: Decimal, max_pct: Decimal) -> AnalysisRequest {
    AnalysisRequest::new(
        tickers(names),
        day0(),
        day0() + Duration::days(days as i64 - 1),
        ModelKind::Xgboost,
        dec!(15),
        min_pct,
        max_pct,
    )
}

fn wave_provider(names: &[&str], days: usize) -> InMemoryPriceProvider {
    names
        .iter()
        .enumerate()
        .map(|(k, t)| wave_series(t, k, days))
        .collect()
}

fn sum_pct(weights: &std::collections::BTreeMap<Ticker, Decimal>) -> Decimal {
    weights.values().copied().sum()
}

// ---------------------------------------------------------------------------
// End-to-end
// ---------------------------------------------------------------------------

#[test]
fn test_full_analysis_completes_all_strategies() {
    let names = ["AAA", "BBB", "CCC"];
    let provider = wave_provider(&names, 400);
    let predictor = TrendPredictor::new(ReturnFrequency::Daily);
    let engine = AnalysisEngine::new(&provider, &predictor, EngineConfig::default());

    let mut req = request(&names, 400, dec!(5), dec!(60));
    req.backtest_start = Some(day0() + Duration::days(250));
    let out = engine.run(&req).unwrap();
    let resp = &out.result;

    for (name, outcome) in resp.outcomes() {
        let report = outcome
            .report()
            .unwrap_or_else(|| panic!("{} did not complete: {:?}", name, outcome));
        let total = sum_pct(&report.weights);
        assert!(
            (total - dec!(100)).abs() <= dec!(0.0001),
            "{} weights sum to {}",
            name,
            total
        );
        assert_eq!(report.equity_curve[0].value, dec!(1));
        assert_eq!(report.equity_curve[0].date, day0() + Duration::days(250));
        assert!(report.max_drawdown_pct <= Decimal::ZERO);
    }

    let mvo = resp.mvo.report().unwrap();
    for w in mvo.weights.values() {
        assert!(*w >= dec!(4.999) && *w <= dec!(60.001), "weight {} out of bounds", w);
    }
    let ew = resp.equal_weight.report().unwrap();
    for w in ew.weights.values() {
        assert_eq!(w.round_dp(2), dec!(33.33));
    }
    assert!(resp.black_litterman.report().unwrap().black_litterman.is_some());
    assert_eq!(resp.predictions.len(), 3);
    assert_eq!(resp.estimation.backtest_start, day0() + Duration::days(250));
    assert_eq!(resp.estimation.observations, 249);
}

#[test]
fn test_six_asset_weights_sum_to_hundred() {
    let names = ["AAA", "BBB", "CCC", "DDD", "EEE", "FFF"];
    let provider = wave_provider(&names, 300);
    let predictor = TrendPredictor::new(ReturnFrequency::Daily);
    let engine = AnalysisEngine::new(&provider, &predictor, EngineConfig::default());

    let mut req = request(&names, 300, dec!(5), dec!(40));
    req.backtest_start = Some(day0() + Duration::days(200));
    let resp = engine.run(&req).unwrap().result;

    for (name, outcome) in resp.outcomes() {
        let report = outcome
            .report()
            .unwrap_or_else(|| panic!("{} did not complete: {:?}", name, outcome));
        let total = sum_pct(&report.weights);
        assert!(
            (total - dec!(100)).abs() <= dec!(0.0001),
            "{} weights sum to {}",
            name,
            total
        );
    }
}

#[test]
fn test_post_backtest_period_reuses_weights() {
    let names = ["AAA", "BBB", "CCC"];
    let provider = wave_provider(&names, 400);
    let predictor = TrendPredictor::new(ReturnFrequency::Daily);
    let engine = AnalysisEngine::new(&provider, &predictor, EngineConfig::default());

    let backtest_end = day0() + Duration::days(320);
    let mut req = request(&names, 400, dec!(5), dec!(60));
    req.backtest_start = Some(day0() + Duration::days(250));
    req.backtest_end = Some(backtest_end);
    req.post_backtest_end = Some(day0() + Duration::days(399));
    let resp = engine.run(&req).unwrap().result;

    assert_eq!(resp.estimation.backtest_end, backtest_end);
    assert_eq!(resp.estimation.post_backtest_start, Some(backtest_end));
    assert_eq!(
        resp.estimation.post_backtest_end,
        Some(day0() + Duration::days(399))
    );
    for (name, outcome) in resp.outcomes() {
        let report = outcome
            .report()
            .unwrap_or_else(|| panic!("{} did not complete: {:?}", name, outcome));
        assert_eq!(report.equity_curve.last().unwrap().date, backtest_end);

        let post = report
            .post_backtest
            .as_ref()
            .unwrap_or_else(|| panic!("{} has no post-backtest block", name));
        assert_eq!(post.start, backtest_end);
        assert_eq!(post.end, day0() + Duration::days(399));
        assert_eq!(post.equity_curve.len(), 80);
        assert_eq!(post.equity_curve[0].value, dec!(1));
        assert!(post.max_drawdown_pct <= Decimal::ZERO);
    }
}

#[test]
fn test_post_backtest_needs_prices() {
    let names = ["AAA", "BBB"];
    let provider = wave_provider(&names, 200);
    let predictor = TrendPredictor::new(ReturnFrequency::Daily);
    let engine = AnalysisEngine::new(&provider, &predictor, EngineConfig::default());

    // Prices stop at day 199; the post-backtest window only holds its first date.
    let mut req = request(&names, 260, dec!(0), dec!(100));
    req.backtest_start = Some(day0() + Duration::days(120));
    req.backtest_end = Some(day0() + Duration::days(199));
    req.post_backtest_end = Some(day0() + Duration::days(259));
    assert!(matches!(
        engine.run(&req),
        Err(FolioError::InsufficientHistory(_))
    ));
}

#[test]
fn test_response_json_round_trip() {
    let names = ["AAA", "BBB"];
    let provider = wave_provider(&names, 200);
    let predictor = TrendPredictor::new(ReturnFrequency::Daily);
    let engine = AnalysisEngine::new(&provider, &predictor, EngineConfig::default());

    let mut req = request(&names, 200, dec!(0), dec!(100));
    req.backtest_start = Some(day0() + Duration::days(120));
    let resp = engine.run(&req).unwrap().result;

    let json = serde_json::to_string_pretty(&resp).unwrap();
    let back: AnalysisResponse = serde_json::from_str(&json).unwrap();
    assert_eq!(back, resp);
}

#[test]
fn test_flat_prices_have_undefined_ratios() {
    let provider: InMemoryPriceProvider =
        vec![flat_series("A", 60), flat_series("B", 60)].into_iter().collect();
    let predictor = StaticPredictor::new()
        .with_view(PredictedView::new("A", 0.0, 0.5))
        .with_view(PredictedView::new("B", 0.0, 0.5));
    let engine = AnalysisEngine::new(&provider, &predictor, EngineConfig::default());

    let resp = engine
        .run(&request(&["A", "B"], 60, dec!(0), dec!(100)))
        .unwrap()
        .result;
    for (name, outcome) in resp.outcomes() {
        let report = outcome
            .report()
            .unwrap_or_else(|| panic!("{} did not complete: {:?}", name, outcome));
        assert_eq!(report.sharpe, Ratio::Undefined);
        assert_eq!(report.sortino, Ratio::Undefined);
        assert_eq!(report.max_drawdown_pct, Decimal::ZERO);
        assert_eq!(report.total_return_pct, Decimal::ZERO);
    }
}

// ---------------------------------------------------------------------------
// Failure isolation
// ---------------------------------------------------------------------------

#[test]
fn test_infeasible_bounds_fail_optimizers_only() {
    let names = ["A0", "A1", "A2", "A3", "A4", "A5", "A6", "A7", "A8", "A9"];
    let provider = wave_provider(&names, 120);
    let predictor = TrendPredictor::new(ReturnFrequency::Daily);
    let engine = AnalysisEngine::new(&provider, &predictor, EngineConfig::default());

    let resp = engine
        .run(&request(&names, 120, dec!(15), dec!(100)))
        .unwrap()
        .result;
    assert_eq!(
        resp.black_litterman.failure_kind(),
        Some(ErrorKind::ConstraintInfeasible)
    );
    assert_eq!(resp.mvo.failure_kind(), Some(ErrorKind::ConstraintInfeasible));
    let ew = resp.equal_weight.report().unwrap();
    assert_eq!(ew.weights.len(), 10);
    for w in ew.weights.values() {
        assert_eq!(*w, dec!(10));
    }
}

#[test]
fn test_missing_predictions_fail_black_litterman_only() {
    let names = ["AAA", "BBB"];
    let provider = wave_provider(&names, 120);
    let predictor = StaticPredictor::new().with_view(PredictedView::new("AAA", 0.08, 0.6));
    let engine = AnalysisEngine::new(&provider, &predictor, EngineConfig::default());

    let resp = engine
        .run(&request(&names, 120, dec!(0), dec!(100)))
        .unwrap()
        .result;
    assert_eq!(
        resp.black_litterman.failure_kind(),
        Some(ErrorKind::DataUnavailable)
    );
    assert!(resp.mvo.is_completed());
    assert!(resp.equal_weight.is_completed());
    assert!(resp.predictions.is_empty());
}

#[test]
fn test_request_level_errors_abort() {
    let names = ["AAA", "BBB"];
    let provider = wave_provider(&names, 120);
    let predictor = TrendPredictor::new(ReturnFrequency::Daily);
    let engine = AnalysisEngine::new(&provider, &predictor, EngineConfig::default());

    let unknown = request(&["AAA", "ZZZ"], 120, dec!(0), dec!(100));
    assert!(matches!(
        engine.run(&unknown),
        Err(FolioError::DataUnavailable { .. })
    ));

    let short = request(&names, 20, dec!(0), dec!(100));
    assert!(matches!(
        engine.run(&short),
        Err(FolioError::InsufficientHistory(_))
    ));

    let single = request(&["AAA"], 120, dec!(0), dec!(100));
    assert!(matches!(
        engine.run(&single),
        Err(FolioError::InvalidUniverse(_))
    ));
}

#[test]
fn test_cancelled_request_stops() {
    let names = ["AAA", "BBB"];
    let provider = wave_provider(&names, 120);
    let predictor = TrendPredictor::new(ReturnFrequency::Daily);
    let engine = AnalysisEngine::new(&provider, &predictor, EngineConfig::default());

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = engine.run_with_cancel(&request(&names, 120, dec!(0), dec!(100)), &cancel);
    assert!(matches!(result, Err(FolioError::Cancelled)));
}

#[derive(Default)]
struct EventFields {
    message: String,
    strategy: Option<String>,
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "strategy" => self.strategy = Some(format!("{:?}", value)),
            _ => {}
        }
    }
}

/// Trips a token as soon as the named strategy logs its evaluation.
struct CancelAfterStrategy {
    strategy: &'static str,
    cancel: CancelToken,
}

impl<S: Subscriber> Layer<S> for CancelAfterStrategy {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = EventFields::default();
        event.record(&mut fields);
        if fields.message == "strategy evaluated" && fields.strategy.as_deref() == Some(self.strategy) {
            self.cancel.cancel();
        }
    }
}

#[test]
fn test_cancel_mid_fan_out_keeps_finished_strategy() {
    let names = ["AAA", "BBB", "CCC"];
    let provider = wave_provider(&names, 300);
    let predictor = TrendPredictor::new(ReturnFrequency::Daily);
    let engine = AnalysisEngine::new(&provider, &predictor, EngineConfig::default());
    let mut req = request(&names, 300, dec!(0), dec!(100));
    req.backtest_start = Some(day0() + Duration::days(200));

    let cancel = CancelToken::new();
    let subscriber = tracing_subscriber::registry().with(CancelAfterStrategy {
        strategy: "equal_weight",
        cancel: cancel.clone(),
    });

    // One worker runs the fan-out in order: equal weight, then
    // Black-Litterman, then mean-variance.
    let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    let resp = pool
        .install(|| {
            tracing::subscriber::with_default(subscriber, || engine.run_with_cancel(&req, &cancel))
        })
        .unwrap()
        .result;

    assert!(cancel.is_cancelled());
    assert!(resp.equal_weight.is_completed());
    assert_eq!(resp.mvo.failure_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(resp.black_litterman.failure_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(resp.predictions.len(), 3);
}
