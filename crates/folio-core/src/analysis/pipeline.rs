use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn};

use super::config::EngineConfig;
use super::request::AnalysisRequest;
use super::response::{
    AnalysisResponse, EstimationReport, PredictionReport, StrategyOutcome, StrategyReport,
};
use crate::backtest::{BacktestSimulator, PerformanceMetrics};
use crate::cancel::CancelToken;
use crate::error::{ErrorKind, FolioError};
use crate::estimation::{MomentEstimate, MomentEstimator};
use crate::market_data::{AlignedPrices, PriceHistoryProvider, PriceSeries};
use crate::optimization::{
    Allocation, BlackLittermanOptimizer, ConstraintProjector, EqualWeightBaseline, MarketPrior,
    MarketProxy, MeanVarianceOptimizer, WeightBounds,
};
use crate::prediction::{predict_universe, PredictedView, ReturnPredictor};
use crate::types::{pct_to_fraction, with_metadata, ComputationOutput, Ticker};
use crate::FolioResult;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything the strategies read, computed once per request.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub estimate: MomentEstimate,
    /// Views aligned with `estimate.tickers`; empty when prediction failed.
    pub views: Vec<PredictedView>,
    /// Why the views are missing, if they are.
    pub view_failure: Option<(ErrorKind, String)>,
    pub prior: MarketPrior,
    /// Prices over the backtest window.
    pub backtest_prices: AlignedPrices,
    /// Prices over the post-backtest window, when one was requested.
    pub post_backtest_prices: Option<AlignedPrices>,
    pub estimation_window: (NaiveDate, NaiveDate),
    pub backtest_window: (NaiveDate, NaiveDate),
    pub post_backtest_window: Option<(NaiveDate, NaiveDate)>,
    pub warnings: Vec<String>,
}

/// Effective parameters after request overrides are applied.
#[derive(Debug, Clone, Serialize)]
struct RunParameters {
    risk_free_rate: f64,
    bounds: WeightBounds,
    target_volatility: f64,
    target_return: Option<f64>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs a full analysis: fetch, estimate, predict, allocate under three
/// strategies, backtest, score.
pub struct AnalysisEngine<'a> {
    provider: &'a dyn PriceHistoryProvider,
    predictor: &'a dyn ReturnPredictor,
    config: EngineConfig,
}

impl<'a> AnalysisEngine<'a> {
    pub fn new(
        provider: &'a dyn PriceHistoryProvider,
        predictor: &'a dyn ReturnPredictor,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            predictor,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self, request: &AnalysisRequest) -> FolioResult<ComputationOutput<AnalysisResponse>> {
        self.run_with_cancel(request, &CancelToken::new())
    }

    /// Run the analysis, polling `cancel` between stages and inside every
    /// solver and simulation loop.
    ///
    /// Validation, data and estimation errors fail the whole request.
    /// Failures inside a single strategy are reported in that strategy's
    /// outcome and leave the others untouched.
    pub fn run_with_cancel(
        &self,
        request: &AnalysisRequest,
        cancel: &CancelToken,
    ) -> FolioResult<ComputationOutput<AnalysisResponse>> {
        let start = Instant::now();
        let span = info_span!("analysis", n_assets = request.tickers.len(), model = %request.ml_model);
        let _guard = span.enter();

        self.config.validate()?;
        request.validate()?;
        let params = self.parameters(request);

        let snapshot = Arc::new(self.snapshot(request)?);
        cancel.check()?;

        let outcome = |name: &str, r: FolioResult<StrategyReport>| match r {
            Ok(report) => StrategyOutcome::Completed(report),
            Err(e) => {
                warn!(strategy = name, error = %e, "strategy failed");
                StrategyOutcome::failed(&e)
            }
        };

        // Equal weight is the first branch; a single worker finishes it
        // before either optimizer starts.
        let (equal_weight, (black_litterman, mvo)) = rayon::join(
            || outcome("equal_weight", self.equal_weight(&snapshot, request, &params, cancel)),
            || {
                rayon::join(
                    || match &snapshot.view_failure {
                        Some((kind, message)) => {
                            debug!("black-litterman skipped without views");
                            StrategyOutcome::Failed {
                                kind: *kind,
                                message: message.clone(),
                            }
                        }
                        None => outcome(
                            "black_litterman",
                            self.black_litterman(&snapshot, request, &params, cancel),
                        ),
                    },
                    || outcome("mvo", self.mean_variance(&snapshot, request, &params, cancel)),
                )
            },
        );

        let predictions: BTreeMap<Ticker, PredictionReport> = snapshot
            .views
            .iter()
            .map(|v| (v.ticker.clone(), PredictionReport::from_view(v)))
            .collect();

        let response = AnalysisResponse {
            request: request.clone(),
            black_litterman,
            mvo,
            equal_weight,
            predictions,
            estimation: EstimationReport::from_estimate(
                &snapshot.estimate,
                snapshot.estimation_window,
                snapshot.backtest_window,
                snapshot.post_backtest_window,
            ),
            warnings: snapshot.warnings.clone(),
        };
        let completed = response
            .outcomes()
            .iter()
            .filter(|(_, o)| o.is_completed())
            .count();
        info!(completed, "analysis complete");

        let elapsed = start.elapsed().as_micros() as u64;
        Ok(with_metadata(
            "Black-Litterman with ML views vs mean-variance vs equal weight, historical backtest",
            &serde_json::json!({
                "model": request.ml_model,
                "objective": request.objective(),
                "risk_free_rate": params.risk_free_rate,
                "weight_bounds": params.bounds,
                "target_volatility": params.target_volatility,
                "target_return": params.target_return,
                "rebalance": request.rebalance.unwrap_or(self.config.rebalance),
                "frequency": self.config.frequency,
                "tau": self.config.tau,
                "risk_aversion": self.config.risk_aversion,
            }),
            response.warnings.clone(),
            elapsed,
            response,
        ))
    }

    /// Fetch, align and estimate everything the strategies share.
    pub fn snapshot(&self, request: &AnalysisRequest) -> FolioResult<MarketSnapshot> {
        request.validate()?;
        let tickers = &request.tickers;
        let mut warnings = Vec::new();

        let histories = self
            .provider
            .fetch(tickers, request.start_date, request.end_date)?;
        for ticker in tickers {
            let series = histories
                .get(ticker)
                .ok_or_else(|| FolioError::DataUnavailable {
                    ticker: ticker.clone(),
                    reason: "provider returned no series".into(),
                })?;
            series.validate(request.start_date, request.end_date)?;
        }
        info!(n_assets = tickers.len(), "price histories fetched");

        let aligned = AlignedPrices::align(tickers, &histories)?;
        let (estimation_window, backtest_window) = match request.backtest_start {
            Some(bs) => (
                (request.start_date, bs.pred_opt().unwrap_or(bs)),
                (bs, request.effective_backtest_end()),
            ),
            None => {
                warnings.push(
                    "No backtest_start given; backtest is in-sample over the estimation window"
                        .into(),
                );
                (
                    (request.start_date, request.end_date),
                    (request.start_date, request.end_date),
                )
            }
        };

        let estimation_prices = aligned.window(estimation_window.0, estimation_window.1);
        let backtest_prices = aligned.window(backtest_window.0, backtest_window.1);
        require_dates("backtest", backtest_window, &backtest_prices)?;

        // The post-backtest period starts from the last backtest close.
        let post_backtest_window = request
            .post_backtest_end
            .map(|pbe| (request.effective_backtest_end(), pbe));
        let post_backtest_prices = match post_backtest_window {
            Some(window) => {
                let prices = aligned.window(window.0, window.1);
                require_dates("post-backtest", window, &prices)?;
                Some(prices)
            }
            None => None,
        };

        let estimator = MomentEstimator::new(self.config.moment_settings());
        let estimate = estimator.estimate(&estimation_prices)?;
        if estimate.is_regularized() {
            warnings.push(format!(
                "Covariance regularized: shrinkage {:.2}, ridge {:.3e}",
                estimate.shrinkage, estimate.ridge
            ));
        }
        info!(
            observations = estimate.observations,
            condition_number = estimate.condition_number,
            "moments estimated"
        );

        let estimation_histories: BTreeMap<Ticker, PriceSeries> = histories
            .iter()
            .map(|(t, s)| (t.clone(), s.between(estimation_window.0, estimation_window.1)))
            .collect();
        let (views, view_failure) = match predict_universe(
            self.predictor,
            tickers,
            &estimation_histories,
            request.ml_model,
        ) {
            Ok(views) => (views, None),
            Err(e) => {
                warn!(error = %e, "prediction failed");
                warnings.push(format!("Predictions unavailable: {}", e));
                (Vec::new(), Some((e.kind(), e.to_string())))
            }
        };

        let prior = self.market_prior(request, &estimator, estimation_window, &mut warnings);

        Ok(MarketSnapshot {
            estimate,
            views,
            view_failure,
            prior,
            backtest_prices,
            post_backtest_prices,
            estimation_window,
            backtest_window,
            post_backtest_window,
            warnings,
        })
    }

    // -----------------------------------------------------------------------
    // Strategies
    // -----------------------------------------------------------------------

    fn black_litterman(
        &self,
        snapshot: &MarketSnapshot,
        request: &AnalysisRequest,
        params: &RunParameters,
        cancel: &CancelToken,
    ) -> FolioResult<StrategyReport> {
        let _span = info_span!("strategy", name = "black_litterman").entered();
        let bl = BlackLittermanOptimizer::new(
            self.config.black_litterman_settings(),
            self.optimizer(request, params),
        );
        let result = bl.optimize(&snapshot.estimate, &snapshot.views, &snapshot.prior, cancel)?;
        let report = self.evaluate(snapshot, request, params, &result.allocation, cancel)?;
        Ok(report.with_black_litterman(&result))
    }

    fn mean_variance(
        &self,
        snapshot: &MarketSnapshot,
        request: &AnalysisRequest,
        params: &RunParameters,
        cancel: &CancelToken,
    ) -> FolioResult<StrategyReport> {
        let _span = info_span!("strategy", name = "mvo").entered();
        let estimate = &snapshot.estimate;
        let allocation = self.optimizer(request, params).optimize(
            &estimate.tickers,
            &estimate.expected_returns,
            &estimate.covariance,
            cancel,
        )?;
        self.evaluate(snapshot, request, params, &allocation, cancel)
    }

    fn equal_weight(
        &self,
        snapshot: &MarketSnapshot,
        request: &AnalysisRequest,
        params: &RunParameters,
        cancel: &CancelToken,
    ) -> FolioResult<StrategyReport> {
        let _span = info_span!("strategy", name = "equal_weight").entered();
        let estimate = &snapshot.estimate;
        let allocation = EqualWeightBaseline::new().allocate(
            &estimate.tickers,
            Some(&estimate.expected_returns),
            Some(&estimate.covariance),
        )?;
        self.evaluate(snapshot, request, params, &allocation, cancel)
    }

    /// Backtest an allocation and score its equity curve, then hold the same
    /// weights through the post-backtest period if there is one.
    fn evaluate(
        &self,
        snapshot: &MarketSnapshot,
        request: &AnalysisRequest,
        params: &RunParameters,
        allocation: &Allocation,
        cancel: &CancelToken,
    ) -> FolioResult<StrategyReport> {
        cancel.check()?;
        let simulator = BacktestSimulator::new(self.config.backtest_settings(request.rebalance));
        let backtest = simulator.run(&snapshot.backtest_prices, &allocation.weights, cancel)?;
        let metrics = PerformanceMetrics::from_equity_curve(
            &backtest.values(),
            self.config.frequency.periods_per_year(),
            params.risk_free_rate,
        )?;
        info!(
            strategy = %allocation.strategy,
            total_return = metrics.total_return,
            max_drawdown = metrics.max_drawdown,
            "strategy evaluated"
        );
        let report = StrategyReport::assemble(allocation, &backtest, &metrics);

        let post_prices = match &snapshot.post_backtest_prices {
            Some(prices) => prices,
            None => return Ok(report),
        };
        cancel.check()?;
        let post = simulator.run(post_prices, &allocation.weights, cancel)?;
        let post_metrics = PerformanceMetrics::from_equity_curve(
            &post.values(),
            self.config.frequency.periods_per_year(),
            params.risk_free_rate,
        )?;
        debug!(
            strategy = %allocation.strategy,
            total_return = post_metrics.total_return,
            "post-backtest evaluated"
        );
        Ok(report.with_post_backtest(&post, &post_metrics))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn parameters(&self, request: &AnalysisRequest) -> RunParameters {
        RunParameters {
            risk_free_rate: request
                .risk_free_rate_pct
                .map(pct_to_fraction)
                .unwrap_or(self.config.risk_free_rate),
            bounds: WeightBounds::from_pct(request.min_weight_pct, request.max_weight_pct),
            target_volatility: pct_to_fraction(request.target_volatility_pct),
            target_return: request.target_return_pct.map(pct_to_fraction),
        }
    }

    fn optimizer(&self, request: &AnalysisRequest, params: &RunParameters) -> MeanVarianceOptimizer {
        let projector = ConstraintProjector::new(params.bounds)
            .with_target_volatility(params.target_volatility, self.config.volatility_tolerance);
        MeanVarianceOptimizer::new(projector)
            .with_objective(request.objective(), params.target_return)
            .with_risk_free_rate(params.risk_free_rate)
            .with_solver(self.config.solver)
    }

    /// Reference weights and proxy moments for the equilibrium prior.
    fn market_prior(
        &self,
        request: &AnalysisRequest,
        estimator: &MomentEstimator,
        window: (NaiveDate, NaiveDate),
        warnings: &mut Vec<String>,
    ) -> MarketPrior {
        let n = request.tickers.len();
        let weights = match &request.market_weights {
            Some(map) => {
                let raw: Vec<f64> = request
                    .tickers
                    .iter()
                    .map(|t| map.get(t).and_then(|w| w.to_f64()).unwrap_or(0.0))
                    .collect();
                let total: f64 = raw.iter().sum();
                if map.len() < n {
                    warnings.push("Market weights missing for some tickers; treated as 0".into());
                }
                raw.iter().map(|w| w / total).collect()
            }
            None => {
                warnings.push("No market weights given; prior uses equal weights".into());
                MarketPrior::equal_weight(n).weights
            }
        };

        let proxy = request
            .market_proxy
            .as_ref()
            .and_then(|ticker| match self.proxy_moments(ticker, estimator, window) {
                Ok(proxy) => Some(proxy),
                Err(e) => {
                    warn!(proxy = %ticker, error = %e, "market proxy unusable");
                    warnings.push(format!(
                        "Market proxy {} unusable ({}); risk aversion derived from market weights",
                        ticker, e
                    ));
                    None
                }
            });

        MarketPrior { weights, proxy }
    }

    fn proxy_moments(
        &self,
        ticker: &Ticker,
        estimator: &MomentEstimator,
        window: (NaiveDate, NaiveDate),
    ) -> FolioResult<MarketProxy> {
        let tickers = [ticker.clone()];
        let series = self.provider.fetch(&tickers, window.0, window.1)?;
        if let Some(s) = series.get(ticker) {
            s.validate(window.0, window.1)?;
        }
        let aligned = AlignedPrices::align(&tickers, &series)?;
        let estimate = estimator.estimate(&aligned)?;
        Ok(MarketProxy {
            expected_return: estimate.expected_returns[0],
            variance: estimate.covariance[0][0],
        })
    }
}

fn require_dates(
    label: &str,
    window: (NaiveDate, NaiveDate),
    prices: &AlignedPrices,
) -> FolioResult<()> {
    if prices.len() < 2 {
        return Err(FolioError::InsufficientHistory(format!(
            "{} window {}..={} holds {} price dates, at least 2 required",
            label,
            window.0,
            window.1,
            prices.len()
        )));
    }
    Ok(())
}
