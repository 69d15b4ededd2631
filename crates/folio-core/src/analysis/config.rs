use serde::{Deserialize, Serialize};

use crate::backtest::{BacktestSettings, RebalancePolicy};
use crate::error::FolioError;
use crate::estimation::MomentSettings;
use crate::optimization::{BlackLittermanSettings, SolverSettings};
use crate::types::ReturnFrequency;
use crate::FolioResult;

/// Engine-wide defaults. Request fields override the matching entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Price observation frequency, used for annualisation.
    pub frequency: ReturnFrequency,
    pub min_observations: usize,
    pub max_fill_gap: usize,
    pub condition_threshold: f64,
    /// Black-Litterman prior uncertainty scale.
    pub tau: f64,
    /// Fixed market risk aversion; derived from the market proxy if unset.
    pub risk_aversion: Option<f64>,
    pub fallback_risk_aversion: f64,
    /// Annual risk-free rate as a fraction.
    pub risk_free_rate: f64,
    /// Allowed gap between achieved and target volatility, as a fraction.
    pub volatility_tolerance: f64,
    pub solver: SolverSettings,
    pub rebalance: RebalancePolicy,
    pub initial_value: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let moments = MomentSettings::default();
        let bl = BlackLittermanSettings::default();
        let backtest = BacktestSettings::default();
        Self {
            frequency: moments.frequency,
            min_observations: moments.min_observations,
            max_fill_gap: moments.max_fill_gap,
            condition_threshold: moments.condition_threshold,
            tau: bl.tau,
            risk_aversion: bl.risk_aversion,
            fallback_risk_aversion: bl.fallback_risk_aversion,
            risk_free_rate: 0.0,
            volatility_tolerance: 0.02,
            solver: SolverSettings::default(),
            rebalance: backtest.rebalance,
            initial_value: backtest.initial_value,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> FolioResult<()> {
        let positive = |field: &str, v: f64| -> FolioResult<()> {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(FolioError::invalid(format!("config.{}", field), "must be positive"))
            }
        };
        positive("condition_threshold", self.condition_threshold)?;
        positive("tau", self.tau)?;
        positive("fallback_risk_aversion", self.fallback_risk_aversion)?;
        positive("volatility_tolerance", self.volatility_tolerance)?;
        positive("initial_value", self.initial_value)?;
        positive("solver.tolerance", self.solver.tolerance)?;
        if let Some(delta) = self.risk_aversion {
            positive("risk_aversion", delta)?;
        }
        if !self.risk_free_rate.is_finite() {
            return Err(FolioError::invalid("config.risk_free_rate", "must be finite"));
        }
        if self.min_observations < 2 {
            return Err(FolioError::invalid("config.min_observations", "must be at least 2"));
        }
        if self.solver.max_iterations == 0 {
            return Err(FolioError::invalid("config.solver.max_iterations", "must be at least 1"));
        }
        if self.rebalance == RebalancePolicy::EveryNPeriods(0) {
            return Err(FolioError::invalid("config.rebalance", "every_n_periods must be at least 1"));
        }
        Ok(())
    }

    pub fn moment_settings(&self) -> MomentSettings {
        MomentSettings {
            frequency: self.frequency,
            min_observations: self.min_observations,
            max_fill_gap: self.max_fill_gap,
            condition_threshold: self.condition_threshold,
        }
    }

    pub fn black_litterman_settings(&self) -> BlackLittermanSettings {
        BlackLittermanSettings {
            tau: self.tau,
            risk_aversion: self.risk_aversion,
            fallback_risk_aversion: self.fallback_risk_aversion,
            condition_threshold: self.condition_threshold,
        }
    }

    pub fn backtest_settings(&self, rebalance: Option<RebalancePolicy>) -> BacktestSettings {
        BacktestSettings {
            rebalance: rebalance.unwrap_or(self.rebalance),
            initial_value: self.initial_value,
            max_fill_gap: self.max_fill_gap,
        }
    }
}
