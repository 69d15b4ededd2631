use clap::Args;
use folio_core::analysis::EngineConfig;
use folio_core::optimization::{self, ProjectionInput};
use serde_json::Value;

use crate::input;

/// Arguments for weight projection
#[derive(Args)]
pub struct ProjectArgs {
    /// Path to the projection input JSON (otherwise read from stdin)
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_project(args: ProjectArgs, config: &EngineConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let mut projection: ProjectionInput = input::stdin::read_input(args.input.as_deref(), "projection")?;
    if projection.volatility_tolerance.is_none() {
        projection.volatility_tolerance = Some(config.volatility_tolerance);
    }
    let output = optimization::project_weights(&projection)?;
    Ok(serde_json::to_value(output)?)
}
