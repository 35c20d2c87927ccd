use harvest_core::{estimate_cost, HarvestConfig};
use serde::Serialize;
use serde_json::Value;

use crate::cli::CostArgs;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct CostEstimate {
    duration_seconds: f64,
    hours: f64,
    rate_per_hour: f64,
    estimated_cost: String,
    above_warning_threshold: bool,
}

pub fn run(args: &CostArgs, config: &HarvestConfig) -> Result<Value, CliError> {
    if !args.seconds.is_finite() || args.seconds < 0.0 {
        return Err(CliError::Usage(format!(
            "duration must be a non-negative number of seconds, got {}",
            args.seconds
        )));
    }
    let rate = config.transcription.billing_rate_per_hour;
    let hours = args.seconds / 3600.0;
    let estimate = CostEstimate {
        duration_seconds: args.seconds,
        hours,
        rate_per_hour: rate,
        estimated_cost: estimate_cost(args.seconds, rate),
        above_warning_threshold: hours * rate > config.transcription.cost_warning_threshold,
    };
    Ok(serde_json::to_value(estimate)?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn estimates_with_configured_rate() {
        let config = HarvestConfig::default();

        let value = run(&CostArgs { seconds: 7200.0 }, &config).expect("estimates");

        assert_eq!(value["estimated_cost"], json!("1.30"));
        assert_eq!(value["hours"], json!(2.0));
        assert_eq!(value["above_warning_threshold"], json!(false));
    }

    #[test]
    fn rejects_negative_durations() {
        let error = run(&CostArgs { seconds: -1.0 }, &HarvestConfig::default()).expect_err("rejected");

        assert_eq!(error.exit_code(), 2);
    }
}
