use serde::Serialize;
use serde_json::Value;

use crate::cli::{CallArgs, ProvidersArgs, ProvidersCommand};
use crate::error::CliError;

use super::Context;

#[derive(Debug, Serialize)]
struct CallResult<'a> {
    provider: &'a str,
    method: &'a str,
    /// True when a `none` fallback skipped the call.
    skipped: bool,
    result: Option<Value>,
}

pub async fn run(args: &ProvidersArgs, context: &Context) -> Result<Value, CliError> {
    match &args.command {
        ProvidersCommand::Health => {
            let report = context.providers.health_check().await;
            Ok(serde_json::to_value(report)?)
        }
        ProvidersCommand::Call(call) => run_call(call, context).await,
    }
}

async fn run_call(args: &CallArgs, context: &Context) -> Result<Value, CliError> {
    let params: Value = serde_json::from_str(&args.params)
        .map_err(|error| CliError::Usage(format!("--params is not valid JSON: {error}")))?;
    if !params.is_object() {
        return Err(CliError::Usage(String::from("--params must be a JSON object")));
    }

    let result = context.providers.call(&args.name, &args.method, params).await?;
    Ok(serde_json::to_value(CallResult {
        provider: &args.name,
        method: &args.method,
        skipped: result.is_none(),
        result,
    })?)
}
