use serde_json::{Map, Value};

use crate::database::hyperparameter::HyperparameterConfig;
use crate::database::DbResult;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 300;

/// Merges the final parameter mapping, highest precedence last:
/// the base is the saved config's mapping when one applied, otherwise the
/// request's own temperature/max_tokens; ad-hoc overrides then overwrite
/// key-wise on top of whichever base was chosen.
pub fn merge_parameters(
    config_parameters: Option<Map<String, Value>>,
    temperature: f64,
    max_tokens: u32,
    overrides: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let mut parameters = match config_parameters {
        Some(map) => map,
        None => {
            let mut map = Map::new();
            map.insert("temperature".to_string(), Value::from(temperature));
            map.insert("max_tokens".to_string(), Value::from(max_tokens));
            map
        }
    };
    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            parameters.insert(key.clone(), value.clone());
        }
    }
    parameters
}

/// Resolves the parameters for one generation call. A `config_id` that does
/// not match (id, user, model, not-deleted) is not an error: the resolver
/// falls through silently to the request's own defaults.
pub fn resolve_parameters(
    user_id: &str,
    model_id: i64,
    temperature: f64,
    max_tokens: u32,
    config_id: Option<i64>,
    overrides: Option<&Map<String, Value>>,
) -> DbResult<Map<String, Value>> {
    let config_parameters = match config_id {
        Some(config_id) => HyperparameterConfig::get_for_generation(config_id, user_id, model_id)?
            .and_then(|config| match serde_json::from_str::<Value>(&config.parameters) {
                Ok(Value::Object(map)) => Some(map),
                // A corrupt stored mapping degrades to the request defaults.
                _ => None,
            }),
        None => None,
    };
    Ok(merge_parameters(
        config_parameters,
        temperature,
        max_tokens,
        overrides,
    ))
}

/// Providers read the mapping defensively: a missing or mistyped key falls
/// back to the stock default at call time.
pub fn read_temperature(parameters: &Map<String, Value>) -> f64 {
    parameters
        .get("temperature")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_TEMPERATURE)
}

pub fn read_max_tokens(parameters: &Map<String, Value>) -> u32 {
    parameters
        .get("max_tokens")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(DEFAULT_MAX_TOKENS)
}
