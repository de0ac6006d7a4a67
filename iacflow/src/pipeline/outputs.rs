//! Flattening of the tool's `output -json` document.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::OutputParseError;

/// Flattens `output -json` into a plain key/value map.
///
/// Each top-level entry is `{"value": ..., "type": ..., "sensitive": ...}`;
/// the `value` is kept. String values are stored as-is, anything else as
/// its compact JSON text. Entries without a `value` wrapper are taken
/// verbatim.
pub fn flatten_outputs(raw: &str) -> Result<BTreeMap<String, String>, OutputParseError> {
    let document: Value =
        serde_json::from_str(raw.trim()).map_err(|e| OutputParseError::new(e.to_string()))?;
    let Value::Object(entries) = document else {
        return Err(OutputParseError::new("expected a JSON object at the top level"));
    };

    Ok(entries
        .into_iter()
        .map(|(key, entry)| {
            let value = match entry {
                Value::Object(mut wrapper) if wrapper.contains_key("value") => {
                    wrapper.remove("value").unwrap_or(Value::Null)
                }
                other => other,
            };
            (key, stringify(value))
        })
        .collect())
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
