//! Decoding of JSON method arguments.

use loom_plugin_host::PluginError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub(crate) fn required<T: DeserializeOwned>(args: &[Value], index: usize, name: &str) -> Result<T, PluginError> {
    let value = args
        .get(index)
        .ok_or_else(|| PluginError::InvalidArgs(format!("missing argument '{name}'")))?;
    decode(value, name)
}

/// Like [`required`], but a missing or `null` argument reads as `None`.
pub(crate) fn optional<T: DeserializeOwned>(args: &[Value], index: usize, name: &str) -> Result<Option<T>, PluginError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => decode(value, name).map(Some),
    }
}

fn decode<T: DeserializeOwned>(value: &Value, name: &str) -> Result<T, PluginError> {
    serde_json::from_value(value.clone()).map_err(|e| PluginError::InvalidArgs(format!("argument '{name}': {e}")))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, PluginError> {
    Ok(serde_json::to_value(value)?)
}
