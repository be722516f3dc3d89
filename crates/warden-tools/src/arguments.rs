use serde_json::Value;

pub(crate) fn required_string(arguments: &Value, key: &str) -> Result<String, String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(|value| value.to_string())
        .ok_or_else(|| format!("missing required string argument '{key}'"))
}

pub(crate) fn optional_string(arguments: &Value, key: &str) -> Result<Option<String>, String> {
    let Some(value) = arguments.get(key) else {
        return Ok(None);
    };
    let Some(raw) = value.as_str() else {
        return Err(format!("optional argument '{key}' must be a string"));
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(trimmed.to_string()))
}

pub(crate) fn optional_string_array(arguments: &Value, key: &str) -> Result<Vec<String>, String> {
    let Some(value) = arguments.get(key) else {
        return Ok(Vec::new());
    };
    let Some(items) = value.as_array() else {
        return Err(format!("'{key}' must be an array of strings"));
    };
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        let Some(raw) = item.as_str() else {
            return Err(format!("'{key}' must be an array of strings"));
        };
        values.push(raw.to_string());
    }
    Ok(values)
}

/// Accepts integral or fractional seconds; anything non-finite, zero,
/// negative, or past one day is rejected before it can reach a Duration.
pub(crate) fn optional_seconds(arguments: &Value, key: &str) -> Result<Option<f64>, String> {
    let Some(value) = arguments.get(key) else {
        return Ok(None);
    };
    let Some(parsed) = value.as_f64() else {
        return Err(format!("optional argument '{key}' must be a number"));
    };
    if !parsed.is_finite() || parsed <= 0.0 {
        return Err(format!("optional argument '{key}' must be a positive number"));
    }
    if parsed > 86_400.0 {
        return Err(format!("optional argument '{key}' exceeds maximum 86400"));
    }
    Ok(Some(parsed))
}
