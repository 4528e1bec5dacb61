//! Typed access to stage option maps
//!
//! Stage parameters arrive as a JSON object (the host binding layer hands
//! them over as-is). Every getter produces `InvalidArgument` naming the
//! offending key; unknown keys are ignored.

use serde_json::{Map, Value};
use sf_core::{Sample, SfError, SfResult};

/// Stage option map with typed getters.
#[derive(Debug, Clone, Default)]
pub struct StageParams {
    map: Map<String, Value>,
}

impl StageParams {
    pub fn new(map: Map<String, Value>) -> Self {
        Self { map }
    }

    /// Build from a JSON value; must be an object (or null for "no options").
    pub fn from_value(value: Value) -> SfResult<Self> {
        match value {
            Value::Object(map) => Ok(Self { map }),
            Value::Null => Ok(Self::default()),
            other => Err(SfError::invalid(format!(
                "stage options must be an object, got {other}"
            ))),
        }
    }

    /// Parse from a JSON source string.
    pub fn from_json(json: &str) -> SfResult<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| SfError::invalid(format!("malformed stage options: {e}")))?;
        Self::from_value(value)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    // ── scalars ─────────────────────────────────────────────────────────

    pub fn f64_opt(&self, key: &str) -> SfResult<Option<f64>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| bad_number(key)),
            Some(_) => Err(bad_number(key)),
        }
    }

    pub fn f64(&self, key: &str) -> SfResult<f64> {
        self.f64_opt(key)?.ok_or_else(|| missing(key))
    }

    pub fn f64_or(&self, key: &str, default: f64) -> SfResult<f64> {
        Ok(self.f64_opt(key)?.unwrap_or(default))
    }

    pub fn usize_opt(&self, key: &str) -> SfResult<Option<usize>> {
        match self.f64_opt(key)? {
            None => Ok(None),
            Some(v) => {
                if v < 0.0 || v.fract() != 0.0 || v > usize::MAX as f64 {
                    return Err(SfError::invalid(format!(
                        "parameter '{key}' must be a non-negative integer, got {v}"
                    )));
                }
                Ok(Some(v as usize))
            }
        }
    }

    pub fn usize(&self, key: &str) -> SfResult<usize> {
        self.usize_opt(key)?.ok_or_else(|| missing(key))
    }

    pub fn usize_or(&self, key: &str, default: usize) -> SfResult<usize> {
        Ok(self.usize_opt(key)?.unwrap_or(default))
    }

    pub fn bool_or(&self, key: &str, default: bool) -> SfResult<bool> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(SfError::invalid(format!(
                "parameter '{key}' must be a boolean"
            ))),
        }
    }

    pub fn str_opt(&self, key: &str) -> SfResult<Option<&str>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(SfError::invalid(format!(
                "parameter '{key}' must be a string"
            ))),
        }
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> SfResult<&'a str> {
        Ok(self.str_opt(key)?.unwrap_or(default))
    }

    // ── arrays ──────────────────────────────────────────────────────────

    pub fn f32_array_opt(&self, key: &str) -> SfResult<Option<Vec<Sample>>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let v = item.as_f64().ok_or_else(|| {
                        SfError::invalid(format!("parameter '{key}' must be a numeric array"))
                    })?;
                    out.push(v as Sample);
                }
                Ok(Some(out))
            }
            Some(_) => Err(SfError::invalid(format!(
                "parameter '{key}' must be an array"
            ))),
        }
    }

    pub fn f32_array(&self, key: &str) -> SfResult<Vec<Sample>> {
        self.f32_array_opt(key)?.ok_or_else(|| missing(key))
    }

    pub fn f64_array_opt(&self, key: &str) -> SfResult<Option<Vec<f64>>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let v = item.as_f64().ok_or_else(|| {
                        SfError::invalid(format!("parameter '{key}' must be a numeric array"))
                    })?;
                    out.push(v);
                }
                Ok(Some(out))
            }
            Some(_) => Err(SfError::invalid(format!(
                "parameter '{key}' must be an array"
            ))),
        }
    }

    pub fn usize_array_opt(&self, key: &str) -> SfResult<Option<Vec<usize>>> {
        match self.f64_array_opt(key)? {
            None => Ok(None),
            Some(vals) => {
                let mut out = Vec::with_capacity(vals.len());
                for v in vals {
                    if v < 0.0 || v.fract() != 0.0 {
                        return Err(SfError::invalid(format!(
                            "parameter '{key}' must contain non-negative integers"
                        )));
                    }
                    out.push(v as usize);
                }
                Ok(Some(out))
            }
        }
    }

    /// Nested array-of-arrays (filter-bank band edges).
    pub fn band_array(&self, key: &str) -> SfResult<Vec<(f64, f64)>> {
        let items = match self.map.get(key) {
            Some(Value::Array(items)) => items,
            _ => return Err(missing(key)),
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Array(pair) if pair.len() == 2 => {
                    let lo = pair[0].as_f64().ok_or_else(|| bad_number(key))?;
                    let hi = pair[1].as_f64().ok_or_else(|| bad_number(key))?;
                    out.push((lo, hi));
                }
                _ => {
                    return Err(SfError::invalid(format!(
                        "parameter '{key}' must be an array of [low, high] pairs"
                    )))
                }
            }
        }
        Ok(out)
    }
}

impl From<Map<String, Value>> for StageParams {
    fn from(map: Map<String, Value>) -> Self {
        Self::new(map)
    }
}

fn missing(key: &str) -> SfError {
    SfError::invalid(format!("missing required parameter '{key}'"))
}

fn bad_number(key: &str) -> SfError {
    SfError::invalid(format!("parameter '{key}' must be a number"))
}

/// Convenience constructor used all over the tests:
/// `params!({"windowSize": 3, "mode": "moving"})`.
#[macro_export]
macro_rules! params {
    ($($json:tt)+) => {
        $crate::StageParams::from_value($crate::serde_json::json!($($json)+)).expect("valid params")
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters() {
        let p = StageParams::from_json(r#"{"windowSize": 8, "mode": "moving", "alpha": 0.25, "on": true, "kernel": [1, 0.5]}"#).unwrap();
        assert_eq!(p.usize("windowSize").unwrap(), 8);
        assert_eq!(p.str_or("mode", "batch").unwrap(), "moving");
        assert_eq!(p.f64_or("alpha", 0.5).unwrap(), 0.25);
        assert!(p.bool_or("on", false).unwrap());
        assert_eq!(p.f32_array("kernel").unwrap(), vec![1.0, 0.5]);
    }

    #[test]
    fn errors_name_the_key() {
        let p = StageParams::from_json(r#"{"windowSize": "big"}"#).unwrap();
        let err = p.usize("windowSize").unwrap_err().to_string();
        assert!(err.contains("windowSize"));
        let err = p.f64("missing").unwrap_err().to_string();
        assert!(err.contains("missing"));
    }

    #[test]
    fn unknown_keys_ignored() {
        let p = StageParams::from_json(r#"{"bogus": 1}"#).unwrap();
        assert_eq!(p.usize_or("windowSize", 4).unwrap(), 4);
    }

    #[test]
    fn non_integer_rejected() {
        let p = StageParams::from_json(r#"{"windowSize": 2.5}"#).unwrap();
        assert!(p.usize("windowSize").is_err());
    }
}
