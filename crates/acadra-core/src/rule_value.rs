//! Typed rule value boundary.
//!
//! Rule values are stored as raw strings and cast exactly once, at the
//! resolver boundary, into the [RuleValue] union. Downstream code never
//! touches the raw string again. Constraints declared on a rule (numeric
//! bounds, allowed values, pattern) are checked against the cast value.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// Declared type of a rule's value column.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Boolean,
    Integer,
    Decimal,
    String,
    Json,
    Array,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::Integer => "integer",
            ValueType::Decimal => "decimal",
            ValueType::String => "string",
            ValueType::Json => "json",
            ValueType::Array => "array",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EngineError> {
        match value {
            "boolean" => Ok(ValueType::Boolean),
            "integer" => Ok(ValueType::Integer),
            "decimal" => Ok(ValueType::Decimal),
            "string" => Ok(ValueType::String),
            "json" => Ok(ValueType::Json),
            "array" => Ok(ValueType::Array),
            other => Err(EngineError::Validation(format!(
                "unknown value_type '{}'. expected one of: boolean, integer, decimal, string, json, array",
                other
            ))),
        }
    }
}

/// A rule value after the typed cast.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RuleValue {
    Bool(bool),
    Int(i64),
    Decimal(f64),
    Text(String),
    Json(Value),
    StringArray(Vec<String>),
}

impl RuleValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RuleValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RuleValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value; integers widen to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RuleValue::Int(i) => Some(*i as f64),
            RuleValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RuleValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string_array(&self) -> Option<&[String]> {
        match self {
            RuleValue::StringArray(items) => Some(items),
            _ => None,
        }
    }
}

/// Cast a raw stored string into the declared value type.
pub fn cast_value(raw: &str, value_type: ValueType) -> Result<RuleValue, EngineError> {
    let trimmed = raw.trim();
    match value_type {
        ValueType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(RuleValue::Bool(true)),
            "0" | "false" | "no" | "off" => Ok(RuleValue::Bool(false)),
            other => Err(EngineError::RuleValue(format!(
                "cannot cast '{}' to boolean",
                other
            ))),
        },
        ValueType::Integer => trimmed
            .parse::<i64>()
            .map(RuleValue::Int)
            .map_err(|e| EngineError::RuleValue(format!("cannot cast '{}' to integer: {}", trimmed, e))),
        ValueType::Decimal => {
            let parsed = trimmed.parse::<f64>().map_err(|e| {
                EngineError::RuleValue(format!("cannot cast '{}' to decimal: {}", trimmed, e))
            })?;
            if !parsed.is_finite() {
                return Err(EngineError::RuleValue(format!(
                    "decimal value '{}' is not finite",
                    trimmed
                )));
            }
            Ok(RuleValue::Decimal(parsed))
        }
        ValueType::String => Ok(RuleValue::Text(raw.to_string())),
        ValueType::Json => serde_json::from_str(trimmed)
            .map(RuleValue::Json)
            .map_err(|e| EngineError::RuleValue(format!("cannot cast value to json: {}", e))),
        ValueType::Array => {
            if trimmed.starts_with('[') {
                let items: Vec<String> = serde_json::from_str(trimmed).map_err(|e| {
                    EngineError::RuleValue(format!("cannot cast value to string array: {}", e))
                })?;
                Ok(RuleValue::StringArray(items))
            } else {
                // Bare comma-separated form, kept for hand-entered values.
                let items = trimmed
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                Ok(RuleValue::StringArray(items))
            }
        }
    }
}

/// Declared constraints on a rule's value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuleConstraints {
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub allowed_values: Option<Vec<String>>,
    pub pattern: Option<String>,
}

impl RuleConstraints {
    pub fn is_empty(&self) -> bool {
        self.min_value.is_none()
            && self.max_value.is_none()
            && self.allowed_values.is_none()
            && self.pattern.is_none()
    }

    /// Check a cast value against these constraints.
    pub fn check(&self, value: &RuleValue) -> Result<(), EngineError> {
        if let Some(min) = self.min_value {
            if let Some(n) = value.as_f64() {
                if n < min {
                    return Err(EngineError::RuleValue(format!(
                        "value {} is below the declared minimum {}",
                        n, min
                    )));
                }
            }
        }
        if let Some(max) = self.max_value {
            if let Some(n) = value.as_f64() {
                if n > max {
                    return Err(EngineError::RuleValue(format!(
                        "value {} is above the declared maximum {}",
                        n, max
                    )));
                }
            }
        }
        if let Some(allowed) = &self.allowed_values {
            let violation = match value {
                RuleValue::Text(s) => (!allowed.contains(s)).then(|| s.clone()),
                RuleValue::StringArray(items) => {
                    items.iter().find(|s| !allowed.contains(s)).cloned()
                }
                _ => None,
            };
            if let Some(bad) = violation {
                return Err(EngineError::RuleValue(format!(
                    "value '{}' is not in the allowed set [{}]",
                    bad,
                    allowed.join(", ")
                )));
            }
        }
        if let Some(pattern) = &self.pattern {
            if let RuleValue::Text(s) = value {
                let re = Regex::new(pattern).map_err(|e| {
                    EngineError::RuleValue(format!("invalid pattern constraint '{}': {}", pattern, e))
                })?;
                if !re.is_match(s) {
                    return Err(EngineError::RuleValue(format!(
                        "value '{}' does not match pattern '{}'",
                        s, pattern
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{cast_value, RuleConstraints, RuleValue, ValueType};

    #[test]
    fn boolean_cast_accepts_common_forms() {
        for raw in ["1", "true", "YES", "on"] {
            assert_eq!(cast_value(raw, ValueType::Boolean).unwrap(), RuleValue::Bool(true));
        }
        for raw in ["0", "false", "No", "off"] {
            assert_eq!(cast_value(raw, ValueType::Boolean).unwrap(), RuleValue::Bool(false));
        }
        assert!(cast_value("maybe", ValueType::Boolean).is_err());
    }

    #[test]
    fn integer_and_decimal_casts() {
        assert_eq!(cast_value("42", ValueType::Integer).unwrap(), RuleValue::Int(42));
        assert!(cast_value("42.5", ValueType::Integer).is_err());
        assert_eq!(
            cast_value("75.5", ValueType::Decimal).unwrap(),
            RuleValue::Decimal(75.5)
        );
        assert!(cast_value("inf", ValueType::Decimal).is_err());
    }

    #[test]
    fn array_cast_accepts_json_and_csv_forms() {
        let json = cast_value(r#"["pass","completed"]"#, ValueType::Array).unwrap();
        let csv = cast_value("pass, completed", ValueType::Array).unwrap();
        assert_eq!(json, csv);
    }

    #[test]
    fn json_cast_preserves_structure() {
        let v = cast_value(r#"{"grace_marks": 3}"#, ValueType::Json).unwrap();
        match v {
            RuleValue::Json(obj) => assert_eq!(obj["grace_marks"], 3),
            other => panic!("expected json value, got {:?}", other),
        }
    }

    #[test]
    fn numeric_bounds_are_enforced() {
        let constraints = RuleConstraints {
            min_value: Some(0.0),
            max_value: Some(100.0),
            ..Default::default()
        };
        assert!(constraints.check(&RuleValue::Decimal(75.0)).is_ok());
        assert!(constraints.check(&RuleValue::Decimal(101.0)).is_err());
        assert!(constraints.check(&RuleValue::Int(-1)).is_err());
    }

    #[test]
    fn allowed_values_apply_to_text_and_arrays() {
        let constraints = RuleConstraints {
            allowed_values: Some(vec!["pass".into(), "completed".into()]),
            ..Default::default()
        };
        assert!(constraints.check(&RuleValue::Text("pass".into())).is_ok());
        assert!(constraints.check(&RuleValue::Text("fail".into())).is_err());
        assert!(constraints
            .check(&RuleValue::StringArray(vec!["pass".into(), "fail".into()]))
            .is_err());
    }

    #[test]
    fn pattern_applies_to_text() {
        let constraints = RuleConstraints {
            pattern: Some("^[A-Z]{2}$".into()),
            ..Default::default()
        };
        assert!(constraints.check(&RuleValue::Text("FY".into())).is_ok());
        assert!(constraints.check(&RuleValue::Text("first".into())).is_err());
    }
}
