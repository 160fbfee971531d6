//! The value a harness run produces.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::execution::Value;

/// Absolute tolerance when scoring a numeric answer against its target.
pub const SCORE_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Numeric(f64),
    Text(String),
    /// No answer could be produced; `reason` says why.
    Unresolved { reason: String },
}

impl Answer {
    pub fn unresolved(reason: impl Into<String>) -> Self {
        Self::Unresolved { reason: reason.into() }
    }

    /// Numeric when the trimmed text parses as a number.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Self::unresolved("empty answer");
        }
        match trimmed.parse::<f64>() {
            Ok(n) => Self::Numeric(n),
            Err(_) => Self::Text(trimmed.to_string()),
        }
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Int(i) => Self::Numeric(*i as f64),
            Value::Float(f) => Self::Numeric(*f),
            Value::Bool(b) => Self::Numeric(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => Self::from_text(s),
            Value::None => Self::unresolved("program produced None"),
            other => Self::Text(other.repr()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved { .. })
    }

    pub fn is_correct(&self, target: f64) -> bool {
        self.as_number().is_some_and(|n| (n - target).abs() < SCORE_TOLERANCE)
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Unresolved { reason } => write!(f, "<unresolved: {reason}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_becomes_numeric_when_it_parses() {
        assert_eq!(Answer::from_text(" 29 "), Answer::Numeric(29.0));
        assert_eq!(Answer::from_text("8.5\n"), Answer::Numeric(8.5));
        assert_eq!(Answer::from_text("eight"), Answer::Text("eight".into()));
        assert!(!Answer::from_text("  ").is_resolved());
    }

    #[test]
    fn values_convert() {
        assert_eq!(Answer::from_value(&Value::Int(8)), Answer::Numeric(8.0));
        assert_eq!(Answer::from_value(&Value::Str("33".into())), Answer::Numeric(33.0));
        assert!(!Answer::from_value(&Value::None).is_resolved());
    }

    #[test]
    fn scoring_uses_tolerance() {
        assert!(Answer::Numeric(8.0004).is_correct(8.0));
        assert!(!Answer::Numeric(8.01).is_correct(8.0));
        assert!(!Answer::Text("8".into()).is_correct(8.0));
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(Answer::Numeric(8.0)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "numeric", "value": 8.0}));
    }
}
