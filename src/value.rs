//! Typed entity values.
//!
//! Every evaluator produces a [`Value`]. Dates carry their grain so later turns
//! can tell "tomorrow" (a whole day) from "tomorrow at 10" (one hour).

use serde::{Deserialize, Serialize};

use crate::temporal::{DateEntityValue, DateIntervalEntityValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    Date(DateEntityValue),
    DateInterval(DateIntervalEntityValue),
    Number { value: f64 },
    Ordinal { value: f64 },
    Duration { seconds: i64 },
    Quantity { dimension: String, value: f64, unit: String },
    Text { dimension: String, value: String },
    Custom(CustomValue),
}

impl Value {
    pub fn custom(value: impl Into<String>) -> Self {
        Value::Custom(CustomValue::new(value))
    }

    pub fn number(value: f64) -> Self {
        Value::Number { value }
    }

    pub fn as_custom(&self) -> Option<&CustomValue> {
        match self {
            Value::Custom(custom) => Some(custom),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateEntityValue> {
        match self {
            Value::Date(date) => Some(date),
            _ => None,
        }
    }
}

/// A value picked out of a closed set, with the runners-up kept for disambiguation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomValue {
    pub value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<RankedCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub value: String,
    pub probability: f64,
}

impl CustomValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), candidates: Vec::new() }
    }

    /// Best candidate other than the chosen value.
    pub fn next_best(&self) -> Option<&RankedCandidate> {
        self.candidates.iter().find(|c| c.value != self.value)
    }
}

/// One input to a per-type merge strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueDescriptor {
    pub value: Value,
    pub content: Option<String>,
    /// Set for the value carried over from an earlier turn.
    #[serde(default)]
    pub retained: bool,
    /// Start offset in the current utterance, when known.
    #[serde(default)]
    pub position: Option<usize>,
    #[serde(default = "full_probability")]
    pub probability: f64,
}

fn full_probability() -> f64 {
    1.0
}

impl ValueDescriptor {
    pub fn new(value: Value, content: Option<String>) -> Self {
        Self { value, content, retained: false, position: None, probability: 1.0 }
    }

    pub fn retained(value: Value, content: Option<String>) -> Self {
        Self { retained: true, ..Self::new(value, content) }
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }
}
