//! Date values and their ranges.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::DateEntityGrain;
use crate::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateEntityValue {
    pub date: DateTime<FixedOffset>,
    pub grain: DateEntityGrain,
}

impl DateEntityValue {
    pub fn new(date: DateTime<FixedOffset>, grain: DateEntityGrain) -> Self {
        Self { date, grain }
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.grain.end_from(self.date)
    }
}

/// `[from, to)`; the upper bound is exclusive, as parsers report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateIntervalEntityValue {
    pub from: DateEntityValue,
    pub to: DateEntityValue,
}

impl DateIntervalEntityValue {
    pub fn new(from: DateEntityValue, to: DateEntityValue) -> Self {
        Self { from, to }
    }
}

impl Value {
    pub fn date(date: DateTime<FixedOffset>, grain: DateEntityGrain) -> Self {
        Value::Date(DateEntityValue::new(date, grain))
    }

    pub fn date_start(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Value::Date(v) => Some(v.date),
            Value::DateInterval(v) => Some(v.from.date),
            _ => None,
        }
    }

    pub fn date_end(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Value::Date(v) => Some(v.end()),
            Value::DateInterval(v) => Some(v.to.date),
            _ => None,
        }
    }

    /// Grain of a date, or of an interval's lower bound.
    pub fn date_grain(&self) -> Option<DateEntityGrain> {
        match self {
            Value::Date(v) => Some(v.grain),
            Value::DateInterval(v) => Some(v.from.grain),
            _ => None,
        }
    }
}
