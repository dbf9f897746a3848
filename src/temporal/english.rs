//! In-process English date parser.
//!
//! Covers the `time` dimension only, for when no Duckling server is configured.
//! The whole text is read as one date expression; the grain is guessed from
//! whether a clock time was written. A bare clock time behind a preposition
//! ("at 10", "around 3pm") is read as `HH:MM`, which chrono-english accepts.

use chrono_english::{Dialect, parse_date_string};
use tracing::trace;

use super::{DateEntityGrain, ParsedValue, TIME_DIMENSION, TemporalParseRequest, TemporalParser};
use crate::{Result, TextSpan, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct EnglishDateParser {
    /// Read `04/05` as April 5th.
    us_dates: bool,
}

impl EnglishDateParser {
    pub fn new(us_dates: bool) -> Self {
        Self { us_dates }
    }

    fn dialect(&self) -> Dialect {
        if self.us_dates { Dialect::Us } else { Dialect::Uk }
    }
}

fn grain_of(text: &str) -> DateEntityGrain {
    if regex!(r"\d:[0-5]\d").is_match(text) {
        DateEntityGrain::Minute
    } else if regex!(r"(?i)\d\s*(am|pm|h)\b|\b(noon|midnight|o'?clock)\b").is_match(text) {
        DateEntityGrain::Hour
    } else {
        DateEntityGrain::Day
    }
}

/// `at 10`, `around 3pm`, `by 10h30` as a 24-hour `HH:MM`, with its grain.
fn clock_time(text: &str) -> Option<(String, DateEntityGrain)> {
    let caps = full_regex!(
        r"(?i)(at|around|about|by) +(?P<hour>[01]?\d|2[0-3])(?:(?::|h)(?P<minute>[0-5]\d))? *(?P<suffix>am|pm|h|o'?clock)?"
    )
    .captures(text)?;

    let mut hour: u32 = caps["hour"].parse().ok()?;
    match caps.name("suffix").map(|s| s.as_str().to_ascii_lowercase()).as_deref() {
        Some("pm") if hour < 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }
    let (minute, grain) = match caps.name("minute") {
        Some(m) => (m.as_str().parse().ok()?, DateEntityGrain::Minute),
        None => (0u32, DateEntityGrain::Hour),
    };
    Some((format!("{hour:02}:{minute:02}"), grain))
}

impl TemporalParser for EnglishDateParser {
    fn parse(&self, request: &TemporalParseRequest<'_>) -> Result<Vec<ParsedValue>> {
        let wanted = request.dimensions.iter().any(|d| d == TIME_DIMENSION);
        let text = request.text.trim();
        if !wanted || !request.language.eq_ignore_ascii_case("en") || text.is_empty() {
            return Ok(Vec::new());
        }

        let (expression, grain) = match clock_time(text) {
            Some((clock, grain)) => (clock, grain),
            None => (text.to_string(), grain_of(text)),
        };
        let date = match parse_date_string(&expression, request.reference_date, self.dialect()) {
            Ok(date) => date,
            Err(err) => {
                trace!(text, error = %err, "not an english date");
                return Ok(Vec::new());
            }
        };

        let start = request.text.chars().take_while(|c| c.is_whitespace()).count();
        Ok(vec![ParsedValue {
            dimension: TIME_DIMENSION.into(),
            span: TextSpan::new(start, start + text.chars().count()),
            value: Value::date(grain.truncate(date), grain),
        }])
    }
}
