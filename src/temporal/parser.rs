//! Temporal/numeric parser backends.
//!
//! [`DucklingClient`] talks to a Duckling HTTP server; anything implementing
//! [`TemporalParser`] can stand in for it (the local English parser, test fakes).

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, FixedOffset, Timelike};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{DateEntityGrain, DateEntityValue, DateIntervalEntityValue, TIME_DIMENSION};
use crate::{Error, Result, TextSpan, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct TemporalParseRequest<'a> {
    pub language: String,
    pub dimensions: Vec<String>,
    pub reference_date: DateTime<FixedOffset>,
    pub text: &'a str,
}

impl<'a> TemporalParseRequest<'a> {
    pub fn new(language: impl Into<String>, dimension: &str, reference_date: DateTime<FixedOffset>, text: &'a str) -> Self {
        Self { language: language.into(), dimensions: vec![dimension.to_string()], reference_date, text }
    }

    pub fn reference_timezone(&self) -> String {
        self.reference_date.offset().to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedValue {
    pub dimension: String,
    pub span: TextSpan,
    pub value: Value,
}

pub trait TemporalParser: Send + Sync {
    fn parse(&self, request: &TemporalParseRequest<'_>) -> Result<Vec<ParsedValue>>;

    fn healthcheck(&self) -> bool {
        true
    }
}

// --- Duckling over HTTP -----------------------------------------------------

#[derive(Debug, Clone)]
pub struct DucklingClient {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl DucklingClient {
    pub fn new(base_url: impl Into<String>, timeout: StdDuration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { base_url, http })
    }
}

impl TemporalParser for DucklingClient {
    fn parse(&self, request: &TemporalParseRequest<'_>) -> Result<Vec<ParsedValue>> {
        let url = format!("{}/parse", self.base_url);
        let dims = serde_json::to_string(&request.dimensions)?;
        let reftime = request.reference_date.timestamp_millis().to_string();

        let response = self
            .http
            .post(&url)
            .form(&[
                ("lang", request.language.as_str()),
                ("text", request.text),
                ("dims", dims.as_str()),
                ("reftime", reftime.as_str()),
            ])
            .send()
            .map_err(|err| Error::from_transport(err, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status { status: status.as_u16(), url });
        }

        let entities: Vec<DucklingEntity> = response.json()?;
        debug!(text = request.text, dims = %dims, count = entities.len(), "duckling answered");
        Ok(decode(&entities, &request.dimensions, request.reference_date.offset()))
    }

    fn healthcheck(&self) -> bool {
        match self.http.get(&self.base_url).send() {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                warn!(url = %self.base_url, error = %err, "duckling healthcheck failed");
                false
            }
        }
    }
}

// --- Response decoding ------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DucklingEntity {
    pub start: usize,
    pub end: usize,
    pub dim: String,
    pub value: serde_json::Value,
}

pub(crate) fn decode(entities: &[DucklingEntity], dimensions: &[String], offset: &FixedOffset) -> Vec<ParsedValue> {
    let mut out = Vec::new();
    for dimension in dimensions {
        match dimension.as_str() {
            TIME_DIMENSION => out.extend(decode_times(entities, offset)),
            "duration" => out.extend(decode_duration(entities)),
            other => out.extend(entities.iter().filter(|e| e.dim == other).filter_map(decode_simple)),
        }
    }
    out
}

fn decode_simple(entity: &DucklingEntity) -> Option<ParsedValue> {
    let v = &entity.value;
    let number = || v.get("value").and_then(serde_json::Value::as_f64);
    let text = || v.get("value").and_then(serde_json::Value::as_str).map(str::to_string);
    let unit = || v.get("unit").and_then(serde_json::Value::as_str).unwrap_or_default().to_string();

    let value = match entity.dim.as_str() {
        "number" => Value::Number { value: number()? },
        "ordinal" => Value::Ordinal { value: number()? },
        "distance" | "volume" | "temperature" | "amount-of-money" | "quantity" => {
            Value::Quantity { dimension: entity.dim.clone(), value: number()?, unit: unit() }
        }
        "email" | "url" | "phone-number" => Value::Text { dimension: entity.dim.clone(), value: text()? },
        other => {
            warn!(dimension = other, "unsupported duckling dimension");
            return None;
        }
    };
    Some(ParsedValue { dimension: entity.dim.clone(), span: TextSpan::new(entity.start, entity.end), value })
}

/// All durations of the answer summed into one value.
fn decode_duration(entities: &[DucklingEntity]) -> Option<ParsedValue> {
    let mut total = 0i64;
    let mut span: Option<TextSpan> = None;
    for entity in entities.iter().filter(|e| e.dim == "duration") {
        let normalized = entity.value.get("normalized")?;
        if normalized.get("unit").and_then(serde_json::Value::as_str) != Some("second") {
            warn!(value = %normalized, "duration not normalized to seconds");
            continue;
        }
        total += normalized.get("value").and_then(serde_json::Value::as_f64)? as i64;
        let here = TextSpan::new(entity.start, entity.end);
        span = Some(span.map_or(here, |s| s.union(&here)));
    }
    span.map(|span| ParsedValue { dimension: "duration".into(), span, value: Value::Duration { seconds: total } })
}

fn date_of(v: &serde_json::Value, offset: &FixedOffset) -> Option<DateEntityValue> {
    let date = DateTime::parse_from_rfc3339(v.get("value")?.as_str()?).ok()?.with_timezone(offset);
    let grain: DateEntityGrain = serde_json::from_value(v.get("grain")?.clone()).ok()?;
    Some(DateEntityValue::new(date, grain))
}

fn decode_times(entities: &[DucklingEntity], offset: &FixedOffset) -> Vec<ParsedValue> {
    let found: Vec<ParsedValue> = entities
        .iter()
        .filter(|e| e.dim == TIME_DIMENSION)
        .filter_map(|e| {
            let v = &e.value;
            let value = if v.get("grain").is_some() {
                Value::Date(date_of(v, offset)?)
            } else {
                let from = v.get("from").and_then(|f| date_of(f, offset));
                let to = v.get("to").and_then(|t| date_of(t, offset));
                match (from, to) {
                    (Some(from), Some(to)) => Value::DateInterval(DateIntervalEntityValue::new(from, to)),
                    (Some(single), None) | (None, Some(single)) => Value::Date(single),
                    (None, None) => return None,
                }
            };
            Some(ParsedValue { dimension: TIME_DIMENSION.into(), span: TextSpan::new(e.start, e.end), value })
        })
        .collect();
    fuse_overlapping(found)
}

/// Pairs of overlapping neighbours become one value: an interval for equal grains,
/// otherwise the day of one with the time of day of the other.
pub(crate) fn fuse_overlapping(mut found: Vec<ParsedValue>) -> Vec<ParsedValue> {
    found.sort_by_key(|p| (p.span.start, p.span.end));
    let mut fused = Vec::with_capacity(found.len());
    let mut iter = found.into_iter().peekable();
    while let Some(current) = iter.next() {
        match iter.next_if(|next| current.span.end > next.span.start) {
            Some(next) => fused.push(fuse(current, next)),
            None => fused.push(current),
        }
    }
    fused
}

fn fuse(first: ParsedValue, second: ParsedValue) -> ParsedValue {
    let span = TextSpan::new(first.span.start, second.span.end.max(first.span.end));
    let value = match (&first.value, &second.value) {
        (Value::Date(a), Value::Date(b)) if a.grain == b.grain => Value::DateInterval(DateIntervalEntityValue::new(*a, *b)),
        (Value::Date(a), Value::Date(b)) => {
            let (day, time) = if a.grain.is_time() { (b, a) } else { (a, b) };
            let date = DateEntityGrain::Day.truncate(day.date) + Duration::seconds(i64::from(time.date.num_seconds_from_midnight()));
            Value::date(date, time.grain)
        }
        _ => return first,
    };
    ParsedValue { dimension: first.dimension, span, value }
}
