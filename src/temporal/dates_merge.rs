//! Cross-turn merge of date values.
//!
//! The inputs are the date fragments recognized this turn, plus at most one
//! retained value from earlier turns. The new fragments are folded into one value
//! first:
//!
//! ```text
//!   one fragment            -> it
//!   several, all grains differ -> contents joined in turn order, parsed again
//!   otherwise               -> most probable fragment
//! ```
//!
//! Then, if a date was retained, the new value is read relative to it. Which
//! reading applies depends on the new fragment's wording, looked up in the
//! [`LocalePatterns`](super::locale) table of the call's language:
//!
//! | wording            | result                                                   |
//! |--------------------|----------------------------------------------------------|
//! | day in month       | retained month, new day, kept if not before today        |
//! | day in week        | nearest such weekday around the retained date, if not past |
//! | additive           | fragment parsed again with the retained start as "now"   |
//! | time of day        | fragment parsed again on the retained day                |
//! | anything else      | the new value alone                                      |
//!
//! A retained value that already ended never anchors a time of day.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, TimeZone, Weekday};
use tracing::{debug, error, warn};

use super::grain::days_in_month;
use super::locale::{LocalePatterns, patterns_for};
use super::{DATETIME_ENTITY_TYPE, DateEntityGrain, TIME_DIMENSION, TemporalParseRequest, TemporalParser};
use crate::context::EntityCallContextForEntity;
use crate::provider::ValuesMerger;
use crate::text::normalize_spaces;
use crate::{Error, Result, Value, ValueDescriptor};

/// How the new fragment is re-read against the retained date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MergeGrain {
    /// Parse relative to the retained start itself rather than its truncation.
    additive: bool,
    grain: DateEntityGrain,
}

pub struct DatesMerge {
    parser: Arc<dyn TemporalParser>,
}

impl DatesMerge {
    pub fn new(parser: Arc<dyn TemporalParser>) -> Self {
        Self { parser }
    }

    fn parse_date(&self, language: &str, reference: DateTime<FixedOffset>, text: &str) -> Option<ValueDescriptor> {
        let request = TemporalParseRequest::new(language, TIME_DIMENSION, reference, text);
        match self.parser.parse(&request) {
            Ok(found) => found.into_iter().next().map(|p| ValueDescriptor::new(p.value, Some(text.to_string()))),
            Err(err) => {
                error!(text, error = %err, "date parsing failed during merge");
                None
            }
        }
    }

    fn concat(&self, context: &EntityCallContextForEntity, values: &[ValueDescriptor]) -> Result<ValueDescriptor> {
        let fresh: Vec<&ValueDescriptor> = values.iter().filter(|v| !v.retained).collect();
        let most_probable = || {
            fresh.iter().copied().reduce(|best, v| if v.probability > best.probability { v } else { best }).cloned()
        };

        match fresh.as_slice() {
            [] => Err(Error::InvalidInput("date merge needs at least one new value".into())),
            [only] => Ok((*only).clone()),
            _ => {
                let grains = fresh.iter().map(|v| grain_of(v)).collect::<Result<BTreeSet<_>>>()?;
                let merged = if grains.len() == fresh.len() {
                    let mut ordered = fresh.clone();
                    ordered.sort_by_key(|v| v.position);
                    let joined = ordered.iter().filter_map(|v| v.content.as_deref()).collect::<Vec<_>>().join(" ");
                    debug!(text = %joined, "parsing concatenated date fragments");
                    self.parse_date(&context.locale.language(), context.reference_date, &joined).or_else(most_probable)
                } else {
                    most_probable()
                };
                merged.ok_or_else(|| Error::InvalidInput("no date value to merge".into()))
            }
        }
    }

    /// Read `new` relative to `old`; failures fall back to `new`.
    fn merge_date(
        &self,
        context: &EntityCallContextForEntity,
        old: &ValueDescriptor,
        new: ValueDescriptor,
    ) -> ValueDescriptor {
        match self.try_merge_date(context, old, &new) {
            Ok(Some(merged)) => merged,
            Ok(None) => new,
            Err(err) => {
                error!(content = ?new.content, error = %err, "date merge failed, keeping the new value");
                new
            }
        }
    }

    fn try_merge_date(
        &self,
        context: &EntityCallContextForEntity,
        old: &ValueDescriptor,
        new: &ValueDescriptor,
    ) -> Result<Option<ValueDescriptor>> {
        let reference = context.reference_date;
        let zone = *reference.offset();
        let today = DateEntityGrain::Day.truncate(reference);
        let old_start = start_of(old)?.with_timezone(&zone);
        let patterns = patterns_for(&context.locale);
        let content = new.content.as_deref().map(normalize_spaces);
        let matched = patterns.zip(content.as_deref());

        if let Some((patterns, content)) = matched {
            if let Some(day) = patterns.day_of_month(content) {
                let date = with_day_of_month(old_start, day)?;
                if date >= today {
                    debug!(day, "changing day of month of the retained date");
                    return Ok(Some(ValueDescriptor::new(Value::date(date, DateEntityGrain::Day), new.content.clone())));
                }
            }
            if patterns.day_in_week.is_match(content) {
                let date = change_weekday(old_start, patterns.weekday_in(content), today);
                if date >= today {
                    debug!(weekday = %date.weekday(), "changing day of week of the retained date");
                    return Ok(Some(ValueDescriptor::new(Value::date(date, DateEntityGrain::Day), new.content.clone())));
                }
            }
        }

        let merge_grain = match matched {
            Some((patterns, content)) if patterns.additive.is_match(content) => {
                Some(MergeGrain { additive: true, grain: grain_of(new)? })
            }
            _ => merge_grain(matched, old, reference)?,
        };

        let (Some(merge_grain), Some(text)) = (merge_grain, new.content.as_deref()) else {
            return Ok(None);
        };
        let anchor = if merge_grain.additive { old_start } else { merge_grain.grain.truncate(old_start) };
        debug!(text, anchor = %anchor, additive = merge_grain.additive, "parsing again against the retained date");
        Ok(self.parse_date(&context.locale.language(), anchor, text))
    }
}

impl ValuesMerger for DatesMerge {
    fn merge(&self, context: &EntityCallContextForEntity, values: &[ValueDescriptor]) -> Result<Option<ValueDescriptor>> {
        if context.entity_type.name != DATETIME_ENTITY_TYPE {
            warn!(entity_type = %context.entity_type.name, "date merge called for a non date entity type");
            return Ok(None);
        }

        let concatenated = self.concat(context, values)?;
        Ok(Some(match values.iter().find(|v| v.retained) {
            Some(retained) => self.merge_date(context, retained, concatenated),
            None => concatenated,
        }))
    }
}

/// Only a time of day on a retained date that has not ended yet is merged.
fn merge_grain(
    matched: Option<(&LocalePatterns, &str)>,
    old: &ValueDescriptor,
    reference: DateTime<FixedOffset>,
) -> Result<Option<MergeGrain>> {
    if end_of(old)? < reference {
        return Ok(None);
    }
    Ok(match matched {
        Some((patterns, content)) if patterns.change_hour.is_match(content) => {
            Some(MergeGrain { additive: false, grain: DateEntityGrain::Day })
        }
        _ => None,
    })
}

fn start_of(v: &ValueDescriptor) -> Result<DateTime<FixedOffset>> {
    v.value.date_start().ok_or_else(|| not_a_date(v))
}

fn end_of(v: &ValueDescriptor) -> Result<DateTime<FixedOffset>> {
    v.value.date_end().ok_or_else(|| not_a_date(v))
}

fn grain_of(v: &ValueDescriptor) -> Result<DateEntityGrain> {
    v.value.date_grain().ok_or_else(|| not_a_date(v))
}

fn not_a_date(v: &ValueDescriptor) -> Error {
    Error::InvalidInput(format!("not a date value: {:?}", v.value))
}

fn with_day_of_month(start: DateTime<FixedOffset>, day: u32) -> Result<DateTime<FixedOffset>> {
    let invalid = || Error::InvalidInput(format!("no day {day} in {}", start.format("%Y-%m")));
    if day == 0 || day > days_in_month(start.year(), start.month()) {
        return Err(invalid());
    }
    let date = start.date_naive().with_day(day).ok_or_else(invalid)?;
    start.offset().from_local_datetime(&date.and_time(NaiveTime::default())).single().ok_or_else(invalid)
}

/// Weekday named in the new fragment, placed around the retained date.
///
/// Later in the week (or Sunday) moves forward; earlier moves back unless that
/// lands before today, in which case it moves forward too.
fn change_weekday(
    old_start: DateTime<FixedOffset>,
    named: Option<Weekday>,
    today: DateTime<FixedOffset>,
) -> DateTime<FixedOffset> {
    let old_weekday = old_start.weekday();
    let new_weekday = named.unwrap_or(old_weekday);
    let day = |dt| DateEntityGrain::Day.truncate(dt);

    if old_weekday == new_weekday {
        return day(old_start);
    }
    let previous = day(previous_weekday(old_start, new_weekday));
    if old_weekday.number_from_monday() < new_weekday.number_from_monday()
        || new_weekday == Weekday::Sun
        || previous < today
    {
        day(next_weekday(old_start, new_weekday))
    } else {
        previous
    }
}

/// Strictly after `dt`.
fn next_weekday(dt: DateTime<FixedOffset>, weekday: Weekday) -> DateTime<FixedOffset> {
    let ahead = (7 + weekday.num_days_from_monday() - dt.weekday().num_days_from_monday()) % 7;
    dt + Duration::days(i64::from(if ahead == 0 { 7 } else { ahead }))
}

/// Strictly before `dt`.
fn previous_weekday(dt: DateTime<FixedOffset>, weekday: Weekday) -> DateTime<FixedOffset> {
    let behind = (7 + dt.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    dt - Duration::days(i64::from(if behind == 0 { 7 } else { behind }))
}
