//! Temporal and numeric entity types.
//!
//! Values come from a [`TemporalParser`]: a Duckling server over HTTP in
//! production, or the in-process [`EnglishDateParser`] for English dates. The
//! [`TemporalProvider`] exposes a parser to the provider registry as classifier,
//! evaluator and, for dates, cross-turn merger.
//!
//! ```text
//!   TemporalProvider ──┬── classify : one parse call per entity type of the intent
//!                      ├── evaluate : first value of the span, 1.0 if it covers it
//!                      └── merge    : DatesMerge (datetime only)
//!                                        │
//!                                        └── LocalePatterns (fr, en)
//! ```
//!
//! Entity types live in the `duckling` namespace: `duckling:datetime` maps to
//! the `time` dimension, every other type to the dimension of the same name.

#[path = "temporal/dates_merge.rs"]
mod dates_merge;
#[path = "temporal/english.rs"]
mod english;
#[path = "temporal/grain.rs"]
mod grain;
#[path = "temporal/locale.rs"]
mod locale;
#[path = "temporal/parser.rs"]
mod parser;
#[path = "temporal/provider.rs"]
mod provider;
#[path = "temporal/value.rs"]
mod value;

pub use dates_merge::DatesMerge;
pub use english::EnglishDateParser;
pub use grain::DateEntityGrain;
pub use parser::{DucklingClient, ParsedValue, TemporalParseRequest, TemporalParser};
pub use provider::TemporalProvider;
pub use value::{DateEntityValue, DateIntervalEntityValue};

pub const DUCKLING_NAMESPACE: &str = "duckling";
pub const DATETIME_ENTITY_TYPE: &str = "duckling:datetime";
pub const TIME_DIMENSION: &str = "time";

/// Dimensions served, besides `time`.
pub const DIMENSIONS: &[&str] = &[
    TIME_DIMENSION,
    "number",
    "ordinal",
    "distance",
    "temperature",
    "volume",
    "amount-of-money",
    "duration",
    "email",
    "url",
    "phone-number",
];

/// Parser dimension for a `duckling:*` entity type name.
pub fn dimension_of(entity_type: &str) -> Option<&'static str> {
    if entity_type == DATETIME_ENTITY_TYPE {
        return Some(TIME_DIMENSION);
    }
    let dimension = entity_type.strip_prefix(DUCKLING_NAMESPACE)?.strip_prefix(':')?;
    DIMENSIONS.iter().copied().find(|d| *d == dimension && *d != TIME_DIMENSION)
}

/// Entity type name for a parser dimension.
pub fn entity_type_of(dimension: &str) -> String {
    if dimension == TIME_DIMENSION {
        DATETIME_ENTITY_TYPE.to_string()
    } else {
        format!("{DUCKLING_NAMESPACE}:{dimension}")
    }
}
