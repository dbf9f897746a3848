//! Entity recognition merging for conversational agents.
//!
//! A parsed utterance arrives with two lists of candidate recognitions: spans the
//! intent model already bound to a slot, and spans entity-type providers found on
//! their own. [`merge::EntityMerge`] folds them into one non-overlapping list of
//! slot-bound recognitions. Across turns, [`values_merge::CrossTurnMerge`] folds
//! the new values of a slot with the value retained from earlier turns.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[macro_use]
mod macros;
mod classify;
mod dictionary;
mod error;
mod evaluate;
mod predefined;
mod text;

pub mod client;
pub mod config;
pub mod context;
pub mod dialog;
pub mod listener;
pub mod merge;
pub mod nlp_core;
pub mod provider;
pub mod temporal;
pub mod turn;
pub mod value;
pub mod values_merge;

pub use classify::classify_entity_types;
pub use dictionary::{DictionaryData, DictionaryProvider};
pub use error::{Error, Result};
pub use evaluate::evaluate_entities;
pub use predefined::PredefinedValuesProvider;
pub use value::{CustomValue, RankedCandidate, Value, ValueDescriptor};

// --- Spans ------------------------------------------------------------------

/// Half-open character range `[start, end)` into an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end: end.max(start) }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Sharing at least one char; an empty span overlaps nothing.
    pub fn overlaps(&self, other: &TextSpan) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }

    /// Smallest span covering both.
    pub fn union(&self, other: &TextSpan) -> TextSpan {
        TextSpan::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// Slice `text` by char offsets; out-of-range bounds are clamped.
    pub fn text_of<'a>(&self, text: &'a str) -> &'a str {
        let byte = |idx: usize| text.char_indices().nth(idx).map(|(b, _)| b).unwrap_or(text.len());
        let start = byte(self.start);
        let end = byte(self.end).max(start);
        &text[start..end]
    }
}

impl fmt::Display for TextSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// --- Locale -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locale(String);

impl Locale {
    pub fn new(tag: impl Into<String>) -> Self {
        Locale(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary language subtag, lowercased: `fr_FR` and `fr-CA` both give `fr`.
    pub fn language(&self) -> String {
        self.0.split(['-', '_']).next().unwrap_or_default().to_ascii_lowercase()
    }

    pub fn same_language(&self, other: &Locale) -> bool {
        self.language() == other.language()
    }
}

impl Default for Locale {
    fn default() -> Self {
        Locale::new("en")
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Entity types -----------------------------------------------------------

/// A named value of a closed-set entity type, with per-locale synonyms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredefinedValue {
    pub value: String,
    #[serde(default)]
    pub labels: BTreeMap<Locale, Vec<String>>,
}

impl PredefinedValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), labels: BTreeMap::new() }
    }

    pub fn with_labels(mut self, locale: Locale, labels: &[&str]) -> Self {
        self.labels.insert(locale, labels.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Synonyms for `locale`, matched on language. Falls back to the value itself.
    pub fn synonyms(&self, locale: &Locale) -> Vec<&str> {
        let found: Vec<&str> = self
            .labels
            .iter()
            .filter(|(l, _)| l.same_language(locale))
            .flat_map(|(_, labels)| labels.iter().map(String::as_str))
            .collect();
        if found.is_empty() { vec![self.value.as_str()] } else { found }
    }
}

/// An entity type, named `namespace:name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_entities: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predefined_values: Vec<PredefinedValue>,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), sub_entities: Vec::new(), predefined_values: Vec::new() }
    }

    pub fn qualified(namespace: &str, name: &str) -> Self {
        Self::new(format!("{namespace}:{name}"))
    }

    pub fn namespace(&self) -> &str {
        self.name.split_once(':').map(|(ns, _)| ns).unwrap_or("")
    }

    pub fn short_name(&self) -> &str {
        self.name.split_once(':').map(|(_, name)| name).unwrap_or(&self.name)
    }

    pub fn with_predefined_values(mut self, values: Vec<PredefinedValue>) -> Self {
        self.predefined_values = values;
        self
    }

    pub fn with_sub_entities(mut self, sub_entities: Vec<Entity>) -> Self {
        self.sub_entities = sub_entities;
        self
    }
}

/// An entity type bound to a role, i.e. a slot of an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: EntityType,
    pub role: String,
}

impl Entity {
    pub fn new(entity_type: EntityType, role: impl Into<String>) -> Self {
        Self { entity_type, role: role.into() }
    }

    pub fn type_name(&self) -> &str {
        &self.entity_type.name
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.role, self.entity_type.name)
    }
}

// --- Recognitions -----------------------------------------------------------

/// A span a provider attributed to an entity type, not yet bound to a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeRecognition {
    pub span: TextSpan,
    pub entity_type: EntityType,
    pub value: Option<Value>,
    pub evaluated: bool,
    pub probability: f64,
}

impl EntityTypeRecognition {
    pub fn new(span: TextSpan, entity_type: EntityType, probability: f64) -> Self {
        Self { span, entity_type, value: None, evaluated: false, probability }
    }

    pub fn evaluated(mut self, value: Option<Value>) -> Self {
        self.value = value;
        self.evaluated = true;
        self
    }

    pub fn to_entity_recognition(&self, role: impl Into<String>) -> EntityRecognition {
        EntityRecognition {
            span: self.span,
            entity: Entity::new(self.entity_type.clone(), role),
            value: self.value.clone(),
            evaluated: self.evaluated,
            probability: self.probability,
            sub_entities: Vec::new(),
        }
    }
}

/// A span bound to a slot (entity type + role).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecognition {
    pub span: TextSpan,
    pub entity: Entity,
    pub value: Option<Value>,
    pub evaluated: bool,
    pub probability: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_entities: Vec<EntityRecognition>,
}

impl EntityRecognition {
    pub fn new(span: TextSpan, entity: Entity, probability: f64) -> Self {
        Self { span, entity, value: None, evaluated: false, probability, sub_entities: Vec::new() }
    }

    pub fn evaluated(mut self, value: Option<Value>) -> Self {
        self.value = value;
        self.evaluated = true;
        self
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity.entity_type
    }

    pub fn role(&self) -> &str {
        &self.entity.role
    }

    /// An evaluator ran and found nothing usable.
    pub fn is_evaluated_null(&self) -> bool {
        self.evaluated && self.value.is_none()
    }
}

/// Outcome of one evaluator call.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub evaluated: bool,
    pub value: Option<Value>,
    pub probability: f64,
}

impl EvaluationResult {
    pub fn unevaluated() -> Self {
        Self { evaluated: false, value: None, probability: 1.0 }
    }

    pub fn evaluated(value: Option<Value>, probability: f64) -> Self {
        Self { evaluated: true, value, probability }
    }
}

// --- Intents ----------------------------------------------------------------

/// `app:book` and `book` both give `book`.
pub(crate) fn without_namespace(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, short)| short).unwrap_or(name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl Intent {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(name: impl Into<String>, entities: Vec<Entity>) -> Self {
        Self { name: name.into(), entities }
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN, Vec::new())
    }

    pub fn is_unknown(&self) -> bool {
        self.name == Self::UNKNOWN || self.name.ends_with(":unknown")
    }

    /// Same type name and same role.
    pub fn has_entity(&self, entity: &Entity) -> bool {
        self.entities.iter().any(|e| e.role == entity.role && e.entity_type.name == entity.entity_type.name)
    }

    pub fn slots_of_type<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a Entity> + 'a {
        self.entities.iter().filter(move |e| e.entity_type.name == type_name)
    }

    /// Distinct entity types, in slot declaration order.
    pub fn entity_types(&self) -> Vec<&EntityType> {
        let mut types: Vec<&EntityType> = Vec::new();
        for entity in &self.entities {
            if !types.iter().any(|t| t.name == entity.entity_type.name) {
                types.push(&entity.entity_type);
            }
        }
        types
    }

    /// Copy of this intent restricted to the slots of one type.
    pub fn narrowed_to(&self, type_name: &str) -> Intent {
        Intent::new(self.name.clone(), self.slots_of_type(type_name).cloned().collect())
    }
}
