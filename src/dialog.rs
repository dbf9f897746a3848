//! Dialog state kept between turns.
//!
//! A [`Dialog`] belongs to one session. Its [`DialogEntityState`] maps each role
//! to the value merged so far; only the cross-turn merge writes to it, and the
//! orchestrator holds the session lock while it does.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::client::{IntentQualifier, NlpEntityValue, NlpResult};
use crate::{Entity, Intent, TextSpan, Value};

/// The user action (one sentence) that set a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRef {
    pub id: String,
    pub date: DateTime<FixedOffset>,
}

impl ActionRef {
    pub fn new(id: impl Into<String>, date: DateTime<FixedOffset>) -> Self {
        Self { id: id.into(), date }
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.date.to_rfc3339())
    }
}

/// A recognized value for one slot, as the bot sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityValue {
    pub entity: Entity,
    pub value: Option<Value>,
    /// Source text of the value.
    pub content: Option<String>,
    pub span: Option<TextSpan>,
    #[serde(default)]
    pub sub_entity_values: Vec<EntityValue>,
    pub probability: f64,
    #[serde(default)]
    pub merge_support: bool,
    #[serde(default)]
    pub evaluated: bool,
}

impl EntityValue {
    pub fn new(entity: Entity, value: Option<Value>, content: Option<String>) -> Self {
        Self {
            entity,
            evaluated: value.is_some(),
            value,
            content,
            span: None,
            sub_entity_values: Vec::new(),
            probability: 1.0,
            merge_support: false,
        }
    }

    /// Value of a parse result entity; content is cut from the parsed query.
    pub fn from_nlp(result: &NlpResult, entity: &NlpEntityValue) -> Self {
        Self::from_nlp_text(&result.retained_query, entity)
    }

    fn from_nlp_text(text: &str, entity: &NlpEntityValue) -> Self {
        let span = TextSpan::new(entity.start, entity.end);
        Self {
            entity: entity.entity.clone(),
            value: entity.value.clone(),
            content: Some(span.text_of(text).to_string()),
            span: Some(span),
            sub_entity_values: entity.sub_entities.iter().map(|sub| Self::from_nlp_text(span.text_of(text), sub)).collect(),
            probability: entity.probability,
            merge_support: entity.merge_support,
            evaluated: entity.evaluated,
        }
    }

    pub fn role(&self) -> &str {
        &self.entity.role
    }

    pub fn start(&self) -> Option<usize> {
        self.span.map(|s| s.start)
    }
}

/// A value replaced by a later turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedEntityValue {
    pub value: Option<EntityValue>,
    pub action: Option<ActionRef>,
}

/// Current value of one role, with the values it replaced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityStateValue {
    pub value: Option<EntityValue>,
    pub last_update: Option<ActionRef>,
    #[serde(default)]
    pub history: Vec<ArchivedEntityValue>,
}

impl EntityStateValue {
    pub fn new(action: ActionRef, value: EntityValue) -> Self {
        Self { value: Some(value), last_update: Some(action), history: Vec::new() }
    }

    /// Replace the value, archiving the previous one with its provenance.
    pub fn change_value(&mut self, value: Option<EntityValue>, action: ActionRef) {
        let previous = ArchivedEntityValue { value: self.value.take(), action: self.last_update.take() };
        self.history.push(previous);
        self.value = value;
        self.last_update = Some(action);
    }

    /// Underlying typed value, if any.
    pub fn typed_value(&self) -> Option<&Value> {
        self.value.as_ref().and_then(|v| v.value.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DialogEntityState {
    values: BTreeMap<String, EntityStateValue>,
}

impl DialogEntityState {
    pub fn get(&self, role: &str) -> Option<&EntityStateValue> {
        self.values.get(role)
    }

    pub fn set(&mut self, role: impl Into<String>, value: EntityStateValue) {
        self.values.insert(role.into(), value);
    }

    pub fn remove(&mut self, role: &str) -> Option<EntityStateValue> {
        self.values.remove(role)
    }

    pub fn value(&self, role: &str) -> Option<&Value> {
        self.get(role).and_then(EntityStateValue::typed_value)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// What the bot expects from the next user sentence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NextUserActionState {
    #[serde(default)]
    pub intents_qualifiers: Vec<IntentQualifier>,
    #[serde(default)]
    pub states: BTreeSet<String>,
    pub reference_date: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DialogState {
    pub current_intent: Option<Intent>,
    pub entity_values: DialogEntityState,
    pub next_action_state: Option<NextUserActionState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialog {
    pub id: String,
    pub state: DialogState,
    /// Main intent of the story in progress.
    pub story_intent: Option<String>,
}

impl Dialog {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), state: DialogState::default(), story_intent: None }
    }
}
