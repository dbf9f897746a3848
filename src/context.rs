//! Call contexts threaded through classification, evaluation and merging.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};

use crate::{Entity, EntityType, Intent, Locale};

/// Default cap on analysed text, in chars.
pub const DEFAULT_MAX_TEXT_LENGTH: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub normalize_text: bool,
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
    /// Below this probability an unqualified parse answers the unknown intent.
    #[serde(default)]
    pub unknown_intent_threshold: f64,
}

fn default_max_text_length() -> usize {
    DEFAULT_MAX_TEXT_LENGTH
}

impl ApplicationSettings {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            normalize_text: false,
            max_text_length: DEFAULT_MAX_TEXT_LENGTH,
            unknown_intent_threshold: 0.0,
        }
    }
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self::new("app", "app")
    }
}

/// Evaluation settings for one call.
///
/// `reference_date_by_role` lets a caller anchor one slot elsewhere than "now", e.g.
/// a return date relative to the departure already given. A slot with an override
/// is re-evaluated when an unbound recognition gets promoted into it.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    pub reference_date: DateTime<FixedOffset>,
    pub reference_date_by_role: BTreeMap<String, DateTime<FixedOffset>>,
    pub classify_entity_types: bool,
    pub merge_entity_types: bool,
}

impl EvaluationContext {
    pub fn at(reference_date: DateTime<FixedOffset>) -> Self {
        Self { reference_date, ..Self::default() }
    }

    pub fn with_role_reference(mut self, role: impl Into<String>, date: DateTime<FixedOffset>) -> Self {
        self.reference_date_by_role.insert(role.into(), date);
        self
    }

    pub fn has_reference_date_for(&self, entity: &Entity) -> bool {
        self.reference_date_by_role.contains_key(&entity.role)
    }

    pub fn reference_date_for(&self, entity: &Entity) -> DateTime<FixedOffset> {
        self.reference_date_by_role.get(&entity.role).copied().unwrap_or(self.reference_date)
    }
}

/// Current time in the local offset.
pub fn now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self {
            reference_date: now(),
            reference_date_by_role: BTreeMap::new(),
            classify_entity_types: true,
            merge_entity_types: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallContext {
    pub application: ApplicationSettings,
    pub locale: Locale,
    pub evaluation: EvaluationContext,
}

impl CallContext {
    pub fn new(application: ApplicationSettings, locale: Locale, evaluation: EvaluationContext) -> Self {
        Self { application, locale, evaluation }
    }

    pub fn reference_date(&self) -> DateTime<FixedOffset> {
        self.evaluation.reference_date
    }
}

// --- Entity call contexts ---------------------------------------------------

/// Context handed to classifiers.
///
/// Only [`EntityCallContext::ForIntent`] is served today; the per-entity and
/// sub-entity variants exist so providers can be written against them.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityCallContext {
    ForIntent(EntityCallContextForIntent),
    ForEntity(EntityCallContextForEntity),
    ForSubEntities(EntityCallContextForEntity),
}

impl EntityCallContext {
    pub fn locale(&self) -> &Locale {
        match self {
            EntityCallContext::ForIntent(c) => &c.locale,
            EntityCallContext::ForEntity(c) | EntityCallContext::ForSubEntities(c) => &c.locale,
        }
    }

    pub fn reference_date(&self) -> DateTime<FixedOffset> {
        match self {
            EntityCallContext::ForIntent(c) => c.reference_date,
            EntityCallContext::ForEntity(c) | EntityCallContext::ForSubEntities(c) => c.reference_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityCallContextForIntent {
    pub intent: Intent,
    pub locale: Locale,
    pub application_name: String,
    pub reference_date: DateTime<FixedOffset>,
}

impl EntityCallContextForIntent {
    pub fn new(context: &CallContext, intent: Intent) -> Self {
        Self {
            intent,
            locale: context.locale.clone(),
            application_name: context.application.name.clone(),
            reference_date: context.evaluation.reference_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityCallContextForEntity {
    pub entity_type: EntityType,
    pub locale: Locale,
    pub application_name: String,
    pub reference_date: DateTime<FixedOffset>,
}

impl EntityCallContextForEntity {
    /// Context for evaluating one slot; picks up that role's reference date.
    pub fn new(context: &CallContext, entity: &Entity) -> Self {
        Self {
            entity_type: entity.entity_type.clone(),
            locale: context.locale.clone(),
            application_name: context.application.name.clone(),
            reference_date: context.evaluation.reference_date_for(entity),
        }
    }
}
