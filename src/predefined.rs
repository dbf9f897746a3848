//! Entity types that carry their own closed list of values.
//!
//! Unlike dictionaries, support is not declared upfront: any entity type with
//! predefined values is served.

use tracing::trace;

use crate::context::{EntityCallContext, EntityCallContextForEntity};
use crate::provider::{Capabilities, EntityTypeClassifier, EntityTypeEvaluator, EntityTypeProvider};
use crate::text::{FoldedText, fold, normalize_spaces};
use crate::{EntityType, EntityTypeRecognition, EvaluationResult, Locale, Result, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct PredefinedValuesProvider;

impl PredefinedValuesProvider {
    pub const NAME: &'static str = "predefined-values";

    fn classify_type(entity_type: &EntityType, locale: &Locale, folded: &FoldedText) -> Vec<EntityTypeRecognition> {
        let mut found = Vec::new();
        for predefined in &entity_type.predefined_values {
            for label in predefined.synonyms(locale) {
                let needle = fold(label.trim());
                if needle.is_empty() {
                    continue;
                }
                for (at, matched) in folded.text.match_indices(needle.as_str()) {
                    let span = folded.source_span(at, at + matched.len());
                    trace!(entity_type = %entity_type.name, value = %predefined.value, %span, "predefined value matched");
                    found.push(
                        EntityTypeRecognition::new(span, entity_type.clone(), 1.0)
                            .evaluated(Some(Value::custom(predefined.value.clone()))),
                    );
                }
            }
        }
        found
    }
}

impl EntityTypeClassifier for PredefinedValuesProvider {
    fn classify_entities(&self, context: &EntityCallContext, text: &str) -> Result<Vec<EntityTypeRecognition>> {
        let EntityCallContext::ForIntent(context) = context else {
            return Ok(Vec::new());
        };

        let folded = FoldedText::new(text);
        let mut found: Vec<EntityTypeRecognition> = context
            .intent
            .entity_types()
            .into_iter()
            .filter(|t| !t.predefined_values.is_empty())
            .flat_map(|t| Self::classify_type(t, &context.locale, &folded))
            .collect();
        found.sort_by_key(|r| r.span.start);
        Ok(found)
    }
}

impl EntityTypeEvaluator for PredefinedValuesProvider {
    fn evaluate(&self, context: &EntityCallContextForEntity, text: &str) -> Result<EvaluationResult> {
        let needle = normalize_spaces(&fold(text));
        let hit = context
            .entity_type
            .predefined_values
            .iter()
            .find(|v| v.synonyms(&context.locale).iter().any(|label| normalize_spaces(&fold(label)) == needle));

        Ok(match hit {
            Some(v) => EvaluationResult::evaluated(Some(Value::custom(v.value.clone())), 1.0),
            None => EvaluationResult::unevaluated(),
        })
    }
}

impl EntityTypeProvider for PredefinedValuesProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, entity_type: &EntityType) -> Capabilities {
        if entity_type.predefined_values.is_empty() {
            Capabilities::empty()
        } else {
            Capabilities::CLASSIFY | Capabilities::EVALUATE
        }
    }

    fn classifier(&self) -> Option<&dyn EntityTypeClassifier> {
        Some(self)
    }

    fn evaluator(&self) -> Option<&dyn EntityTypeEvaluator> {
        Some(self)
    }
}
