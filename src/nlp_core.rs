//! NLU-side parse pipeline.
//!
//! ```text
//! text ── truncate, normalize ── intent classifier ── selector ──┐
//!                                                                 v
//!            model entities ── evaluate ──┬─────────────── bound ─┐
//!                                         │                       ├── EntityMerge ── retained
//!            providers ── classify types ─┴───────────── unbound ─┘
//!                                                                      (everything else: not retained)
//! ```
//!
//! The intent model itself is a collaborator behind [`IntentClassifier`].
//! [`NlpCore`] also implements [`NlpClient`], so a bot can run against it in process.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::classify::classify_entity_types;
use crate::client::{
    EntityEvaluationQuery, EntityEvaluationResult, EntityToEvaluate, IntentQualifier, MarkAsUnknownQuery, NlpClient,
    NlpEntityValue, NlpQuery, NlpQueryContext, NlpResult, ValuesMergeQuery, ValuesMergeResult,
};
use crate::context::{
    ApplicationSettings, CallContext, EntityCallContext, EntityCallContextForEntity, EntityCallContextForIntent,
    EvaluationContext,
};
use crate::evaluate::evaluate_entities;
use crate::merge::EntityMerge;
use crate::provider::ProviderRegistry;
use crate::{Entity, EntityRecognition, EntityType, Error, Intent, Result, TextSpan, ValueDescriptor, without_namespace};

// --- Intent classification --------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct IntentScore {
    pub intent: Intent,
    pub probability: f64,
}

impl IntentScore {
    pub fn new(intent: Intent, probability: f64) -> Self {
        Self { intent, probability }
    }
}

/// Trained intent and entity models.
pub trait IntentClassifier: Send + Sync {
    fn classify_intent(&self, context: &CallContext, text: &str) -> Result<Vec<IntentScore>>;

    /// Slot-bound recognitions the model finds for `context.intent`.
    fn classify_entities(&self, context: &EntityCallContextForIntent, text: &str) -> Result<Vec<EntityRecognition>>;
}

/// Answers fixed scores whatever the text. Used by the CLI and tests.
#[derive(Debug, Clone, Default)]
pub struct FixedIntentClassifier {
    scores: Vec<IntentScore>,
    entities: Vec<EntityRecognition>,
}

impl FixedIntentClassifier {
    pub fn new(intent: Intent) -> Self {
        Self::default().with_score(intent, 1.0)
    }

    pub fn with_score(mut self, intent: Intent, probability: f64) -> Self {
        self.scores.push(IntentScore::new(intent, probability));
        self
    }

    pub fn with_entities(mut self, entities: Vec<EntityRecognition>) -> Self {
        self.entities = entities;
        self
    }
}

impl IntentClassifier for FixedIntentClassifier {
    fn classify_intent(&self, _context: &CallContext, _text: &str) -> Result<Vec<IntentScore>> {
        Ok(self.scores.clone())
    }

    fn classify_entities(&self, context: &EntityCallContextForIntent, _text: &str) -> Result<Vec<EntityRecognition>> {
        Ok(self.entities.iter().filter(|e| context.intent.has_entity(&e.entity)).cloned().collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentSelection {
    pub intent: Intent,
    pub probability: f64,
    pub others: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum IntentSelector {
    /// Most probable intent.
    #[default]
    Default,
    /// Only these intents; probabilities are weighted by each modifier.
    Qualified(Vec<IntentQualifier>),
}

impl IntentSelector {
    pub fn from_qualifiers(qualifiers: &[IntentQualifier]) -> Self {
        if qualifiers.is_empty() { IntentSelector::Default } else { IntentSelector::Qualified(qualifiers.to_vec()) }
    }

    /// Best scored intent; ties go to the first one classified.
    pub fn select(&self, scores: Vec<IntentScore>) -> Option<IntentSelection> {
        let weighted: Vec<(IntentScore, f64)> = match self {
            IntentSelector::Default => scores.into_iter().map(|s| (s.clone(), s.probability)).collect(),
            IntentSelector::Qualified(qualifiers) => scores
                .into_iter()
                .filter_map(|s| {
                    let q = qualifiers.iter().find(|q| without_namespace(&q.intent) == without_namespace(&s.intent.name))?;
                    let weight = s.probability * q.modifier;
                    Some((s, weight))
                })
                .collect(),
        };

        let best = weighted
            .iter()
            .enumerate()
            .fold(None::<(usize, f64)>, |best, (i, (_, w))| match best {
                Some((_, bw)) if bw >= *w => best,
                _ => Some((i, *w)),
            })?
            .0;

        let others = weighted
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != best)
            .map(|(_, (s, _))| (s.intent.name.clone(), s.probability))
            .collect();
        let (score, _) = weighted.into_iter().nth(best)?;
        Some(IntentSelection { intent: score.intent, probability: score.probability, others })
    }
}

// --- Parsing ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ParsingResult {
    pub intent: String,
    pub entities: Vec<EntityRecognition>,
    /// Candidates the merge did not keep.
    pub not_retained_entities: Vec<EntityRecognition>,
    pub intent_probability: f64,
    pub entities_probability: f64,
    /// Text actually parsed.
    pub retained_query: String,
    pub other_intents: BTreeMap<String, f64>,
}

impl ParsingResult {
    fn unknown(text: String) -> Self {
        Self {
            intent: Intent::UNKNOWN.to_string(),
            entities: Vec::new(),
            not_retained_entities: Vec::new(),
            intent_probability: 1.0,
            entities_probability: 1.0,
            retained_query: text,
            other_intents: BTreeMap::new(),
        }
    }
}

pub struct NlpCore {
    registry: Arc<ProviderRegistry>,
    classifier: Arc<dyn IntentClassifier>,
    application: ApplicationSettings,
    unknown_sentences: Mutex<Vec<MarkAsUnknownQuery>>,
}

impl std::fmt::Debug for NlpCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NlpCore").field("registry", &self.registry).field("application", &self.application).finish()
    }
}

impl NlpCore {
    pub fn new(registry: Arc<ProviderRegistry>, classifier: Arc<dyn IntentClassifier>) -> Self {
        Self { registry, classifier, application: ApplicationSettings::default(), unknown_sentences: Mutex::new(Vec::new()) }
    }

    /// Settings used for calls arriving through [`NlpClient`].
    pub fn with_application(mut self, application: ApplicationSettings) -> Self {
        self.application = application;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Truncate to the configured length, then normalize when the application asks for it.
    pub fn prepare_text(&self, context: &CallContext, text: &str) -> String {
        let max = context.application.max_text_length;
        let truncated: String = if text.chars().count() > max {
            debug!(max, "text truncated");
            text.chars().take(max).collect()
        } else {
            text.to_string()
        };
        if context.application.normalize_text {
            truncated.nfc().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
        } else {
            truncated
        }
    }

    pub fn parse(&self, context: &CallContext, text: &str, selector: &IntentSelector) -> ParsingResult {
        let text = self.prepare_text(context, text);

        let scores = match self.classifier.classify_intent(context, &text) {
            Ok(scores) => scores,
            Err(err) => {
                error!(error = %err, "intent classification failed");
                return ParsingResult::unknown(text);
            }
        };
        let Some(mut selection) = selector.select(scores) else {
            debug!("no intent selected");
            return ParsingResult::unknown(text);
        };

        let below_threshold = selection.probability < context.application.unknown_intent_threshold;
        if matches!(selector, IntentSelector::Default) && below_threshold {
            debug!(intent = %selection.intent.name, probability = selection.probability, "below unknown threshold");
            selection.others.insert(selection.intent.name.clone(), selection.probability);
            let mut result = ParsingResult::unknown(text);
            result.other_intents = selection.others;
            return result;
        }

        let (entities, not_retained_entities) = match self.classify_and_evaluate(context, &selection.intent, &text) {
            Ok(found) => found,
            Err(err) => {
                error!(intent = %selection.intent.name, error = %err, "entity classification failed");
                (Vec::new(), Vec::new())
            }
        };

        let entities_probability = if entities.is_empty() {
            1.0
        } else {
            entities.iter().map(|e| e.probability).sum::<f64>() / entities.len() as f64
        };

        ParsingResult {
            intent: selection.intent.name,
            entities,
            not_retained_entities,
            intent_probability: selection.probability,
            entities_probability,
            retained_query: text,
            other_intents: selection.others,
        }
    }

    fn classify_and_evaluate(
        &self,
        context: &CallContext,
        intent: &Intent,
        text: &str,
    ) -> Result<(Vec<EntityRecognition>, Vec<EntityRecognition>)> {
        let intent_context = EntityCallContextForIntent::new(context, intent.clone());
        let model_entities = self.classifier.classify_entities(&intent_context, text)?;
        let evaluated = self.evaluate_entities(context, text, model_entities);

        let evaluation = &context.evaluation;
        if !evaluation.merge_entity_types && !evaluation.classify_entity_types {
            return Ok((evaluated, Vec::new()));
        }

        let classified = classify_entity_types(&self.registry, &EntityCallContext::ForIntent(intent_context), text);
        if classified.is_empty() {
            return Ok((evaluated, Vec::new()));
        }
        let by_type: Vec<EntityRecognition> =
            classified.iter().map(|r| r.to_entity_recognition(r.entity_type.name.clone())).collect();

        if evaluation.merge_entity_types {
            let merged = EntityMerge::new(&self.registry, context).merge(text, intent, &evaluated, &classified);
            let not_retained = subtract(evaluated.into_iter().chain(by_type), &merged);
            Ok((merged, not_retained))
        } else {
            let not_retained = subtract(by_type.into_iter(), &evaluated);
            Ok((evaluated, not_retained))
        }
    }

    pub fn evaluate_entities(&self, context: &CallContext, text: &str, entities: Vec<EntityRecognition>) -> Vec<EntityRecognition> {
        evaluate_entities(&self.registry, context, text, entities)
    }

    pub fn supports_merge(&self, entity_type: &EntityType) -> bool {
        self.registry.supports_merge(entity_type)
    }

    /// Merge with the strategy of the entity's type; failures are logged and give `None`.
    pub fn merge_values(&self, context: &CallContext, entity: &Entity, values: &[ValueDescriptor]) -> Option<ValueDescriptor> {
        let merger = self.registry.find_merger(&entity.entity_type)?;
        match merger.merge(&EntityCallContextForEntity::new(context, entity), values) {
            Ok(merged) => merged,
            Err(err) => {
                error!(entity = %entity, error = %err, "values merge failed");
                None
            }
        }
    }

    pub fn known_entity_types(&self) -> BTreeSet<String> {
        self.registry.known_entity_types()
    }

    /// Sentences reported through [`NlpClient::mark_as_unknown`].
    pub fn unknown_sentences(&self) -> Vec<MarkAsUnknownQuery> {
        self.unknown_sentences.lock().clone()
    }

    fn call_context(&self, namespace: &str, application_name: &str, query: &NlpQueryContext) -> CallContext {
        let application =
            ApplicationSettings { namespace: namespace.to_string(), name: application_name.to_string(), ..self.application.clone() };
        CallContext::new(application, query.locale.clone(), EvaluationContext::at(query.reference_date))
    }

    fn to_wire(&self, recognition: &EntityRecognition) -> NlpEntityValue {
        NlpEntityValue {
            start: recognition.span.start,
            end: recognition.span.end,
            entity: recognition.entity.clone(),
            value: recognition.value.clone(),
            evaluated: recognition.evaluated,
            sub_entities: recognition.sub_entities.iter().map(|e| self.to_wire(e)).collect(),
            probability: recognition.probability,
            merge_support: self.supports_merge(recognition.entity_type()),
        }
    }
}

/// `candidates` not in `retained`, without duplicates.
fn subtract(candidates: impl Iterator<Item = EntityRecognition>, retained: &[EntityRecognition]) -> Vec<EntityRecognition> {
    let mut out: Vec<EntityRecognition> = Vec::new();
    for candidate in candidates {
        if !retained.contains(&candidate) && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

fn to_recognition(entity: &EntityToEvaluate) -> EntityRecognition {
    let mut recognition = EntityRecognition::new(TextSpan::new(entity.start, entity.end), entity.entity.clone(), 1.0);
    recognition.sub_entities = entity.sub_entities.iter().map(to_recognition).collect();
    recognition
}

impl NlpClient for NlpCore {
    fn parse(&self, query: &NlpQuery) -> Result<Option<NlpResult>> {
        let text = query.queries.first().ok_or_else(|| Error::InvalidInput("parse query without text".into()))?;
        let context = self.call_context(&query.namespace, &query.application_name, &query.context);
        let selector = IntentSelector::from_qualifiers(&query.intents_subset);

        let parsed = self.parse(&context, text, &selector);
        let (intent_namespace, intent) = match parsed.intent.split_once(':') {
            Some((ns, name)) => (ns.to_string(), name.to_string()),
            None => (query.namespace.clone(), parsed.intent.clone()),
        };

        Ok(Some(NlpResult {
            intent,
            intent_namespace,
            language: query.context.locale.clone(),
            entities: parsed.entities.iter().map(|e| self.to_wire(e)).collect(),
            not_retained_entities: parsed.not_retained_entities.iter().map(|e| self.to_wire(e)).collect(),
            intent_probability: parsed.intent_probability,
            entities_probability: parsed.entities_probability,
            retained_query: parsed.retained_query,
            other_intents_probabilities: parsed.other_intents,
            static_response: None,
        }))
    }

    fn evaluate_entities(&self, query: &EntityEvaluationQuery) -> Result<Option<EntityEvaluationResult>> {
        let context = self.call_context(&query.namespace, &query.application_name, &query.context);
        let recognitions = query.entities_to_evaluate.iter().map(to_recognition).collect();
        let evaluated = NlpCore::evaluate_entities(self, &context, &query.text, recognitions);
        Ok(Some(EntityEvaluationResult { values: evaluated.iter().map(|e| self.to_wire(e)).collect() }))
    }

    fn merge_values(&self, query: &ValuesMergeQuery) -> Result<Option<ValuesMergeResult>> {
        let context = self.call_context(&query.namespace, &query.application_name, &query.context);
        let values: Vec<ValueDescriptor> = query.values.iter().cloned().map(ValueDescriptor::from).collect();
        let merged = NlpCore::merge_values(self, &context, &query.entity, &values);
        Ok(merged.map(|d| ValuesMergeResult { value: Some(d.value), content: d.content }))
    }

    fn mark_as_unknown(&self, query: &MarkAsUnknownQuery) -> Result<()> {
        info!(language = %query.language, "sentence marked as unknown");
        self.unknown_sentences.lock().push(query.clone());
        Ok(())
    }

    fn healthcheck(&self) -> bool {
        let healthy = self.registry.healthcheck();
        if !healthy {
            warn!("nlp core unhealthy");
        }
        healthy
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{DictionaryData, DictionaryProvider, Locale, PredefinedValue, Value};

    fn city() -> EntityType {
        EntityType::new("app:city")
    }

    fn book_flight() -> Intent {
        Intent::new("app:book_flight", vec![Entity::new(city(), "destination")])
    }

    fn registry() -> Arc<ProviderRegistry> {
        let en = Locale::new("en");
        let cities = DictionaryData::new(
            "app:city",
            vec![
                PredefinedValue::new("Paris").with_labels(en.clone(), &["Paris"]),
                PredefinedValue::new("Nice").with_labels(en, &["Nice"]),
            ],
        );
        let dictionary = DictionaryProvider::new(vec![cities]).unwrap();
        Arc::new(ProviderRegistry::new().with(Arc::new(dictionary)))
    }

    fn core(classifier: FixedIntentClassifier) -> NlpCore {
        NlpCore::new(registry(), Arc::new(classifier))
    }

    #[test]
    fn dictionary_city_fills_the_only_slot() {
        let core = core(FixedIntentClassifier::new(book_flight()));

        let result = core.parse(&CallContext::default(), "I want a flight to Paris", &IntentSelector::Default);

        let expected = EntityRecognition::new(TextSpan::new(19, 24), Entity::new(city(), "destination"), 1.0)
            .evaluated(Some(Value::custom("Paris")));
        assert_eq!(result.intent, "app:book_flight");
        assert_eq!(result.entities, vec![expected]);
        assert_eq!(result.entities_probability, 1.0);
        assert_eq!(result.not_retained_entities.len(), 1);
        assert_eq!(result.not_retained_entities[0].role(), "app:city");
    }

    #[test]
    fn classify_only_keeps_model_entities() {
        let core = core(FixedIntentClassifier::new(book_flight()));
        let mut context = CallContext::default();
        context.evaluation.merge_entity_types = false;

        let result = core.parse(&context, "I want a flight to Paris", &IntentSelector::Default);

        assert!(result.entities.is_empty());
        assert_eq!(result.not_retained_entities.len(), 1);
    }

    #[test]
    fn no_classification_no_providers() {
        let core = core(FixedIntentClassifier::new(book_flight()));
        let mut context = CallContext::default();
        context.evaluation.merge_entity_types = false;
        context.evaluation.classify_entity_types = false;

        let result = core.parse(&context, "I want a flight to Paris", &IntentSelector::Default);

        assert!(result.entities.is_empty());
        assert!(result.not_retained_entities.is_empty());
    }

    #[test]
    fn model_entities_are_evaluated_and_averaged() {
        let bound = vec![EntityRecognition::new(TextSpan::new(19, 23), Entity::new(city(), "destination"), 0.6)];
        let core = core(FixedIntentClassifier::new(book_flight()).with_entities(bound));
        let mut context = CallContext::default();
        context.evaluation.merge_entity_types = false;
        context.evaluation.classify_entity_types = false;

        let result = core.parse(&context, "I want a flight to Nice", &IntentSelector::Default);

        assert_eq!(result.entities.len(), 1);
        assert!(result.entities[0].evaluated);
        let value = result.entities[0].value.as_ref().and_then(Value::as_custom).map(|c| c.value.as_str());
        assert_eq!(value, Some("Nice"));
        assert_eq!(result.entities_probability, result.entities[0].probability);
    }

    #[test]
    fn no_intent_is_unknown() {
        let core = core(FixedIntentClassifier::default());
        let result = core.parse(&CallContext::default(), "hello", &IntentSelector::Default);
        assert_eq!(result.intent, Intent::UNKNOWN);
        assert_eq!(result.intent_probability, 1.0);
        assert_eq!(result.entities_probability, 1.0);
    }

    #[test]
    fn qualifiers_weight_and_restrict_intents() {
        let classifier = FixedIntentClassifier::default()
            .with_score(Intent::new("app:greet", Vec::new()), 0.9)
            .with_score(Intent::new("app:book", Vec::new()), 0.5)
            .with_score(Intent::new("app:cancel", Vec::new()), 0.4);
        let core = core(classifier);
        let selector =
            IntentSelector::Qualified(vec![IntentQualifier::new("book", 1.0), IntentQualifier::new("cancel", 2.0)]);

        let result = core.parse(&CallContext::default(), "hello", &selector);

        assert_eq!(result.intent, "app:cancel");
        assert_eq!(result.intent_probability, 0.4);
        assert_eq!(result.other_intents.keys().collect::<Vec<_>>(), vec!["app:book"]);
    }

    #[test]
    fn ties_go_to_the_first_classified_intent() {
        let selection = IntentSelector::Default
            .select(vec![
                IntentScore::new(Intent::new("a", Vec::new()), 0.5),
                IntentScore::new(Intent::new("b", Vec::new()), 0.5),
            ])
            .unwrap();
        assert_eq!(selection.intent.name, "a");
    }

    #[test]
    fn low_probability_becomes_unknown() {
        let core = core(FixedIntentClassifier::default().with_score(book_flight(), 0.2));
        let mut context = CallContext::default();
        context.application.unknown_intent_threshold = 0.5;

        let result = core.parse(&context, "hm", &IntentSelector::Default);

        assert_eq!(result.intent, Intent::UNKNOWN);
        assert_eq!(result.other_intents.get("app:book_flight"), Some(&0.2));
    }

    #[test]
    fn text_is_truncated_then_normalized() {
        let core = core(FixedIntentClassifier::default());
        let mut context = CallContext::default();
        context.application.max_text_length = 12;
        context.application.normalize_text = true;

        assert_eq!(core.prepare_text(&context, "  fly   to  Paris now"), "fly to");
    }

    #[test]
    fn client_parse_splits_namespace_and_flags_merge_support() {
        let core = core(FixedIntentClassifier::new(book_flight()));
        let query = NlpQuery {
            queries: vec!["I want a flight to Paris".into()],
            namespace: "app".into(),
            application_name: "travel".into(),
            context: NlpQueryContext::new(Locale::new("en"), "u", "d"),
            state: Default::default(),
            intents_subset: Vec::new(),
        };

        let result = NlpClient::parse(&core, &query).unwrap().unwrap();

        assert_eq!(result.intent, "book_flight");
        assert_eq!(result.intent_namespace, "app");
        assert_eq!(result.entities[0].start, 19);
        assert!(!result.entities[0].merge_support);
        assert_eq!(result.retained_query, "I want a flight to Paris");
    }

    #[test]
    fn client_merge_without_strategy_answers_nothing() {
        let core = core(FixedIntentClassifier::default());
        let query = ValuesMergeQuery {
            namespace: "app".into(),
            application_name: "travel".into(),
            context: NlpQueryContext::new(Locale::new("en"), "u", "d"),
            entity: Entity::new(city(), "destination"),
            values: Vec::new(),
        };
        assert_eq!(NlpClient::merge_values(&core, &query).unwrap(), None);
    }

    #[test]
    fn marked_sentences_are_kept() {
        let core = core(FixedIntentClassifier::default());
        let query =
            MarkAsUnknownQuery { namespace: "app".into(), application_name: "travel".into(), language: Locale::new("en"), text: "blah".into() };
        core.mark_as_unknown(&query).unwrap();
        assert_eq!(core.unknown_sentences(), vec![query]);
    }
}
