//! Dictionary-backed entity types.
//!
//! Each dictionary is a closed list of values with per-locale synonyms. The
//! classifier finds synonyms as whole words in the utterance (accent- and
//! case-insensitive); the evaluator maps a span back to the closest value by
//! normalized Levenshtein similarity.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::context::{EntityCallContext, EntityCallContextForEntity};
use crate::provider::{Capabilities, EntityTypeClassifier, EntityTypeEvaluator, EntityTypeProvider};
use crate::text::{FoldedText, fold, normalize_spaces};
use crate::{
    CustomValue, EntityType, EntityTypeRecognition, EvaluationResult, Locale, PredefinedValue, RankedCandidate,
    Result, Value,
};

/// Similarity under which a value is not offered as a candidate.
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryData {
    pub entity_type: String,
    pub values: Vec<PredefinedValue>,
    /// Accept exact synonym matches only.
    #[serde(default)]
    pub only_values: bool,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    /// Keep any value whose synonym appears inside the text, whatever its similarity.
    #[serde(default)]
    pub text_search: bool,
}

fn default_min_similarity() -> f64 {
    DEFAULT_MIN_SIMILARITY
}

impl DictionaryData {
    pub fn new(entity_type: impl Into<String>, values: Vec<PredefinedValue>) -> Self {
        Self {
            entity_type: entity_type.into(),
            values,
            only_values: false,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            text_search: false,
        }
    }
}

#[derive(Debug)]
struct SynonymMatcher {
    value: String,
    locale: Locale,
    folded: String,
    regex: Regex,
}

#[derive(Debug)]
struct Dictionary {
    data: DictionaryData,
    matchers: Vec<SynonymMatcher>,
}

impl Dictionary {
    fn compile(data: DictionaryData) -> Result<Self> {
        let mut matchers = Vec::new();
        for value in &data.values {
            for (locale, labels) in &value.labels {
                for label in labels {
                    let folded = fold(label.trim());
                    if folded.is_empty() {
                        continue;
                    }
                    let syn = regex::escape(&folded);
                    let regex = Regex::new(&format!(r"\s+({syn})\s+|^({syn})$|^({syn})\s+|\s+({syn})$"))?;
                    matchers.push(SynonymMatcher { value: value.value.clone(), locale: locale.clone(), folded, regex });
                }
            }
        }
        Ok(Self { data, matchers })
    }

    fn synonyms<'a>(&'a self, locale: &'a Locale) -> impl Iterator<Item = &'a SynonymMatcher> + 'a {
        self.matchers.iter().filter(move |m| m.locale.same_language(locale))
    }
}

/// Provider serving every configured dictionary.
#[derive(Debug, Default)]
pub struct DictionaryProvider {
    dictionaries: BTreeMap<String, Dictionary>,
    supported: BTreeMap<String, Capabilities>,
}

impl DictionaryProvider {
    pub const NAME: &'static str = "dictionary";

    pub fn new(dictionaries: Vec<DictionaryData>) -> Result<Self> {
        let mut provider = Self::default();
        for data in dictionaries {
            provider.supported.insert(data.entity_type.clone(), Capabilities::CLASSIFY | Capabilities::EVALUATE);
            provider.dictionaries.insert(data.entity_type.clone(), Dictionary::compile(data)?);
        }
        Ok(provider)
    }

    fn classify_type(&self, dictionary: &Dictionary, entity_type: &EntityType, locale: &Locale, text: &str) -> Vec<EntityTypeRecognition> {
        let folded = FoldedText::new(text);
        let mut found = Vec::new();

        for matcher in dictionary.synonyms(locale) {
            for caps in matcher.regex.captures_iter(&folded.text) {
                let Some(group) = (1..=4).find_map(|i| caps.get(i)) else {
                    continue;
                };
                let span = folded.source_span(group.start(), group.end());
                trace!(entity_type = %entity_type.name, value = %matcher.value, %span, "dictionary synonym matched");
                found.push(
                    EntityTypeRecognition::new(span, entity_type.clone(), 1.0)
                        .evaluated(Some(Value::custom(matcher.value.clone()))),
                );
            }
        }

        found.sort_by_key(|r| (r.span.start, std::cmp::Reverse(r.span.end)));
        found.dedup_by(|a, b| a.span == b.span && a.value == b.value);
        found
    }

    fn evaluate_text(&self, dictionary: &Dictionary, locale: &Locale, text: &str) -> EvaluationResult {
        let needle = normalize_spaces(&fold(text));
        if needle.is_empty() {
            return EvaluationResult::unevaluated();
        }

        if dictionary.data.only_values {
            return dictionary
                .synonyms(locale)
                .find(|m| m.folded == needle)
                .map(|m| EvaluationResult::evaluated(Some(Value::custom(m.value.clone())), 1.0))
                .unwrap_or_else(EvaluationResult::unevaluated);
        }

        // Best similarity per value, kept in declaration order for stable ties.
        let mut scored: Vec<RankedCandidate> = Vec::new();
        for matcher in dictionary.synonyms(locale) {
            let mut score = strsim::normalized_levenshtein(&needle, &matcher.folded);
            let forced = dictionary.data.text_search && needle.contains(matcher.folded.as_str());
            if score < dictionary.data.min_similarity && !forced {
                continue;
            }
            if forced {
                score = score.max(dictionary.data.min_similarity);
            }
            match scored.iter_mut().find(|c| c.value == matcher.value) {
                Some(existing) if existing.probability < score => existing.probability = score,
                Some(_) => {}
                None => scored.push(RankedCandidate { value: matcher.value.clone(), probability: score }),
            }
        }

        scored.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        let Some(best) = scored.first().cloned() else {
            debug!(text, "no dictionary value close enough");
            return EvaluationResult::unevaluated();
        };

        let value = CustomValue { value: best.value, candidates: scored };
        EvaluationResult::evaluated(Some(Value::Custom(value)), best.probability)
    }
}

impl EntityTypeClassifier for DictionaryProvider {
    fn classify_entities(&self, context: &EntityCallContext, text: &str) -> Result<Vec<EntityTypeRecognition>> {
        let EntityCallContext::ForIntent(context) = context else {
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        for entity_type in context.intent.entity_types() {
            if let Some(dictionary) = self.dictionaries.get(&entity_type.name) {
                found.extend(self.classify_type(dictionary, entity_type, &context.locale, text));
            }
        }
        Ok(found)
    }
}

impl EntityTypeEvaluator for DictionaryProvider {
    fn evaluate(&self, context: &EntityCallContextForEntity, text: &str) -> Result<EvaluationResult> {
        match self.dictionaries.get(&context.entity_type.name) {
            Some(dictionary) => Ok(self.evaluate_text(dictionary, &context.locale, text)),
            None => Ok(EvaluationResult::unevaluated()),
        }
    }
}

impl EntityTypeProvider for DictionaryProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supported_types(&self) -> Option<&BTreeMap<String, Capabilities>> {
        Some(&self.supported)
    }

    fn classifier(&self) -> Option<&dyn EntityTypeClassifier> {
        Some(self)
    }

    fn evaluator(&self) -> Option<&dyn EntityTypeEvaluator> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CallContext, EntityCallContextForIntent};
    use crate::{Entity, Intent, TextSpan};

    fn cities() -> DictionaryData {
        let fr = Locale::new("fr");
        DictionaryData::new(
            "app:city",
            vec![
                PredefinedValue::new("paris").with_labels(fr.clone(), &["Paris", "Lutèce"]),
                PredefinedValue::new("saint-etienne").with_labels(fr.clone(), &["Saint-Étienne", "Sainté"]),
                PredefinedValue::new("lyon").with_labels(fr, &["Lyon"]),
            ],
        )
    }

    fn intent_context(text_locale: &str) -> EntityCallContext {
        let intent = Intent::new("travel", vec![Entity::new(EntityType::new("app:city"), "destination")]);
        let call = CallContext { locale: Locale::new(text_locale), ..CallContext::default() };
        EntityCallContext::ForIntent(EntityCallContextForIntent::new(&call, intent))
    }

    fn entity_context(locale: &str) -> EntityCallContextForEntity {
        let call = CallContext { locale: Locale::new(locale), ..CallContext::default() };
        EntityCallContextForEntity::new(&call, &Entity::new(EntityType::new("app:city"), "destination"))
    }

    #[test]
    fn classifies_whole_words_with_original_offsets() {
        let provider = DictionaryProvider::new(vec![cities()]).unwrap();
        let text = "je vais à Saint-Etienne puis à lyon";
        let found = provider.classify_entities(&intent_context("fr_FR"), text).unwrap();

        let spans: Vec<(&str, Option<Value>)> = found.iter().map(|r| (r.span.text_of(text), r.value.clone())).collect();
        assert_eq!(
            spans,
            vec![("Saint-Etienne", Some(Value::custom("saint-etienne"))), ("lyon", Some(Value::custom("lyon")))]
        );
        assert!(found.iter().all(|r| r.evaluated && r.probability == 1.0));
    }

    #[test]
    fn ignores_synonym_inside_a_word() {
        let provider = DictionaryProvider::new(vec![cities()]).unwrap();
        let found = provider.classify_entities(&intent_context("fr"), "parisien").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn whole_text_match() {
        let provider = DictionaryProvider::new(vec![cities()]).unwrap();
        let found = provider.classify_entities(&intent_context("fr"), "Lutèce").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].span, TextSpan::new(0, 6));
    }

    #[test]
    fn other_locale_synonyms_are_not_used() {
        let provider = DictionaryProvider::new(vec![cities()]).unwrap();
        let found = provider.classify_entities(&intent_context("en"), "to paris").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn evaluates_closest_value() {
        let provider = DictionaryProvider::new(vec![cities()]).unwrap();
        let result = provider.evaluate(&entity_context("fr"), "Pariss").unwrap();
        assert!(result.evaluated);
        let Some(Value::Custom(value)) = result.value else { panic!("expected custom value") };
        assert_eq!(value.value, "paris");
        assert!(result.probability > 0.8);
    }

    #[test]
    fn only_values_requires_exact_match() {
        let mut data = cities();
        data.only_values = true;
        let provider = DictionaryProvider::new(vec![data]).unwrap();
        assert!(!provider.evaluate(&entity_context("fr"), "Pariss").unwrap().evaluated);
        let exact = provider.evaluate(&entity_context("fr"), "SAINTÉ").unwrap();
        assert_eq!(exact.value, Some(Value::custom("saint-etienne")));
        assert_eq!(exact.probability, 1.0);
    }

    #[test]
    fn text_search_forces_contained_synonym() {
        let mut data = cities();
        data.text_search = true;
        let provider = DictionaryProvider::new(vec![data]).unwrap();
        let result = provider.evaluate(&entity_context("fr"), "la belle ville de lyon").unwrap();
        assert_eq!(result.value.as_ref().and_then(Value::as_custom).map(|c| c.value.as_str()), Some("lyon"));
    }

    #[test]
    fn unknown_type_is_not_evaluated() {
        let provider = DictionaryProvider::new(vec![cities()]).unwrap();
        let call = CallContext::default();
        let ctx = EntityCallContextForEntity::new(&call, &Entity::new(EntityType::new("app:country"), "c"));
        assert!(!provider.evaluate(&ctx, "france").unwrap().evaluated);
    }
}
