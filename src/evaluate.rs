//! Value evaluation for slot-bound recognitions.

use rayon::prelude::*;
use tracing::{debug, error};

use crate::context::{CallContext, EntityCallContextForEntity};
use crate::provider::ProviderRegistry;
use crate::EntityRecognition;

/// Evaluate every recognition that is not evaluated yet.
///
/// Sub-entities are evaluated first, against the parent's matched text. A
/// container without an evaluator of its own is trusted fully once its parts are
/// done. Evaluator failures leave the recognition unevaluated.
pub fn evaluate_entities(
    registry: &ProviderRegistry,
    context: &CallContext,
    text: &str,
    entities: Vec<EntityRecognition>,
) -> Vec<EntityRecognition> {
    entities.into_par_iter().map(|recognition| evaluate_one(registry, context, text, recognition)).collect()
}

fn evaluate_one(registry: &ProviderRegistry, context: &CallContext, text: &str, mut recognition: EntityRecognition) -> EntityRecognition {
    if recognition.evaluated {
        return recognition;
    }

    let content = recognition.span.text_of(text);

    if !recognition.sub_entities.is_empty() {
        let parts = std::mem::take(&mut recognition.sub_entities);
        recognition.sub_entities = evaluate_entities(registry, context, content, parts);
    }

    let Some(evaluator) = registry.find_evaluator(recognition.entity_type()) else {
        if !recognition.sub_entities.is_empty() {
            recognition.probability = 1.0;
        }
        return recognition;
    };

    let entity_context = EntityCallContextForEntity::new(context, &recognition.entity);
    match evaluator.evaluate(&entity_context, content) {
        Ok(result) if result.evaluated => {
            recognition.probability = evaluator.probability_policy().apply(recognition.probability, result.probability);
            recognition.value = result.value;
            recognition.evaluated = true;
        }
        Ok(_) => {
            debug!(entity = %recognition.entity, content, "evaluator returned no result");
            recognition.evaluated = false;
        }
        Err(err) => {
            error!(entity = %recognition.entity, content, error = %err, "entity evaluation failed");
            recognition.evaluated = false;
        }
    }
    recognition
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::provider::{Capabilities, EntityTypeEvaluator, EntityTypeProvider, ProbabilityPolicy};
    use crate::{Entity, EntityType, Error, EvaluationResult, Result, TextSpan, Value};

    struct Upper {
        policy: ProbabilityPolicy,
    }

    impl EntityTypeEvaluator for Upper {
        fn evaluate(&self, _context: &EntityCallContextForEntity, text: &str) -> Result<EvaluationResult> {
            match text {
                "boom" => Err(Error::provider("upper", "boom")),
                "" => Ok(EvaluationResult::unevaluated()),
                _ => Ok(EvaluationResult::evaluated(Some(Value::custom(text.to_uppercase())), 0.8)),
            }
        }

        fn probability_policy(&self) -> ProbabilityPolicy {
            self.policy
        }
    }

    impl EntityTypeProvider for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn supports(&self, entity_type: &EntityType) -> Capabilities {
            if entity_type.name == "app:word" { Capabilities::EVALUATE } else { Capabilities::empty() }
        }
        fn evaluator(&self) -> Option<&dyn EntityTypeEvaluator> {
            Some(self)
        }
    }

    fn registry(policy: ProbabilityPolicy) -> ProviderRegistry {
        ProviderRegistry::new().with(Arc::new(Upper { policy }))
    }

    fn word(start: usize, end: usize, probability: f64) -> EntityRecognition {
        EntityRecognition::new(TextSpan::new(start, end), Entity::new(EntityType::new("app:word"), "w"), probability)
    }

    #[test]
    fn evaluates_span_text_with_policy() {
        let text = "hello world";
        let out = evaluate_entities(&registry(ProbabilityPolicy::Average), &CallContext::default(), text, vec![word(6, 11, 0.4)]);
        assert_eq!(out[0].value, Some(Value::custom("WORLD")));
        assert!(out[0].evaluated);
        assert!((out[0].probability - 0.6).abs() < 1e-9);
    }

    #[test]
    fn already_evaluated_is_untouched() {
        let done = word(0, 5, 0.3).evaluated(Some(Value::custom("kept")));
        let out = evaluate_entities(&registry(ProbabilityPolicy::Replace), &CallContext::default(), "hello", vec![done.clone()]);
        assert_eq!(out, vec![done]);
    }

    #[test]
    fn failure_leaves_recognition_unevaluated() {
        let out = evaluate_entities(&registry(ProbabilityPolicy::Replace), &CallContext::default(), "boom", vec![word(0, 4, 0.7)]);
        assert!(!out[0].evaluated);
        assert_eq!(out[0].value, None);
        assert_eq!(out[0].probability, 0.7);
    }

    #[test]
    fn container_without_evaluator_gets_full_probability() {
        let mut container =
            EntityRecognition::new(TextSpan::new(4, 13), Entity::new(EntityType::new("app:pair"), "pair"), 0.5);
        // Sub-entity offsets are relative to the container's text "red green".
        container.sub_entities = vec![word(4, 9, 0.5)];
        let out = evaluate_entities(&registry(ProbabilityPolicy::Replace), &CallContext::default(), "the red green", vec![container]);
        assert_eq!(out[0].probability, 1.0);
        assert!(!out[0].evaluated);
        assert_eq!(out[0].sub_entities[0].value, Some(Value::custom("GREEN")));
    }
}
