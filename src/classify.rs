//! Entity-type classification over an intent's slots.

use rayon::prelude::*;
use tracing::{debug, error};

use crate::context::{EntityCallContext, EntityCallContextForIntent};
use crate::provider::ProviderRegistry;
use crate::EntityTypeRecognition;

/// Run the classifier of every distinct entity type the intent expects.
///
/// Each classifier sees the intent narrowed to the slots of its own type and only
/// recognitions of that type are kept, so a provider serving several types cannot
/// shadow the provider registered first for another one. A failing classifier is
/// logged and contributes nothing. Per-entity and sub-entity contexts are not
/// classified and yield an empty list.
pub fn classify_entity_types(registry: &ProviderRegistry, context: &EntityCallContext, text: &str) -> Vec<EntityTypeRecognition> {
    let EntityCallContext::ForIntent(intent_context) = context else {
        debug!("entity type classification only runs for intent contexts");
        return Vec::new();
    };

    let types = intent_context.intent.entity_types();
    types
        .par_iter()
        .map(|entity_type| {
            let Some(classifier) = registry.find_classifier(entity_type) else {
                return Vec::new();
            };

            let narrowed = EntityCallContext::ForIntent(EntityCallContextForIntent {
                intent: intent_context.intent.narrowed_to(&entity_type.name),
                ..intent_context.clone()
            });

            match classifier.classify_entities(&narrowed, text) {
                Ok(found) => {
                    let kept: Vec<_> = found.into_iter().filter(|r| r.entity_type.name == entity_type.name).collect();
                    debug!(entity_type = %entity_type.name, count = kept.len(), "entity types classified");
                    kept
                }
                Err(err) => {
                    error!(entity_type = %entity_type.name, error = %err, "entity type classification failed");
                    Vec::new()
                }
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::{CallContext, EntityCallContextForEntity};
    use crate::provider::{Capabilities, EntityTypeClassifier, EntityTypeProvider};
    use crate::{Entity, EntityType, Error, Intent, Result, TextSpan};

    /// Claims both types, finds both, but is only trusted for what the registry resolves to it.
    struct Greedy {
        fail: bool,
    }

    impl EntityTypeClassifier for Greedy {
        fn classify_entities(&self, context: &EntityCallContext, _text: &str) -> Result<Vec<EntityTypeRecognition>> {
            if self.fail {
                return Err(Error::provider("greedy", "down"));
            }
            let EntityCallContext::ForIntent(c) = context else { return Ok(Vec::new()) };
            assert!(c.intent.entity_types().len() == 1, "classifier must see a narrowed intent");
            Ok(vec![
                EntityTypeRecognition::new(TextSpan::new(0, 4), EntityType::new("app:city"), 0.9),
                EntityTypeRecognition::new(TextSpan::new(5, 9), EntityType::new("app:date"), 0.9),
            ])
        }
    }

    impl EntityTypeProvider for Greedy {
        fn name(&self) -> &str {
            "greedy"
        }
        fn supports(&self, entity_type: &EntityType) -> Capabilities {
            if entity_type.name == "app:city" { Capabilities::CLASSIFY } else { Capabilities::empty() }
        }
        fn classifier(&self) -> Option<&dyn EntityTypeClassifier> {
            Some(self)
        }
    }

    fn intent() -> Intent {
        Intent::new(
            "travel",
            vec![Entity::new(EntityType::new("app:city"), "to"), Entity::new(EntityType::new("app:date"), "when")],
        )
    }

    fn for_intent() -> EntityCallContext {
        EntityCallContext::ForIntent(EntityCallContextForIntent::new(&CallContext::default(), intent()))
    }

    #[test]
    fn keeps_only_types_resolved_to_the_classifier() {
        let registry = ProviderRegistry::new().with(Arc::new(Greedy { fail: false }));
        let found = classify_entity_types(&registry, &for_intent(), "rome 1234");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_type.name, "app:city");
    }

    #[test]
    fn failing_classifier_yields_nothing() {
        let registry = ProviderRegistry::new().with(Arc::new(Greedy { fail: true }));
        assert!(classify_entity_types(&registry, &for_intent(), "rome").is_empty());
    }

    #[test]
    fn entity_contexts_are_not_classified() {
        let registry = ProviderRegistry::new().with(Arc::new(Greedy { fail: false }));
        let entity = Entity::new(EntityType::new("app:city"), "to");
        let ctx = EntityCallContext::ForEntity(EntityCallContextForEntity::new(&CallContext::default(), &entity));
        assert!(classify_entity_types(&registry, &ctx, "rome").is_empty());
    }
}
