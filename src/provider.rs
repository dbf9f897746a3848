//! Entity-type providers and the registry that resolves them.
//!
//! A provider bundles up to three roles for the entity types it knows about:
//!
//! ```text
//!   provider ──┬── classifier  : text            -> [EntityTypeRecognition]
//!              ├── evaluator   : span text        -> EvaluationResult
//!              └── merger      : [ValueDescriptor] -> ValueDescriptor
//! ```
//!
//! Support is declared either as a static table (type name -> [`Capabilities`])
//! or through a predicate. The registry is ordered: for a given type and role the
//! first registered provider that declares support wins.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::context::{EntityCallContext, EntityCallContextForEntity};
use crate::{EntityType, EntityTypeRecognition, EvaluationResult, Result, ValueDescriptor};

bitflags! {
    /// What a provider can do for one entity type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u8 {
        const CLASSIFY = 1 << 0;
        const EVALUATE = 1 << 1;
        const MERGE    = 1 << 2;
    }
}

pub trait EntityTypeClassifier: Send + Sync {
    fn classify_entities(&self, context: &EntityCallContext, text: &str) -> Result<Vec<EntityTypeRecognition>>;
}

/// How an evaluator's probability combines with the recognition's own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbabilityPolicy {
    #[default]
    Replace,
    Average,
    Keep,
}

impl ProbabilityPolicy {
    pub fn apply(self, current: f64, evaluated: f64) -> f64 {
        match self {
            ProbabilityPolicy::Replace => evaluated,
            ProbabilityPolicy::Average => (current + evaluated) / 2.0,
            ProbabilityPolicy::Keep => current,
        }
    }
}

pub trait EntityTypeEvaluator: Send + Sync {
    fn evaluate(&self, context: &EntityCallContextForEntity, text: &str) -> Result<EvaluationResult>;

    fn probability_policy(&self) -> ProbabilityPolicy {
        ProbabilityPolicy::Replace
    }
}

/// Folds several candidate values of one entity into one.
pub trait ValuesMerger: Send + Sync {
    fn merge(&self, context: &EntityCallContextForEntity, values: &[ValueDescriptor]) -> Result<Option<ValueDescriptor>>;
}

pub trait EntityTypeProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Static support table, when the provider knows its types upfront.
    fn supported_types(&self) -> Option<&BTreeMap<String, Capabilities>> {
        None
    }

    /// Support predicate, consulted when there is no static table.
    fn supports(&self, _entity_type: &EntityType) -> Capabilities {
        Capabilities::empty()
    }

    fn classifier(&self) -> Option<&dyn EntityTypeClassifier> {
        None
    }

    fn evaluator(&self) -> Option<&dyn EntityTypeEvaluator> {
        None
    }

    fn merger(&self) -> Option<&dyn ValuesMerger> {
        None
    }

    fn healthcheck(&self) -> bool {
        true
    }
}

/// Capabilities a provider declares for `entity_type`, limited to the roles it actually implements.
pub fn capabilities_of(provider: &dyn EntityTypeProvider, entity_type: &EntityType) -> Capabilities {
    let declared = match provider.supported_types() {
        Some(table) => table.get(&entity_type.name).copied().unwrap_or_default(),
        None => provider.supports(entity_type),
    };

    let mut implemented = Capabilities::empty();
    implemented.set(Capabilities::CLASSIFY, provider.classifier().is_some());
    implemented.set(Capabilities::EVALUATE, provider.evaluator().is_some());
    implemented.set(Capabilities::MERGE, provider.merger().is_some());
    declared & implemented
}

// --- Registry ---------------------------------------------------------------

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn EntityTypeProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.providers.iter().map(|p| p.name())).finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider; earlier registrations take precedence.
    pub fn register(&mut self, provider: Arc<dyn EntityTypeProvider>) {
        debug!(provider = provider.name(), "registering entity type provider");
        self.providers.push(provider);
    }

    pub fn with(mut self, provider: Arc<dyn EntityTypeProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn providers(&self) -> &[Arc<dyn EntityTypeProvider>] {
        &self.providers
    }

    fn provider_for(&self, entity_type: &EntityType, capability: Capabilities) -> Option<&dyn EntityTypeProvider> {
        self.providers
            .iter()
            .map(|p| p.as_ref())
            .find(|p| capabilities_of(*p, entity_type).contains(capability))
    }

    pub fn find_classifier(&self, entity_type: &EntityType) -> Option<&dyn EntityTypeClassifier> {
        self.provider_for(entity_type, Capabilities::CLASSIFY).and_then(|p| p.classifier())
    }

    pub fn find_evaluator(&self, entity_type: &EntityType) -> Option<&dyn EntityTypeEvaluator> {
        self.provider_for(entity_type, Capabilities::EVALUATE).and_then(|p| p.evaluator())
    }

    pub fn find_merger(&self, entity_type: &EntityType) -> Option<&dyn ValuesMerger> {
        self.provider_for(entity_type, Capabilities::MERGE).and_then(|p| p.merger())
    }

    pub fn find_classifier_by_name(&self, namespace: &str, name: &str) -> Option<&dyn EntityTypeClassifier> {
        self.find_classifier(&EntityType::qualified(namespace, name))
    }

    pub fn find_evaluator_by_name(&self, namespace: &str, name: &str) -> Option<&dyn EntityTypeEvaluator> {
        self.find_evaluator(&EntityType::qualified(namespace, name))
    }

    pub fn find_merger_by_name(&self, namespace: &str, name: &str) -> Option<&dyn ValuesMerger> {
        self.find_merger(&EntityType::qualified(namespace, name))
    }

    /// Name of the provider serving `capability` for `entity_type`.
    pub fn provider_name(&self, entity_type: &EntityType, capability: Capabilities) -> Option<&str> {
        self.provider_for(entity_type, capability).map(|p| p.name())
    }

    pub fn supports_merge(&self, entity_type: &EntityType) -> bool {
        self.find_merger(entity_type).is_some()
    }

    /// Union of what every provider offers for `entity_type`.
    pub fn capabilities(&self, entity_type: &EntityType) -> Capabilities {
        self.providers.iter().fold(Capabilities::empty(), |acc, p| acc | capabilities_of(p.as_ref(), entity_type))
    }

    /// Type names from the static support tables.
    pub fn known_entity_types(&self) -> BTreeSet<String> {
        self.providers.iter().filter_map(|p| p.supported_types()).flat_map(|table| table.keys().cloned()).collect()
    }

    pub fn healthcheck(&self) -> bool {
        let mut healthy = true;
        for provider in &self.providers {
            if !provider.healthcheck() {
                warn!(provider = provider.name(), "entity type provider failed healthcheck");
                healthy = false;
            }
        }
        healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CallContext, EntityCallContextForEntity};
    use crate::{Entity, Value};

    struct Fixed {
        name: &'static str,
        table: BTreeMap<String, Capabilities>,
        answer: &'static str,
    }

    impl EntityTypeEvaluator for Fixed {
        fn evaluate(&self, _context: &EntityCallContextForEntity, _text: &str) -> Result<EvaluationResult> {
            Ok(EvaluationResult::evaluated(Some(Value::custom(self.answer)), 1.0))
        }
    }

    impl EntityTypeProvider for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn supported_types(&self) -> Option<&BTreeMap<String, Capabilities>> {
            Some(&self.table)
        }

        fn evaluator(&self) -> Option<&dyn EntityTypeEvaluator> {
            Some(self)
        }
    }

    fn fixed(name: &'static str, answer: &'static str, caps: Capabilities) -> Arc<dyn EntityTypeProvider> {
        Arc::new(Fixed { name, table: BTreeMap::from([("app:city".to_string(), caps)]), answer })
    }

    #[test]
    fn first_registered_provider_wins() {
        let registry = ProviderRegistry::new()
            .with(fixed("first", "one", Capabilities::EVALUATE))
            .with(fixed("second", "two", Capabilities::EVALUATE));

        let city = EntityType::new("app:city");
        let ctx = EntityCallContextForEntity::new(&CallContext::default(), &Entity::new(city.clone(), "city"));
        let evaluator = registry.find_evaluator(&city).unwrap();
        assert_eq!(evaluator.evaluate(&ctx, "x").unwrap().value, Some(Value::custom("one")));
        assert_eq!(registry.provider_name(&city, Capabilities::EVALUATE), Some("first"));
    }

    #[test]
    fn declared_but_unimplemented_roles_are_ignored() {
        let registry = ProviderRegistry::new().with(fixed("p", "x", Capabilities::all()));
        let city = EntityType::new("app:city");
        assert_eq!(registry.capabilities(&city), Capabilities::EVALUATE);
        assert!(registry.find_classifier(&city).is_none());
        assert!(!registry.supports_merge(&city));
        assert!(registry.find_evaluator_by_name("app", "city").is_some());
        assert!(registry.find_evaluator_by_name("app", "country").is_none());
    }

    #[test]
    fn probability_policies() {
        assert_eq!(ProbabilityPolicy::Replace.apply(0.4, 0.8), 0.8);
        assert_eq!(ProbabilityPolicy::Average.apply(0.25, 0.75), 0.5);
        assert_eq!(ProbabilityPolicy::Keep.apply(0.4, 0.8), 0.4);
    }
}
