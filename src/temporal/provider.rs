//! Temporal parser exposed as an entity type provider.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use super::{
    DATETIME_ENTITY_TYPE, DIMENSIONS, DatesMerge, EnglishDateParser, TIME_DIMENSION, TemporalParseRequest,
    TemporalParser, dimension_of, entity_type_of,
};
use crate::context::{EntityCallContext, EntityCallContextForEntity};
use crate::provider::{Capabilities, EntityTypeClassifier, EntityTypeEvaluator, EntityTypeProvider, ValuesMerger};
use crate::{EntityType, EntityTypeRecognition, EvaluationResult, Result};

/// Confidence given to every span the parser finds on its own.
pub const CLASSIFICATION_PROBABILITY: f64 = 0.8;

pub struct TemporalProvider {
    name: String,
    parser: Arc<dyn TemporalParser>,
    merger: DatesMerge,
    supported: BTreeMap<String, Capabilities>,
}

impl TemporalProvider {
    pub const NAME: &'static str = "duckling";

    /// Every Duckling dimension, served by `parser`.
    pub fn new(parser: Arc<dyn TemporalParser>) -> Self {
        Self::with_dimensions(Self::NAME, parser, DIMENSIONS)
    }

    /// Dates only, parsed in process.
    pub fn english() -> Self {
        Self::with_dimensions("english-dates", Arc::new(EnglishDateParser::default()), &[TIME_DIMENSION])
    }

    pub fn with_dimensions(name: impl Into<String>, parser: Arc<dyn TemporalParser>, dimensions: &[&str]) -> Self {
        let supported = dimensions
            .iter()
            .map(|dimension| {
                let entity_type = entity_type_of(dimension);
                let mut capabilities = Capabilities::CLASSIFY | Capabilities::EVALUATE;
                if entity_type == DATETIME_ENTITY_TYPE {
                    capabilities |= Capabilities::MERGE;
                }
                (entity_type, capabilities)
            })
            .collect();
        Self { name: name.into(), merger: DatesMerge::new(parser.clone()), parser, supported }
    }
}

impl EntityTypeClassifier for TemporalProvider {
    fn classify_entities(&self, context: &EntityCallContext, text: &str) -> Result<Vec<EntityTypeRecognition>> {
        let EntityCallContext::ForIntent(context) = context else {
            return Ok(Vec::new());
        };

        let types: BTreeMap<&str, &EntityType> = context
            .intent
            .entity_types()
            .into_iter()
            .filter(|t| self.supported.contains_key(&t.name))
            .filter_map(|t| Some((dimension_of(&t.name)?, t)))
            .collect();
        if types.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = TemporalParseRequest::new(context.locale.language(), TIME_DIMENSION, context.reference_date, text);
        request.dimensions = types.keys().map(|d| d.to_string()).collect();

        let found = self.parser.parse(&request)?;
        Ok(found
            .into_iter()
            .filter_map(|parsed| {
                let entity_type = types.get(parsed.dimension.as_str())?;
                trace!(entity_type = %entity_type.name, span = %parsed.span, "temporal value found");
                Some(
                    EntityTypeRecognition::new(parsed.span, (*entity_type).clone(), CLASSIFICATION_PROBABILITY)
                        .evaluated(Some(parsed.value)),
                )
            })
            .collect())
    }
}

impl EntityTypeEvaluator for TemporalProvider {
    fn evaluate(&self, context: &EntityCallContextForEntity, text: &str) -> Result<EvaluationResult> {
        let Some(dimension) = dimension_of(&context.entity_type.name) else {
            return Ok(EvaluationResult::unevaluated());
        };

        let request = TemporalParseRequest::new(context.locale.language(), dimension, context.reference_date, text);
        let Some(first) = self.parser.parse(&request)?.into_iter().next() else {
            return Ok(EvaluationResult::unevaluated());
        };

        let whole = first.span.start == 0 && first.span.end == text.chars().count();
        Ok(EvaluationResult::evaluated(Some(first.value), if whole { 1.0 } else { 0.5 }))
    }
}

impl EntityTypeProvider for TemporalProvider {
    fn name(&self) -> &str {
        &self.name
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

    fn merger(&self) -> Option<&dyn ValuesMerger> {
        Some(&self.merger)
    }

    fn healthcheck(&self) -> bool {
        self.parser.healthcheck()
    }
}
