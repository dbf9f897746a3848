//! Weighted candidates.
//!
//! Bound and unbound recognitions compete on one scale. The weight is the
//! probability, minus a penalty when an evaluator ran and found nothing.

use crate::{EntityRecognition, EntityTypeRecognition, TextSpan};

/// Taken off candidates evaluated to a null value, unless fully certain.
pub(crate) const EVALUATED_NULL_PENALTY: f64 = 0.5;

/// Granted to the one available candidate whose span covers all the others.
pub(crate) const SUBSUMPTION_BONUS: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Candidate<'a> {
    Entity(&'a EntityRecognition),
    EntityType(&'a EntityTypeRecognition),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Weighted<'a> {
    pub candidate: Candidate<'a>,
    pub weight: f64,
}

impl<'a> Weighted<'a> {
    pub fn entity(recognition: &'a EntityRecognition) -> Self {
        let weight = weight_of(recognition.probability, recognition.evaluated, recognition.value.is_some());
        Self { candidate: Candidate::Entity(recognition), weight }
    }

    pub fn entity_type(recognition: &'a EntityTypeRecognition) -> Self {
        let weight = weight_of(recognition.probability, recognition.evaluated, recognition.value.is_some());
        Self { candidate: Candidate::EntityType(recognition), weight }
    }

    pub fn span(&self) -> TextSpan {
        match self.candidate {
            Candidate::Entity(r) => r.span,
            Candidate::EntityType(r) => r.span,
        }
    }

    pub fn type_name(&self) -> &'a str {
        match self.candidate {
            Candidate::Entity(r) => &r.entity.entity_type.name,
            Candidate::EntityType(r) => &r.entity_type.name,
        }
    }
}

pub(crate) fn weight_of(probability: f64, evaluated: bool, has_value: bool) -> f64 {
    if evaluated && !has_value && probability != 1.0 { probability - EVALUATED_NULL_PENALTY } else { probability }
}

/// All candidates, heaviest first. Ties keep input order, bound before unbound.
pub(crate) fn weigh<'a>(bound: &'a [EntityRecognition], unbound: &'a [EntityTypeRecognition]) -> Vec<Weighted<'a>> {
    let mut all: Vec<Weighted<'a>> =
        bound.iter().map(Weighted::entity).chain(unbound.iter().map(Weighted::entity_type)).collect();
    all.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    all
}
