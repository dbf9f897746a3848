//! Weighted overlap merge.
//!
//! Two recognition sources meet here: recognitions the intent model already bound
//! to a slot, and type-only recognitions from the entity-type classifiers. The
//! merge turns them into one list of slot-bound recognitions, sorted by start,
//! with no two spans overlapping.
//!
//! ## How the parts work together
//!
//! ```text
//! bound   ──┐
//!           ├── weigh (weighted.rs)          probability, minus 0.5 for
//! unbound ──┘     │                          evaluated-to-nothing candidates
//!                 v
//!           overlap_groups (overlap.rs)      one group per candidate
//!                 │
//!                 v
//!           processing_order                 least contested group first
//!                 │
//!                 v  for each group
//!           available = group - viewed
//!           pick_winner                      +0.2 to the span covering all others
//!           viewed += winner's whole group
//!                 │
//!                 v
//!           resolve winner                   keep / drop / promote / orphan
//!                 │
//!                 v
//!           sort by start
//! ```
//!
//! ## Determinism
//!
//! Candidates live in plain vectors and every sort is stable, so identical inputs
//! give identical output. Nothing here iterates a hash map or reads the clock,
//! apart from the elapsed time recorded in [`MergeTrace`].
//!
//! ## Role resolution for unbound winners
//!
//! An unbound winner first looks for a bound candidate in its group with the same
//! entity type and a role the intent declares for that type; it takes that role.
//! Otherwise it becomes an orphan bound to the intent's slot of that type. With
//! several such slots the first declared one is used and a warning is logged. A
//! slot whose role has its own reference date is re-evaluated after binding.

#[path = "merge/overlap.rs"]
mod overlap;
#[path = "merge/trace.rs"]
mod trace;
#[path = "merge/weighted.rs"]
mod weighted;

use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::context::CallContext;
use crate::evaluate::evaluate_entities;
use crate::provider::ProviderRegistry;
use crate::{Entity, EntityRecognition, EntityTypeRecognition, Intent};

pub use trace::{CandidateSummary, GroupDecision, MergeTrace, Outcome};

use weighted::{Candidate, Weighted};

pub struct EntityMerge<'a> {
    registry: &'a ProviderRegistry,
    context: &'a CallContext,
}

impl<'a> EntityMerge<'a> {
    pub fn new(registry: &'a ProviderRegistry, context: &'a CallContext) -> Self {
        Self { registry, context }
    }

    pub fn merge(
        &self,
        text: &str,
        intent: &Intent,
        bound: &[EntityRecognition],
        unbound: &[EntityTypeRecognition],
    ) -> Vec<EntityRecognition> {
        self.merge_traced(text, intent, bound, unbound).0
    }

    pub fn merge_traced(
        &self,
        text: &str,
        intent: &Intent,
        bound: &[EntityRecognition],
        unbound: &[EntityTypeRecognition],
    ) -> (Vec<EntityRecognition>, MergeTrace) {
        let started = Instant::now();
        let mut merge_trace = MergeTrace::default();

        // Nothing to reconcile: the bound list already has no overlap and no empty evaluation.
        if unbound.is_empty() && is_clean(bound) {
            let mut kept = bound.to_vec();
            kept.sort_by_key(|r| r.span.start);
            merge_trace.short_circuit = true;
            merge_trace.total = started.elapsed();
            return (kept, merge_trace);
        }

        let candidates = weighted::weigh(bound, unbound);
        merge_trace.candidates = candidates.iter().map(summarize).collect();

        let groups = overlap::overlap_groups(&candidates);
        let mut viewed = vec![false; candidates.len()];
        let mut merged = Vec::new();

        for g in overlap::processing_order(&candidates, &groups) {
            let available: Vec<usize> = groups[g].iter().copied().filter(|&i| !viewed[i]).collect();
            let Some(winner) = overlap::pick_winner(&candidates, &available) else {
                continue;
            };
            let subsumption_bonus = overlap::subsuming(&candidates, &available) == Some(winner);

            // The winner absorbs everything it overlaps, including candidates outside this group.
            for &i in &groups[winner] {
                viewed[i] = true;
            }

            let outcome = match candidates[winner].candidate {
                Candidate::Entity(recognition) if recognition.is_evaluated_null() => {
                    trace!(span = %recognition.span, entity = %recognition.entity, "dropping entity evaluated to nothing");
                    Outcome::Dropped
                }
                Candidate::Entity(recognition) => {
                    merged.push(recognition.clone());
                    Outcome::Kept
                }
                Candidate::EntityType(recognition) => {
                    let (entity, outcome) = self.bind(intent, recognition, &candidates, &groups[g]);
                    merged.push(self.finish(text, recognition.to_entity_recognition(entity.role.clone()), &entity));
                    outcome
                }
            };

            merge_trace.decisions.push(GroupDecision { available, winner, subsumption_bonus, outcome });
        }

        merged.sort_by_key(|r| r.span.start);
        merge_trace.total = started.elapsed();
        debug!(
            candidates = candidates.len(),
            merged = merged.len(),
            elapsed = ?merge_trace.total,
            "entity recognitions merged"
        );
        (merged, merge_trace)
    }

    /// Choose the slot an unbound winner fills.
    fn bind(
        &self,
        intent: &Intent,
        recognition: &EntityTypeRecognition,
        candidates: &[Weighted<'_>],
        group: &[usize],
    ) -> (Entity, Outcome) {
        let type_name = &recognition.entity_type.name;

        let promoted = group.iter().find_map(|&i| match candidates[i].candidate {
            Candidate::Entity(bound) if bound.entity.entity_type.name == *type_name => {
                let entity = Entity::new(recognition.entity_type.clone(), bound.entity.role.clone());
                intent.has_entity(&entity).then_some(entity)
            }
            _ => None,
        });
        if let Some(entity) = promoted {
            let role = entity.role.clone();
            return (entity, Outcome::Promoted { role });
        }

        let mut slots = intent.slots_of_type(type_name);
        let (role, ambiguous) = match (slots.next(), slots.next()) {
            (Some(only), None) => (only.role.clone(), false),
            (Some(first), Some(_)) => {
                warn!(
                    intent = %intent.name,
                    entity_type = %type_name,
                    role = %first.role,
                    "several slots accept this entity type, binding to the first declared one"
                );
                (first.role.clone(), true)
            }
            (None, _) => (recognition.entity_type.short_name().to_string(), false),
        };

        let entity = Entity::new(recognition.entity_type.clone(), role.clone());
        (entity, Outcome::Orphan { role, ambiguous })
    }

    /// Re-evaluate when the slot's role carries its own reference date.
    fn finish(&self, text: &str, mut recognition: EntityRecognition, entity: &Entity) -> EntityRecognition {
        if !self.context.evaluation.has_reference_date_for(entity) {
            return recognition;
        }

        debug!(entity = %entity, "re-evaluating against the role's reference date");
        recognition.evaluated = false;
        evaluate_entities(self.registry, self.context, text, vec![recognition.clone()]).pop().unwrap_or(recognition)
    }
}

/// No two spans overlap and nothing is evaluated to null.
fn is_clean(bound: &[EntityRecognition]) -> bool {
    let ok_values = bound.iter().all(|r| !r.is_evaluated_null());
    let no_overlap = bound.iter().enumerate().all(|(i, a)| bound[i + 1..].iter().all(|b| !a.span.overlaps(&b.span)));
    ok_values && no_overlap
}

fn summarize(w: &Weighted<'_>) -> CandidateSummary {
    CandidateSummary {
        span: w.span(),
        type_name: w.type_name().to_string(),
        role: match w.candidate {
            Candidate::Entity(r) => Some(r.entity.role.clone()),
            Candidate::EntityType(_) => None,
        },
        weight: w.weight,
    }
}
