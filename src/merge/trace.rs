//! Merge trace.
//!
//! [`EntityMerge::merge_traced`](super::EntityMerge::merge_traced) records what
//! each group decided, for the CLI report and for tests that need to see why a
//! candidate lost. Collection is opt-in; [`EntityMerge::merge`](super::EntityMerge::merge)
//! drops it.

use std::time::Duration;

use crate::TextSpan;

#[derive(Debug, Default, Clone)]
pub struct MergeTrace {
    /// Bound list was returned as-is.
    pub short_circuit: bool,
    /// Every candidate, heaviest first.
    pub candidates: Vec<CandidateSummary>,
    /// One entry per group that still had available candidates.
    pub decisions: Vec<GroupDecision>,
    pub total: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSummary {
    pub span: TextSpan,
    pub type_name: String,
    /// Role for bound candidates.
    pub role: Option<String>,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupDecision {
    /// Candidate indices still available when the group was processed.
    pub available: Vec<usize>,
    pub winner: usize,
    pub subsumption_bonus: bool,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Bound winner emitted unchanged.
    Kept,
    /// Bound winner evaluated to nothing.
    Dropped,
    /// Unbound winner took the role of an overlapping bound candidate.
    Promoted { role: String },
    /// Unbound winner bound from the intent's slots alone.
    Orphan { role: String, ambiguous: bool },
}
