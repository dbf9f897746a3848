//! Overlap groups and per-group winner selection.

use super::weighted::{SUBSUMPTION_BONUS, Weighted};

/// For each candidate, the indices of candidates sharing at least one char with it.
///
/// A candidate always belongs to its own group, even with an empty span. Indices
/// are ascending, so each group lists its members heaviest first.
pub(crate) fn overlap_groups(candidates: &[Weighted<'_>]) -> Vec<Vec<usize>> {
    (0..candidates.len())
        .map(|i| {
            let span = candidates[i].span();
            (0..candidates.len()).filter(|&j| j == i || span.overlaps(&candidates[j].span())).collect()
        })
        .collect()
}

fn group_max(candidates: &[Weighted<'_>], group: &[usize]) -> f64 {
    group.iter().map(|&i| candidates[i].weight).fold(f64::NEG_INFINITY, f64::max)
}

/// Group indices, least contested first: ascending by each group's heaviest member.
pub(crate) fn processing_order(candidates: &[Weighted<'_>], groups: &[Vec<usize>]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..groups.len()).collect();
    order.sort_by(|&a, &b| group_max(candidates, &groups[a]).total_cmp(&group_max(candidates, &groups[b])));
    order
}

/// The available candidate whose span is exactly the union of all available spans.
pub(crate) fn subsuming(candidates: &[Weighted<'_>], available: &[usize]) -> Option<usize> {
    if available.len() < 2 {
        return None;
    }
    let union = available.iter().map(|&i| candidates[i].span()).reduce(|a, b| a.union(&b))?;
    available.iter().copied().find(|&i| candidates[i].span() == union)
}

/// Heaviest available candidate, after the subsumption bonus. Ties go to the earlier index.
pub(crate) fn pick_winner(candidates: &[Weighted<'_>], available: &[usize]) -> Option<usize> {
    let bonus_to = subsuming(candidates, available);
    let effective = |i: usize| candidates[i].weight + if Some(i) == bonus_to { SUBSUMPTION_BONUS } else { 0.0 };

    let mut best: Option<(usize, f64)> = None;
    for &i in available {
        let w = effective(i);
        if best.is_none_or(|(_, bw)| w > bw) {
            best = Some((i, w));
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::super::weighted::weigh;
    use super::*;
    use crate::{EntityType, EntityTypeRecognition, TextSpan};

    fn rec(start: usize, end: usize, p: f64) -> EntityTypeRecognition {
        EntityTypeRecognition::new(TextSpan::new(start, end), EntityType::new("t:t"), p)
    }

    #[test]
    fn groups_include_self_and_overlaps() {
        let unbound = vec![rec(0, 5, 0.9), rec(3, 8, 0.8), rec(10, 12, 0.7), rec(11, 11, 0.6)];
        let c = weigh(&[], &unbound);
        let groups = overlap_groups(&c);
        assert_eq!(groups[0], vec![0, 1]);
        assert_eq!(groups[1], vec![0, 1]);
        assert_eq!(groups[2], vec![2]);
        assert_eq!(groups[3], vec![3]);
    }

    #[test]
    fn order_starts_with_least_contested_group() {
        let unbound = vec![rec(0, 5, 0.9), rec(10, 12, 0.4)];
        let c = weigh(&[], &unbound);
        let groups = overlap_groups(&c);
        assert_eq!(processing_order(&c, &groups), vec![1, 0]);
    }

    #[test]
    fn subsuming_span_gets_the_bonus() {
        // 0..4 and 5..9 both beat 0..9 on raw weight, but 0..9 covers them.
        let unbound = vec![rec(0, 4, 0.8), rec(5, 9, 0.75), rec(0, 9, 0.7)];
        let c = weigh(&[], &unbound);
        assert_eq!(subsuming(&c, &[0, 1, 2]), Some(2));
        assert_eq!(pick_winner(&c, &[0, 1, 2]), Some(2));
    }

    #[test]
    fn no_bonus_for_a_single_candidate() {
        let unbound = vec![rec(0, 4, 0.8)];
        let c = weigh(&[], &unbound);
        assert_eq!(subsuming(&c, &[0]), None);
        assert_eq!(pick_winner(&c, &[0]), Some(0));
        assert_eq!(pick_winner(&c, &[]), None);
    }
}
