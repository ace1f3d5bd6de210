//! Combining outcomes from several qualifying role assignments
//!
//! Override-class outcomes (direct grants and override groups) take
//! precedence wherever they come from; a tie between them goes to the
//! stricter one and is reported. Otherwise the most permissive outcome wins,
//! and constrained grants from different assignments are kept side by side
//! so that any one of them can allow the request.

use super::decision::{set_looseness, Constraint, Decision, Outcome};
use crate::error::ResolutionWarning;
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Merges the per-assignment outcomes of one pair
///
/// An empty slice means no assignment covered the request and yields DENY.
pub fn merge_outcomes(resource: &str, action: &str, outcomes: &[Outcome]) -> (Outcome, Option<ResolutionWarning>) {
    match outcomes {
        [] => return (Outcome::no_covering_assignment(), None),
        [single] => return (single.clone(), None),
        _ => {}
    }

    // Override tier: strongest rank, the stricter decision on a tie
    let overrides: Vec<&Outcome> = outcomes.iter().filter(|o| o.rank.is_override()).collect();
    let strongest = overrides.iter().copied().max_by(|a, b| {
        (a.rank.tier, a.rank.priority)
            .cmp(&(b.rank.tier, b.rank.priority))
            .then_with(|| b.decision.permissiveness().cmp(&a.decision.permissiveness()))
    });
    if let Some(winner) = strongest {
        let tied: Vec<&Outcome> = overrides
            .into_iter()
            .filter(|o| (o.rank.tier, o.rank.priority) == (winner.rank.tier, winner.rank.priority))
            .collect();
        let warning = tied
            .iter()
            .any(|o| o.decision != winner.decision)
            .then(|| ambiguous(resource, action, winner, &tied));
        return (winner.clone(), warning);
    }

    // Most permissive
    let Some(top) = outcomes.iter().map(|o| o.decision.permissiveness()).max() else {
        return (Outcome::no_covering_assignment(), None);
    };
    let mut tied: Vec<&Outcome> = outcomes
        .iter()
        .filter(|o| o.decision.permissiveness() == top)
        .collect();
    tied.sort_by(|a, b| b.rank.cmp(&a.rank));

    let highest = tied[0];
    if !highest.decision.is_constrained() || tied.len() == 1 {
        return (highest.clone(), None);
    }

    (combine_constrained(resource, action, &tied), None)
}

/// Disjunction of every constrained grant, minus sets a looser comparable
/// set already covers
///
/// `tied` is ordered strongest rank first; the strongest surviving grant
/// names the rule.
fn combine_constrained(resource: &str, action: &str, tied: &[&Outcome]) -> Outcome {
    let sets: Vec<(&Outcome, &[Constraint])> = tied
        .iter()
        .flat_map(|&o| o.decision.constraint_sets().iter().map(move |set| (o, set.as_slice())))
        .collect();

    let covered = |i: usize| {
        sets.iter().enumerate().any(|(j, (_, other))| {
            j != i
                && match set_looseness(other, sets[i].1) {
                    Some(Ordering::Greater) => true,
                    Some(Ordering::Equal) => j < i,
                    _ => false,
                }
        })
    };
    let kept: Vec<(&Outcome, &[Constraint])> = (0..sets.len()).filter(|&i| !covered(i)).map(|i| sets[i]).collect();

    let Some(&(lead, _)) = kept.first() else {
        return tied[0].clone();
    };

    if kept.len() > 1 {
        let sources: Vec<&str> = kept.iter().filter_map(|(o, _)| o.rule.source()).collect();
        debug!(
            "Keeping {} constrained grants on {}:{} from [{}]",
            kept.len(),
            resource,
            action,
            sources.join(", ")
        );
    }

    Outcome::new(
        Decision::any_of(kept.iter().map(|(_, set)| set.to_vec())),
        lead.rule.clone(),
        lead.rank,
    )
}

fn ambiguous(resource: &str, action: &str, winner: &Outcome, tied: &[&Outcome]) -> ResolutionWarning {
    let mut sources: Vec<String> = Vec::with_capacity(tied.len());
    for source in tied.iter().filter_map(|o| o.rule.source()) {
        if !sources.iter().any(|s| s == source) {
            sources.push(source.to_string());
        }
    }

    warn!(
        "Overrides from [{}] tie on {}:{} at priority {}; the stricter {} wins",
        sources.join(", "),
        resource,
        action,
        winner.rank.priority,
        winner.decision
    );

    ResolutionWarning::AmbiguousResolution {
        resource: resource.to_string(),
        action: action.to_string(),
        groups: sources,
        priority: winner.rank.priority,
    }
}
