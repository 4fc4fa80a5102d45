//! Explanation module (C7): classifies an incoming anomaly against the
//! learned library and produces a human-readable justification.
//!
//! The conditions "rebind" the source performs in place on the candidate
//! sequence is modeled here as an explicit override parameter threaded
//! through [`crate::sequence::EventSequence::is_anomaly_with_conditions`]
//! instead of mutable state (`SPEC_FULL.md` §4.7, §9, REDESIGN FLAGS).
//! Because `anomaly` itself is never mutated, the symmetric-difference diff
//! computed in step 3 below is always against its real conditions — there is
//! no reset-ordering subtlety to get wrong.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::condition::Condition;
use crate::sequence::EventSequence;

/// The outcome of [`explain_anomaly`]: a human-readable reason and,
/// when one was found, the closest known sequence.
#[derive(Debug, Clone)]
pub struct Explanation {
    pub reason: String,
    pub best_match: Option<EventSequence>,
}

/// Classifies `anomaly` against `library` (as returned by
/// [`crate::storage::SqliteStore::get_event_sequences`]) and explains why it
/// was flagged.
#[must_use]
pub fn explain_anomaly(
    anomaly: &EventSequence,
    library: &BTreeMap<BTreeSet<Condition>, Vec<EventSequence>>,
    anomaly_weight_threshold: u32,
) -> Explanation {
    let anomaly_conditions = anomaly.conditions();
    let mut conditions_unknown = false;

    if let Some(candidates) = library.get(&anomaly_conditions) {
        for s in candidates {
            if !s.is_anomaly(anomaly, 0) {
                return Explanation {
                    reason: "matching sequence found but weights below threshold".to_string(),
                    best_match: None,
                };
            }
        }
    } else {
        conditions_unknown = true;
    }

    let mut swap_match: Option<(&EventSequence, &BTreeSet<Condition>, bool)> = None;
    'search: for (c, candidates) in library {
        for s in candidates {
            if !s.is_anomaly_with_conditions(anomaly, anomaly_weight_threshold, Some(c)) {
                swap_match = Some((s, c, false));
                break 'search;
            }
            if !s.is_anomaly_with_conditions(anomaly, 0, Some(c)) {
                swap_match = Some((s, c, true));
                break 'search;
            }
        }
    }

    if let Some((_matched, swapped_conditions, weights_low)) = swap_match {
        let target: BTreeSet<&Condition> = swapped_conditions.difference(&anomaly_conditions).collect();
        let actual: BTreeSet<&Condition> = anomaly_conditions.difference(swapped_conditions).collect();
        let mut reason = "structure known, but under different conditions".to_string();
        if weights_low {
            reason.push_str("; weights are below threshold even under the swapped conditions");
        }
        reason.push_str(&format!("; suggested condition change: target={target:?}, actual={actual:?}"));
        if conditions_unknown {
            reason = format!("conditions unknown to system; {reason}");
        }
        // §4.7 step 3 / scenario S6: a condition-swap match reports the
        // suggested change but returns no best-match sequence.
        return Explanation {
            reason,
            best_match: None,
        };
    }

    let mut best: Option<&EventSequence> = None;
    let mut best_score = f64::NEG_INFINITY;
    for candidates in library.values() {
        for s in candidates {
            let score = s.composite_similarity(anomaly);
            if score > best_score {
                best_score = score;
                best = Some(s);
            }
        }
    }

    let Some(best) = best else {
        return Explanation {
            reason: "no learned sequences are available for comparison".to_string(),
            best_match: None,
        };
    };

    let mut reason = if best.contains(anomaly) {
        let missing = anomaly.missing_from(best);
        format!("closest known sequence contains this one; missing events: {missing:?}")
    } else {
        format!(
            "closest known sequence: node_similarity={:.2}, edge_similarity={:.2}, conditions_similarity={:.2}, composite={:.2}",
            best.node_similarity(anomaly),
            best.edge_similarity(anomaly),
            best.conditions_similarity(anomaly),
            best_score,
        )
    };
    if conditions_unknown {
        reason = format!("conditions unknown to system; {reason}");
    }

    Explanation {
        reason,
        best_match: Some(best.clone()),
    }
}
