//! The event-sequence directed multigraph model (C3).
//!
//! Nodes are keyed by [`Item`] equality (not by timestamp or conditions);
//! edges are a `(node, node) -> weight` map where `weight == 0` denotes a
//! virtual, never-directly-observed adjacency. See `SPEC_FULL.md` §4.3 for
//! the full algorithm and the rationale behind the combinatorial expansion.

use std::collections::{BTreeSet, HashMap};

use crate::condition::Condition;
use crate::error::{Error, Result};
use crate::event::{Event, Item};

/// A directed multigraph of events, grown one [`Event`] at a time via
/// [`EventSequence::add_event`].
#[derive(Debug, Clone, Default)]
pub struct EventSequence {
    nodes: Vec<Event>,
    occurrences: Vec<u32>,
    index: HashMap<Item, usize>,
    edges: HashMap<(usize, usize), u32>,
    root: Option<usize>,
    predecessor: Option<usize>,
}

impl EventSequence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes currently in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total edge count, including virtual (zero-weight) edges.
    ///
    /// This is the quantity the calibrator sums across sequences (`pairs(T)`
    /// in `SPEC_FULL.md` §4.4) — not the node count.
    #[must_use]
    pub fn size(&self) -> usize {
        self.edges.len()
    }

    /// The sequence's conditions: the root event's conditions, or empty if
    /// the sequence has no nodes yet.
    #[must_use]
    pub fn conditions(&self) -> BTreeSet<Condition> {
        self.root
            .map(|r| self.nodes[r].conditions.clone())
            .unwrap_or_default()
    }

    /// Attempts to incorporate `event` into the sequence.
    ///
    /// Returns `false` (without modifying the graph) when `event` already
    /// has a node in the graph, or when it arrives more than `delay_secs`
    /// after the current predecessor tip. A `false` return is the generator's
    /// primary segmentation signal.
    pub fn add_event(&mut self, event: &Event, delay_secs: i64) -> bool {
        if self.index.contains_key(&event.item) {
            return false;
        }
        if let Some(p) = self.predecessor {
            let gap = (event.timestamp - self.nodes[p].timestamp).num_seconds();
            if gap > delay_secs {
                return false;
            }
        }

        let idx = self.nodes.len();
        self.nodes.push(event.clone());
        self.occurrences.push(1);
        self.index.insert(event.item.clone(), idx);
        if self.root.is_none() {
            self.root = Some(idx);
        }

        if let Some(p) = self.predecessor {
            self.edges.insert((p, idx), 1);
            for q in 0..idx {
                if q != p {
                    self.edges.entry((q, idx)).or_insert(0);
                }
            }
        }
        self.predecessor = Some(idx);
        true
    }

    fn node_items(&self) -> BTreeSet<Item> {
        self.nodes.iter().map(|e| e.item.clone()).collect()
    }

    fn node_occurrences(&self) -> HashMap<Item, u32> {
        self.nodes
            .iter()
            .zip(self.occurrences.iter())
            .map(|(e, &occ)| (e.item.clone(), occ))
            .collect()
    }

    fn edges_with_items(&self, positive_only: bool) -> BTreeSet<(Item, Item)> {
        self.edges
            .iter()
            .filter(|(_, &w)| !positive_only || w > 0)
            .map(|(&(u, v), _)| (self.nodes[u].item.clone(), self.nodes[v].item.clone()))
            .collect()
    }

    fn edge_weights_with_items(&self, positive_only: bool) -> HashMap<(Item, Item), u32> {
        self.edges
            .iter()
            .filter(|(_, &w)| !positive_only || w > 0)
            .map(|(&(u, v), &w)| ((self.nodes[u].item.clone(), self.nodes[v].item.clone()), w))
            .collect()
    }

    /// `self`'s positive-weight edges, excluding virtual ones.
    #[must_use]
    pub fn positive_edges(&self) -> BTreeSet<(Item, Item)> {
        self.edges_with_items(true)
    }

    /// Every node currently in the graph, with its accumulated occurrence.
    pub fn nodes(&self) -> impl Iterator<Item = (&Event, u32)> {
        self.nodes.iter().zip(self.occurrences.iter().copied())
    }

    /// Every edge currently in the graph (including virtual ones), as
    /// `(u, v, weight)` triples over the underlying events.
    pub fn edges(&self) -> impl Iterator<Item = (&Event, &Event, u32)> {
        self.edges
            .iter()
            .map(|(&(u, v), &w)| (&self.nodes[u], &self.nodes[v], w))
    }

    fn structurally_equal_to(&self, other_conditions: &BTreeSet<Condition>, other: &Self) -> bool {
        self.conditions() == *other_conditions
            && self.node_items() == other.node_items()
            && self.positive_edges() == other.positive_edges()
    }

    /// Whether `self` contains `other`: equal conditions, `other`'s nodes are
    /// a subset of `self`'s, and `other`'s positive edges are a subset of
    /// `self`'s positive edges.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.conditions() == other.conditions()
            && other.node_items().is_subset(&self.node_items())
            && other.positive_edges().is_subset(&self.positive_edges())
    }

    /// The nodes `other` would need in order for `self` to contain it.
    #[must_use]
    pub fn missing_from(&self, other: &Self) -> BTreeSet<Item> {
        other.node_items().difference(&self.node_items()).cloned().collect()
    }

    /// Merges `other` into a fresh copy of `self`.
    ///
    /// Precondition: `self == other` (structural equality, §4.3). No node or
    /// edge is ever added by a merge; only occurrence counts and edge weights
    /// accumulate. This is how virtual edges become real over time.
    pub fn merge(&self, other: &Self) -> Result<Self> {
        if self != other {
            return Err(Error::IncompatibleMerge);
        }
        let mut result = self.clone();
        for (item, occ) in other.node_occurrences() {
            if let Some(&idx) = result.index.get(&item) {
                result.occurrences[idx] += occ;
            }
        }
        for ((u_item, v_item), w) in other.edge_weights_with_items(false) {
            if let (Some(&u), Some(&v)) = (result.index.get(&u_item), result.index.get(&v_item)) {
                if let Some(existing) = result.edges.get_mut(&(u, v)) {
                    *existing += w;
                }
            }
        }
        Ok(result)
    }

    /// Whether `other` is anomalous relative to `self`, under a conditions
    /// override for `other` (see `SPEC_FULL.md` §4.7/§9 — the explanation
    /// module's temporary rebind, modeled as an explicit parameter rather
    /// than mutable state).
    #[must_use]
    pub fn is_anomaly_with_conditions(
        &self,
        other: &Self,
        w: u32,
        other_conditions_override: Option<&BTreeSet<Condition>>,
    ) -> bool {
        let other_conditions = other_conditions_override
            .cloned()
            .unwrap_or_else(|| other.conditions());
        if !self.structurally_equal_to(&other_conditions, other) {
            return true;
        }
        for (u_item, v_item) in other.positive_edges() {
            if let (Some(&u), Some(&v)) = (self.index.get(&u_item), self.index.get(&v_item)) {
                if let Some(&self_weight) = self.edges.get(&(u, v)) {
                    if self_weight < w {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// `is_anomaly_with_conditions(other, w, None)`.
    #[must_use]
    pub fn is_anomaly(&self, other: &Self, w: u32) -> bool {
        self.is_anomaly_with_conditions(other, w, None)
    }

    #[must_use]
    pub fn node_similarity(&self, other: &Self) -> f64 {
        let other_nodes = other.node_items();
        if other_nodes.is_empty() {
            return 0.0;
        }
        let intersection = self.node_items().intersection(&other_nodes).count();
        intersection as f64 / other_nodes.len() as f64
    }

    /// `|E⁺ ∩ E⁺_other| / |E⁺_other|`: both sides restricted to positive-weight
    /// (non-virtual) edges. See `SPEC_FULL.md` §4.3 "Similarity scores".
    #[must_use]
    pub fn edge_similarity(&self, other: &Self) -> f64 {
        let other_positive = other.positive_edges();
        if other_positive.is_empty() {
            return 0.0;
        }
        let self_positive = self.positive_edges();
        let intersection = self_positive.intersection(&other_positive).count();
        intersection as f64 / other_positive.len() as f64
    }

    #[must_use]
    pub fn conditions_similarity(&self, other: &Self) -> f64 {
        let other_conditions = other.conditions();
        if other_conditions.is_empty() {
            return 0.0;
        }
        let intersection = self.conditions().intersection(&other_conditions).count();
        intersection as f64 / other_conditions.len() as f64
    }

    /// `(3*edge + 2*conditions + node) / 3`, in `[0, 2]`.
    #[must_use]
    pub fn composite_similarity(&self, other: &Self) -> f64 {
        let edge = self.edge_similarity(other);
        let conditions = self.conditions_similarity(other);
        let node = self.node_similarity(other);
        (3.0 * edge + 2.0 * conditions + node) / 3.0
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Reconstructs a sequence from already-known nodes and edges, as loaded
    /// from storage (`SPEC_FULL.md` §4.6). The graph is taken as given;
    /// `add_event`'s segmentation constraints do not apply to a reload.
    ///
    /// `root_item` identifies the node whose conditions become the
    /// sequence's conditions; the storage layer derives it as the one node
    /// that never appears as an edge target (every other node has at least
    /// the real chain edge pointing into it, by construction of `add_event`).
    pub(crate) fn from_stored(
        nodes: Vec<(Event, u32)>,
        edges: Vec<((Item, Item), u32)>,
        root_item: &Item,
    ) -> Self {
        let mut seq = Self::default();
        for (event, occurrence) in nodes {
            let idx = seq.nodes.len();
            seq.index.insert(event.item.clone(), idx);
            seq.nodes.push(event);
            seq.occurrences.push(occurrence);
        }
        seq.root = seq.index.get(root_item).copied();
        for ((u_item, v_item), weight) in edges {
            if let (Some(&u), Some(&v)) = (seq.index.get(&u_item), seq.index.get(&v_item)) {
                seq.edges.insert((u, v), weight);
            }
        }
        seq
    }
}

impl PartialEq for EventSequence {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_equal_to(&other.conditions(), other)
    }
}

impl Eq for EventSequence {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Item;
    use chrono::{DateTime, Utc};

    fn ev(name: &str, secs: i64) -> Event {
        Event::new(
            Item::new(name, "off", "on"),
            DateTime::<Utc>::from_timestamp(secs, 0).unwrap(),
            BTreeSet::new(),
        )
    }

    #[test]
    fn reflexivity_symmetry_transitivity() {
        let mut a = EventSequence::new();
        a.add_event(&ev("a", 0), 10);
        a.add_event(&ev("b", 1), 10);
        let b = a.clone();
        let c = a.clone();
        assert_eq!(a, a);
        assert_eq!(a, b);
        assert_eq!(b, a);
        assert_eq!(b, c);
        assert_eq!(a, c);
    }

    #[test]
    fn combinatorial_expansion_s3() {
        // S3: A@0, B@1, C@2 with T=10 -> A->B(1), B->C(1), A->C(0), size()==3
        let mut seq = EventSequence::new();
        assert!(seq.add_event(&ev("a", 0), 10));
        assert!(seq.add_event(&ev("b", 1), 10));
        assert!(seq.add_event(&ev("c", 2), 10));
        assert_eq!(seq.size(), 3);
        assert_eq!(seq.positive_edges().len(), 2);
    }

    #[test]
    fn rejects_repeated_item() {
        let mut seq = EventSequence::new();
        assert!(seq.add_event(&ev("a", 0), 10));
        assert!(!seq.add_event(&ev("a", 1), 10));
    }

    #[test]
    fn rejects_beyond_delay() {
        let mut seq = EventSequence::new();
        assert!(seq.add_event(&ev("a", 0), 5));
        assert!(!seq.add_event(&ev("b", 10), 5));
    }

    #[test]
    fn merge_promotes_virtual_edges_s4() {
        let mut s1 = EventSequence::new();
        s1.add_event(&ev("a", 0), 10);
        s1.add_event(&ev("b", 1), 10);
        s1.add_event(&ev("c", 2), 10);

        let s2 = s1.clone();
        let merged = s1.merge(&s2).unwrap();

        let a_b = merged
            .positive_edges()
            .into_iter()
            .find(|(u, v)| u.name == "a" && v.name == "b");
        assert!(a_b.is_some());

        let occ: HashMap<_, _> = merged.nodes().map(|(e, occ)| (e.item.name.clone(), occ)).collect();
        assert_eq!(occ["a"], 2);
    }

    #[test]
    fn merge_rejects_unequal_sequences() {
        let mut s1 = EventSequence::new();
        s1.add_event(&ev("a", 0), 10);
        s1.add_event(&ev("b", 1), 10);

        let mut s2 = EventSequence::new();
        s2.add_event(&ev("a", 0), 10);
        s2.add_event(&ev("c", 1), 10);

        assert!(s1.merge(&s2).is_err());
    }

    #[test]
    fn is_anomaly_weight_threshold_s5() {
        let mut library = EventSequence::new();
        library.add_event(&ev("a", 0), 10);
        library.add_event(&ev("b", 1), 10);
        let library = library.merge(&library.clone()).unwrap(); // weight 2
        let library = library.merge(&library.clone()).unwrap(); // weight 4
        let boosted = library.merge(&library.clone()).unwrap(); // A->B weight 8

        let mut query = EventSequence::new();
        query.add_event(&ev("a", 0), 10);
        query.add_event(&ev("b", 1), 10);

        // Structurally equal and well above a lax threshold: not anomalous.
        assert!(!boosted.is_anomaly(&query, 0));
        assert!(!boosted.is_anomaly(&query, 8));
        // Raising the threshold past the learned weight flags it as anomalous.
        assert!(boosted.is_anomaly(&query, 9));
    }

    #[test]
    fn similarity_bounds() {
        let mut a = EventSequence::new();
        a.add_event(&ev("a", 0), 10);
        a.add_event(&ev("b", 1), 10);
        let b = a.clone();

        assert!((0.0..=1.0).contains(&a.node_similarity(&b)));
        assert!((0.0..=1.0).contains(&a.edge_similarity(&b)));
        assert!((0.0..=1.0).contains(&a.conditions_similarity(&b)));
        let composite = a.composite_similarity(&b);
        assert!((0.0..=2.0).contains(&composite));
    }

    #[test]
    fn containment() {
        let mut small = EventSequence::new();
        small.add_event(&ev("a", 0), 10);

        let mut big = EventSequence::new();
        big.add_event(&ev("a", 0), 10);
        big.add_event(&ev("b", 1), 10);

        assert!(big.contains(&small));
        assert!(!small.contains(&big));
    }

    // ===================================================================
    // Property-based tests (SPEC_FULL.md §8 — testable properties)
    // ===================================================================

    use proptest::prelude::*;

    /// Strategy for a short run of `(item_index, gap_secs)` pairs, built into
    /// an [`EventSequence`] with a generous delay so segmentation never
    /// kicks in; duplicate `item_index`es exercise the dedup-rejection path
    /// of `add_event` exactly as a real interleaved stream would.
    fn arb_event_plan() -> impl Strategy<Value = Vec<(u8, i64)>> {
        prop::collection::vec((0u8..5, 1i64..30), 2..8)
    }

    fn build_sequence(plan: &[(u8, i64)]) -> EventSequence {
        let mut seq = EventSequence::new();
        let mut t = 0i64;
        for &(name, gap) in plan {
            t += gap;
            seq.add_event(&ev(&format!("item{name}"), t), 1_000_000);
        }
        seq
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// `==` is reflexive, symmetric, and transitive over arbitrary
        /// generated sequences.
        #[test]
        fn prop_equality_is_an_equivalence(plan in arb_event_plan()) {
            let a = build_sequence(&plan);
            let b = build_sequence(&plan);
            let c = build_sequence(&plan);
            prop_assert_eq!(&a, &a);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(&b, &a);
            prop_assert_eq!(&b, &c);
            prop_assert_eq!(&a, &c);
        }

        /// Merging a sequence with a structurally equal one never changes
        /// its equality class.
        #[test]
        fn prop_merge_preserves_equality_class(plan in arb_event_plan()) {
            let s1 = build_sequence(&plan);
            let s2 = build_sequence(&plan);
            let merged = s1.merge(&s2).expect("structurally equal sequences merge");
            prop_assert_eq!(&merged, &s1);
        }

        /// `is_anomaly(self, 0)` is always false; raising the threshold past
        /// the maximum positive edge weight always flags the identical
        /// sequence as anomalous (once it has at least one real edge).
        #[test]
        fn prop_is_anomaly_threshold_bounds(plan in arb_event_plan()) {
            let s = build_sequence(&plan);
            prop_assert!(!s.is_anomaly(&s, 0));

            if let Some(max_weight) = s.edges().filter(|&(_, _, w)| w > 0).map(|(_, _, w)| w).max() {
                prop_assert!(s.is_anomaly(&s, max_weight + 1));
            }
        }

        /// All individual similarity scores land in `[0, 1]`; the composite
        /// lands in `[0, 2]`, regardless of how unrelated the two sequences
        /// are.
        #[test]
        fn prop_similarity_bounds(plan_a in arb_event_plan(), plan_b in arb_event_plan()) {
            let a = build_sequence(&plan_a);
            let b = build_sequence(&plan_b);

            let node = a.node_similarity(&b);
            let edge = a.edge_similarity(&b);
            let conditions = a.conditions_similarity(&b);
            let composite = a.composite_similarity(&b);

            prop_assert!((0.0..=1.0).contains(&node));
            prop_assert!((0.0..=1.0).contains(&edge));
            prop_assert!((0.0..=1.0).contains(&conditions));
            prop_assert!((0.0..=2.0).contains(&composite));
        }

        /// Containment is reflexive and antisymmetric on equal inputs: a
        /// sequence always contains an exact structural copy of itself, and
        /// a sequence built from a strict prefix of the same plan is always
        /// contained in the full one (when the prefix's events are still
        /// valid, i.e. the item indices stay the same).
        #[test]
        fn prop_containment_reflexive(plan in arb_event_plan()) {
            let a = build_sequence(&plan);
            let b = build_sequence(&plan);
            prop_assert!(a.contains(&b));
            prop_assert!(b.contains(&a));
        }
    }
}
