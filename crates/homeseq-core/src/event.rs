//! Event and item value objects (C2).

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// A single state transition: `old_state -> new_state` on a named item.
///
/// `Item` is the equality/hash key the sequence graph keys nodes on; it
/// carries no timestamp or context of its own.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub old_state: String,
    pub new_state: String,
}

impl Item {
    pub fn new(
        name: impl Into<String>,
        old_state: impl Into<String>,
        new_state: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            old_state: old_state.into(),
            new_state: new_state.into(),
        }
    }
}

/// An observed event: an [`Item`] transition, when it happened, and the
/// context it happened under.
///
/// Equality and hashing are on `item` alone: `timestamp`, `conditions`, and
/// `id` are auxiliary data that must not affect node identity in a sequence
/// graph, matching the source model's `compare=False` fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub item: Item,
    pub timestamp: DateTime<Utc>,
    pub conditions: BTreeSet<Condition>,
    pub id: Option<i64>,
}

impl Event {
    pub fn new(item: Item, timestamp: DateTime<Utc>, conditions: BTreeSet<Condition>) -> Self {
        Self {
            item,
            timestamp,
            conditions,
            id: None,
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.item == other.item
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.item.hash(state);
    }
}
