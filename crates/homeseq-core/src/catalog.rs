//! Item and condition catalog (C9): the static JSON description of items,
//! their groups/states, and the condition kinds in play.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::condition::ConditionKind;
use crate::error::{Error, Result};

/// One or more strings; the catalog allows a bare string as shorthand for a
/// singleton list (`"groups": "lighting"` as well as `["lighting", "hvac"]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_set(self) -> BTreeSet<String> {
        match self {
            Self::One(s) => BTreeSet::from([s]),
            Self::Many(v) => v.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawItem {
    name: String,
    groups: OneOrMany,
    states: OneOrMany,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCondition {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCatalog {
    items: Vec<RawItem>,
    conditions: Vec<RawCondition>,
    #[serde(default)]
    rejected_states: BTreeSet<String>,
}

/// A single catalog-declared item: its allowed groups and states.
#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub groups: BTreeSet<String>,
    pub states: BTreeSet<String>,
}

/// The loaded, validated item/condition catalog.
///
/// Held as a read-only, process-wide structure for the duration of a run,
/// threaded explicitly through the application context rather than a
/// global (`SPEC_FULL.md` §4.9, §9).
#[derive(Debug, Clone)]
pub struct Catalog {
    items: std::collections::BTreeMap<String, CatalogItem>,
    conditions: Vec<(String, ConditionKind)>,
    rejected_states: BTreeSet<String>,
}

impl Catalog {
    /// Parses and validates a catalog from its JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawCatalog = serde_json::from_str(text)?;

        let mut items = std::collections::BTreeMap::new();
        for item in raw.items {
            items.insert(
                item.name,
                CatalogItem {
                    groups: item.groups.into_set(),
                    states: item.states.into_set(),
                },
            );
        }

        let mut conditions = Vec::with_capacity(raw.conditions.len());
        for condition in raw.conditions {
            let kind = ConditionKind::parse(&condition.kind).ok_or_else(|| {
                Error::Catalog(format!(
                    "unrecognized condition type '{}' for condition '{}'",
                    condition.kind, condition.name
                ))
            })?;
            conditions.push((condition.name, kind));
        }

        Ok(Self {
            items,
            conditions,
            rejected_states: raw.rejected_states,
        })
    }

    pub fn load_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// The union of every item's declared groups.
    #[must_use]
    pub fn groups(&self) -> BTreeSet<String> {
        self.items.values().flat_map(|i| i.groups.iter().cloned()).collect()
    }

    /// The declared condition catalog (name, kind) pairs.
    pub fn conditions(&self) -> impl Iterator<Item = &(String, ConditionKind)> {
        self.conditions.iter()
    }

    /// Whether `item_name`'s `old_state -> new_state` transition is a
    /// legitimate observation, optionally scoped to `group`.
    ///
    /// False when: the item is unknown; `old_state` or `new_state` is a
    /// rejected state; `new_state` is not among the item's declared states;
    /// or `group` is given and not among the item's declared groups.
    #[must_use]
    pub fn is_valid(
        &self,
        item_name: &str,
        old_state: &str,
        new_state: &str,
        group: Option<&str>,
    ) -> bool {
        let Some(item) = self.items.get(item_name) else {
            return false;
        };
        if self.rejected_states.contains(old_state) || self.rejected_states.contains(new_state) {
            return false;
        }
        if !item.states.contains(new_state) {
            return false;
        }
        if let Some(group) = group {
            if !item.groups.contains(group) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    {
      "items": [
        {"name": "front_door", "groups": "security", "states": ["open", "closed"]},
        {"name": "thermostat", "groups": ["hvac", "climate"], "states": ["on", "off"]}
      ],
      "conditions": [
        {"name": "outside_temp", "type": "temperature"},
        {"name": "clock", "type": "TIME_OF_DAY"}
      ],
      "rejected_states": ["unknown"]
    }
    "#;

    #[test]
    fn loads_and_validates() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        assert!(catalog.is_valid("front_door", "closed", "open", Some("security")));
        assert!(!catalog.is_valid("front_door", "closed", "open", Some("hvac")));
        assert!(!catalog.is_valid("unknown_item", "a", "b", None));
        assert!(!catalog.is_valid("front_door", "closed", "jammed", None));
        assert!(!catalog.is_valid("front_door", "unknown", "open", None));
    }

    #[test]
    fn groups_union() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        assert_eq!(
            catalog.groups(),
            BTreeSet::from(["security".to_string(), "hvac".to_string(), "climate".to_string()])
        );
    }

    #[test]
    fn rejects_unrecognized_condition_kind() {
        let bad = SAMPLE.replace("\"type\": \"temperature\"", "\"type\": \"humidity\"");
        let err = Catalog::from_json(&bad).unwrap_err();
        assert!(matches!(err, Error::Catalog(_)));
    }

    #[test]
    fn condition_kind_is_case_insensitive() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        let kinds: Vec<_> = catalog.conditions().map(|(_, k)| *k).collect();
        assert!(kinds.contains(&ConditionKind::TimeOfDay));
    }
}
