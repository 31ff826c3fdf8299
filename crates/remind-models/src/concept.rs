//! Concept nodes: recurring subjects linked to the memories that mention
//! them and to each other.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::now;

/// Relationship recorded between hooks that appear in the same exchange.
pub const CO_OCCURS: &str = "co-occurs";

const UNKNOWN_TYPE: &str = "unknown";

/// Longest concept id; long names are truncated.
const MAX_ID_LEN: usize = 64;

/// File-safe id for a concept name: lowercase ASCII alphanumerics with runs
/// of anything else collapsed to `-`.
///
/// Returns `None` when nothing usable is left.
pub fn concept_id(name: &str) -> Option<String> {
    let mut id = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c);
        } else if !id.is_empty() && !id.ends_with('-') {
            id.push('-');
        }
    }

    let id: String = id.chars().take(MAX_ID_LEN).collect();
    let id = id.trim_end_matches('-');
    (!id.is_empty()).then(|| id.to_string())
}

fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// A node in the concept graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    pub name: String,
    /// Category such as `person` or `food`; `unknown` until set
    #[serde(rename = "type")]
    pub concept_type: String,
    /// Attribute name to values, e.g. `likes` -> `["fish"]`
    #[serde(default)]
    pub traits: BTreeMap<String, Vec<String>>,
    /// Related concept id to relationship
    #[serde(default)]
    pub related: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Memory ids mentioning this concept, oldest link first
    #[serde(default)]
    pub linked_memories: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Concept {
    /// A fresh concept, or `None` for names without usable characters.
    pub fn new(name: &str) -> Option<Self> {
        let id = concept_id(name)?;
        let timestamp = now();
        Some(Self {
            id,
            name: normalize(name),
            concept_type: UNKNOWN_TYPE.to_string(),
            traits: BTreeMap::new(),
            related: BTreeMap::new(),
            tags: BTreeSet::new(),
            linked_memories: Vec::new(),
            created_at: timestamp,
            updated_at: timestamp,
        })
    }

    pub fn has_known_type(&self) -> bool {
        self.concept_type != UNKNOWN_TYPE
    }

    pub fn set_type(&mut self, concept_type: &str) {
        let concept_type = normalize(concept_type);
        if !concept_type.is_empty() {
            self.concept_type = concept_type;
            self.touch();
        }
    }

    /// Add a trait value. Repeated values are kept once.
    pub fn add_trait(&mut self, key: &str, value: &str) {
        let (key, value) = (normalize(key), value.trim().to_string());
        if key.is_empty() || value.is_empty() {
            return;
        }
        let values = self.traits.entry(key).or_default();
        if !values.contains(&value) {
            values.push(value);
            self.touch();
        }
    }

    pub fn add_tag(&mut self, tag: &str) {
        let tag = normalize(tag);
        if !tag.is_empty() && self.tags.insert(tag) {
            self.touch();
        }
    }

    /// Record or replace the relationship to another concept. Relations to
    /// itself are ignored.
    pub fn relate_to(&mut self, other: &str, relation: &str) {
        let (Some(other), relation) = (concept_id(other), normalize(relation)) else {
            return;
        };
        if other == self.id || relation.is_empty() {
            return;
        }
        if self.related.get(&other) != Some(&relation) {
            self.related.insert(other, relation);
            self.touch();
        }
    }

    pub fn link_memory(&mut self, memory_id: &str) {
        if !self.linked_memories.iter().any(|id| id == memory_id) {
            self.linked_memories.push(memory_id.to_string());
            self.touch();
        }
    }

    /// Drop links to the given memories. Returns whether anything changed.
    pub fn unlink_memories(&mut self, memory_ids: &[String]) -> bool {
        let before = self.linked_memories.len();
        self.linked_memories.retain(|id| !memory_ids.contains(id));
        let changed = self.linked_memories.len() != before;
        if changed {
            self.touch();
        }
        changed
    }

    /// Fold `other` into this concept.
    ///
    /// Traits, tags and memory links are unioned. Existing relationships win
    /// over the other concept's, and the type is only taken when this
    /// concept's is still unknown. Relations between the two are dropped.
    pub fn absorb(&mut self, other: &Concept) {
        for (key, values) in &other.traits {
            for value in values {
                self.add_trait(key, value);
            }
        }
        for tag in &other.tags {
            self.add_tag(tag);
        }
        for (related, relation) in &other.related {
            if related != &self.id && !self.related.contains_key(related) {
                self.related.insert(related.clone(), relation.clone());
            }
        }
        self.related.remove(&other.id);
        for memory_id in &other.linked_memories {
            self.link_memory(memory_id);
        }
        if !self.has_known_type() && other.has_known_type() {
            self.concept_type = other.concept_type.clone();
        }
        self.touch();
    }

    /// Case-insensitive substring match on name, tags and traits.
    pub fn matches(&self, query: &str) -> bool {
        let query = normalize(query);
        if query.is_empty() {
            return false;
        }

        self.name.contains(&query)
            || self.tags.iter().any(|tag| tag.contains(&query))
            || self.traits.iter().any(|(key, values)| {
                key.contains(&query)
                    || values.iter().any(|v| v.to_lowercase().contains(&query))
            })
    }

    fn touch(&mut self) {
        self.updated_at = now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concept_id() {
        assert_eq!(concept_id("Favorite Color").as_deref(), Some("favorite-color"));
        assert_eq!(concept_id("  rock & roll! ").as_deref(), Some("rock-roll"));
        assert_eq!(concept_id("C++").as_deref(), Some("c"));
        assert_eq!(concept_id("???"), None);
        assert_eq!(concept_id(&"a".repeat(100)).map(|id| id.len()), Some(MAX_ID_LEN));
    }

    #[test]
    fn test_relations_skip_self() {
        let mut garden = Concept::new("Garden").unwrap();
        garden.relate_to("garden", CO_OCCURS);
        assert!(garden.related.is_empty());

        garden.relate_to("Roses", CO_OCCURS);
        garden.relate_to("roses", "grows");
        assert_eq!(garden.related.get("roses").map(String::as_str), Some("grows"));
    }

    #[test]
    fn test_absorb_keeps_existing_relations() {
        let mut cat = Concept::new("cat").unwrap();
        cat.relate_to("fish", "eats");
        cat.link_memory("episodic_1");

        let mut kitty = Concept::new("kitty").unwrap();
        kitty.set_type("animal");
        kitty.add_trait("likes", "naps");
        kitty.add_tag("pet");
        kitty.relate_to("fish", CO_OCCURS);
        kitty.relate_to("cat", "alias");
        kitty.relate_to("sofa", CO_OCCURS);
        kitty.link_memory("episodic_1");
        kitty.link_memory("episodic_2");

        cat.absorb(&kitty);
        assert_eq!(cat.concept_type, "animal");
        assert_eq!(cat.traits["likes"], vec!["naps".to_string()]);
        assert!(cat.tags.contains("pet"));
        assert_eq!(cat.related["fish"], "eats");
        assert_eq!(cat.related["sofa"], CO_OCCURS);
        assert!(!cat.related.contains_key("cat"));
        assert!(!cat.related.contains_key("kitty"));
        assert_eq!(cat.linked_memories, vec!["episodic_1", "episodic_2"]);
    }

    #[test]
    fn test_matches_name_tags_and_traits() {
        let mut concept = Concept::new("Lisbon").unwrap();
        concept.add_tag("travel");
        concept.add_trait("visited", "May 2024");

        assert!(concept.matches("LISB"));
        assert!(concept.matches("travel"));
        assert!(concept.matches("may"));
        assert!(!concept.matches("porto"));
        assert!(!concept.matches("   "));
    }
}
