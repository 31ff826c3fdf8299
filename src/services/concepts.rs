//! Concept graph built from memory hooks.
//!
//! Every hook on a stored memory becomes a concept node linked to that
//! memory. Hooks recorded together are related as `co-occurs`. Nodes live
//! in the `concepts` collection next to the memory collections.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use remind_models::{concept_id, Concept, CO_OCCURS};
use remind_storage::RecordStore;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const CONCEPT_COLLECTION: &str = "concepts";

/// Directed relationship between two concepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptEdge {
    pub source: String,
    pub target: String,
    pub relationship: String,
}

/// Snapshot of the whole graph. Edges only connect existing nodes.
#[derive(Debug, Clone, Default)]
pub struct GraphView {
    pub nodes: Vec<Concept>,
    pub edges: Vec<ConceptEdge>,
}

#[derive(Debug, Clone)]
pub struct ConceptGraph {
    records: RecordStore,
}

impl ConceptGraph {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            records: RecordStore::new(root),
        }
    }

    pub async fn get(&self, name: &str) -> Result<Option<Concept>> {
        let Some(id) = concept_id(name) else {
            return Ok(None);
        };
        Ok(self.records.load(CONCEPT_COLLECTION, &id).await?)
    }

    async fn get_or_new(&self, name: &str) -> Result<Concept> {
        if let Some(concept) = self.get(name).await? {
            return Ok(concept);
        }
        Concept::new(name)
            .ok_or_else(|| Error::InvalidInput(format!("'{}' is not a usable concept name", name)))
    }

    async fn save(&self, concept: &Concept) -> Result<()> {
        self.records.save(CONCEPT_COLLECTION, concept).await?;
        Ok(())
    }

    /// Load or create a concept, apply `change`, and save it.
    pub async fn update<F>(&self, name: &str, change: F) -> Result<Concept>
    where
        F: FnOnce(&mut Concept),
    {
        let mut concept = self.get_or_new(name).await?;
        change(&mut concept);
        self.save(&concept).await?;
        Ok(concept)
    }

    /// Link a memory to the concepts for its hooks and relate those
    /// concepts to each other. Returns the ids of the touched concepts.
    pub async fn record_memory(
        &self,
        memory_id: &str,
        hooks: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let names: BTreeMap<String, &String> = hooks
            .iter()
            .filter_map(|hook| concept_id(hook).map(|id| (id, hook)))
            .collect();

        for (id, hook) in &names {
            let mut concept = self.get_or_new(hook).await?;
            concept.add_tag(hook);
            for (other_id, other) in &names {
                if other_id != id {
                    concept.relate_to(other, CO_OCCURS);
                }
            }
            concept.link_memory(memory_id);
            self.save(&concept).await?;
        }

        let touched: Vec<String> = names.into_keys().collect();
        debug!(memory_id, concepts = ?touched, "Concepts linked");
        Ok(touched)
    }

    /// Every concept, sorted by name.
    pub async fn list(&self) -> Result<Vec<Concept>> {
        let mut concepts: Vec<Concept> = self.records.load_all(CONCEPT_COLLECTION).await?;
        concepts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(concepts)
    }

    /// Concepts whose name, tags or traits contain `query`, most linked first.
    pub async fn search(&self, query: &str) -> Result<Vec<Concept>> {
        let mut found: Vec<Concept> = self
            .list()
            .await?
            .into_iter()
            .filter(|concept| concept.matches(query))
            .collect();
        found.sort_by(|a, b| {
            b.linked_memories
                .len()
                .cmp(&a.linked_memories.len())
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(found)
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        let Some(id) = concept_id(name) else {
            return Ok(false);
        };
        Ok(self.records.delete(CONCEPT_COLLECTION, &id).await?)
    }

    /// Fold `secondary` into `primary` and delete `secondary`.
    ///
    /// Relations other concepts held to `secondary` are moved to `primary`.
    pub async fn merge(&self, primary: &str, secondary: &str) -> Result<Concept> {
        let mut kept = self
            .get(primary)
            .await?
            .ok_or_else(|| Error::NotFound(format!("concept {}", primary)))?;
        let merged = self
            .get(secondary)
            .await?
            .ok_or_else(|| Error::NotFound(format!("concept {}", secondary)))?;
        if kept.id == merged.id {
            return Err(Error::InvalidInput(format!(
                "cannot merge concept {} into itself",
                kept.id
            )));
        }

        kept.absorb(&merged);
        self.save(&kept).await?;
        self.records.delete(CONCEPT_COLLECTION, &merged.id).await?;

        for mut concept in self.list().await? {
            if concept.id == kept.id {
                continue;
            }
            let Some(relation) = concept.related.remove(&merged.id) else {
                continue;
            };
            concept.related.entry(kept.id.clone()).or_insert(relation);
            self.save(&concept).await?;
        }

        info!(primary = %kept.id, merged = %merged.id, "Concepts merged");
        Ok(kept)
    }

    /// Remove links to deleted memories. Returns how many concepts changed.
    pub async fn unlink_memories(&self, memory_ids: &[String]) -> Result<usize> {
        if memory_ids.is_empty() {
            return Ok(0);
        }

        let mut changed = 0;
        for mut concept in self.list().await? {
            if concept.unlink_memories(memory_ids) {
                self.save(&concept).await?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    pub async fn graph(&self) -> Result<GraphView> {
        let nodes = self.list().await?;
        let known: BTreeSet<&str> = nodes.iter().map(|c| c.id.as_str()).collect();

        let edges = nodes
            .iter()
            .flat_map(|concept| {
                concept.related.iter().map(|(target, relationship)| ConceptEdge {
                    source: concept.id.clone(),
                    target: target.clone(),
                    relationship: relationship.clone(),
                })
            })
            .filter(|edge| known.contains(edge.target.as_str()))
            .collect();

        Ok(GraphView { nodes, edges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn graph() -> (TempDir, ConceptGraph) {
        let dir = TempDir::new().unwrap();
        let graph = ConceptGraph::new(dir.path());
        (dir, graph)
    }

    fn hooks(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_record_memory_links_and_relates() {
        let (_dir, graph) = graph();
        let touched = graph
            .record_memory("episodic_1", &hooks(&["garden", "roses"]))
            .await
            .unwrap();
        assert_eq!(touched, vec!["garden", "roses"]);

        graph
            .record_memory("episodic_2", &hooks(&["garden"]))
            .await
            .unwrap();

        let garden = graph.get("Garden").await.unwrap().unwrap();
        assert_eq!(garden.linked_memories, vec!["episodic_1", "episodic_2"]);
        assert_eq!(garden.related["roses"], CO_OCCURS);
        assert!(garden.tags.contains("garden"));

        let roses = graph.get("roses").await.unwrap().unwrap();
        assert_eq!(roses.related["garden"], CO_OCCURS);
        assert_eq!(roses.linked_memories, vec!["episodic_1"]);
    }

    #[tokio::test]
    async fn test_search_orders_by_links() {
        let (_dir, graph) = graph();
        graph
            .record_memory("episodic_1", &hooks(&["blue", "blue whale"]))
            .await
            .unwrap();
        graph
            .record_memory("episodic_2", &hooks(&["blue whale"]))
            .await
            .unwrap();

        let found = graph.search("BLUE").await.unwrap();
        let names: Vec<&str> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["blue whale", "blue"]);
        assert!(graph.search("walrus").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_sets_type_and_traits() {
        let (_dir, graph) = graph();
        graph
            .update("Whiskers", |c| {
                c.set_type("pet");
                c.add_trait("likes", "fish");
            })
            .await
            .unwrap();

        let whiskers = graph.get("whiskers").await.unwrap().unwrap();
        assert_eq!(whiskers.concept_type, "pet");
        assert_eq!(whiskers.traits["likes"], vec!["fish".to_string()]);
        assert!(graph.search("fish").await.unwrap().len() == 1);

        assert!(matches!(
            graph.update("!!!", |_| {}).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_merge_moves_links_and_relations() {
        let (_dir, graph) = graph();
        graph
            .record_memory("episodic_1", &hooks(&["cat", "fish"]))
            .await
            .unwrap();
        graph
            .record_memory("episodic_2", &hooks(&["kitty", "sofa"]))
            .await
            .unwrap();

        let merged = graph.merge("cat", "kitty").await.unwrap();
        assert_eq!(merged.linked_memories, vec!["episodic_1", "episodic_2"]);
        assert_eq!(merged.related["sofa"], CO_OCCURS);
        assert!(graph.get("kitty").await.unwrap().is_none());

        let sofa = graph.get("sofa").await.unwrap().unwrap();
        assert!(sofa.related.contains_key("cat"));
        assert!(!sofa.related.contains_key("kitty"));

        assert!(matches!(
            graph.merge("cat", "kitty").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            graph.merge("cat", "Cat").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_unlink_and_graph_view() {
        let (_dir, graph) = graph();
        graph
            .record_memory("episodic_1", &hooks(&["garden", "roses"]))
            .await
            .unwrap();
        graph
            .record_memory("episodic_2", &hooks(&["garden"]))
            .await
            .unwrap();

        let changed = graph
            .unlink_memories(&["episodic_1".to_string()])
            .await
            .unwrap();
        assert_eq!(changed, 2);
        let garden = graph.get("garden").await.unwrap().unwrap();
        assert_eq!(garden.linked_memories, vec!["episodic_2"]);

        assert!(graph.delete("roses").await.unwrap());
        let view = graph.graph().await.unwrap();
        assert_eq!(view.nodes.len(), 1);
        // garden still relates to the deleted node, but the edge is hidden
        assert!(view.edges.is_empty());
    }

    #[tokio::test]
    async fn test_empty_graph() {
        let (_dir, graph) = graph();
        assert!(graph.list().await.unwrap().is_empty());
        assert!(graph.get("anything").await.unwrap().is_none());
        assert!(!graph.delete("anything").await.unwrap());
        let view = graph.graph().await.unwrap();
        assert!(view.nodes.is_empty() && view.edges.is_empty());
    }
}
