use std::collections::BTreeMap;

use bldr_core::{Target, TargetId};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::graph::{BuildGraph, GraphError};

/// A runtime announcement of new outputs/targets from an already-executing
/// node. Carries everything `apply_discoveries` needs to merge
/// one discovered unit of work into the graph. `id` lets a caller correlate
/// a discovery with the events it produced even after the journal draining
/// that consumes it.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub id: Uuid,
    pub origin: TargetId,
    pub outputs: Vec<String>,
    pub new_targets: Vec<Target>,
    pub new_dependent_edges: Vec<(TargetId, TargetId)>,
    pub metadata: BTreeMap<String, String>,
}

impl Discovery {
    pub fn new(origin: TargetId) -> Self {
        Discovery {
            id: Uuid::new_v4(),
            origin,
            outputs: Vec::new(),
            new_targets: Vec::new(),
            new_dependent_edges: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// A [`BuildGraph`] that can be extended at runtime. Discoveries are
/// appended to a journal during execution; [`Self::apply_discoveries`]
/// transactionally merges the whole journal, rolling back entirely if the
/// merge would introduce a cycle.
pub struct DynamicBuildGraph {
    graph: Mutex<BuildGraph>,
    journal: Mutex<Vec<Discovery>>,
    discoverable: Mutex<Vec<TargetId>>,
}

impl DynamicBuildGraph {
    pub fn new(graph: BuildGraph) -> Self {
        DynamicBuildGraph {
            graph: Mutex::new(graph),
            journal: Mutex::new(Vec::new()),
            discoverable: Mutex::new(Vec::new()),
        }
    }

    pub fn with_graph<R>(&self, f: impl FnOnce(&BuildGraph) -> R) -> R {
        f(&self.graph.lock())
    }

    pub fn with_graph_mut<R>(&self, f: impl FnOnce(&mut BuildGraph) -> R) -> R {
        f(&mut self.graph.lock())
    }

    pub fn record_discovery(&self, discovery: Discovery) {
        self.discoverable.lock().push(discovery.origin.clone());
        self.journal.lock().push(discovery);
    }

    pub fn discoverable_targets(&self) -> Vec<TargetId> {
        self.discoverable.lock().clone()
    }

    /// Drains the journal and merges every pending discovery into the graph
    /// under a single lock. On success, returns the newly added nodes for
    /// the scheduler to pick up. On failure (a merge would create a cycle),
    /// the graph is left untouched and the journal is *not* drained, so a
    /// caller may fix up the offending discovery and retry.
    pub fn apply_discoveries(&self) -> Result<Vec<TargetId>, GraphError> {
        let mut graph = self.graph.lock();
        let mut journal = self.journal.lock();

        if journal.is_empty() {
            return Ok(Vec::new());
        }

        // Work on a scratch copy so a failed merge never mutates the real graph.
        let mut scratch = clone_graph(&graph);
        let mut added = Vec::new();

        for discovery in journal.iter() {
            for target in &discovery.new_targets {
                if !scratch.contains(target.id()) {
                    scratch.add_target(target.clone())?;
                    added.push(target.id().clone());
                }
            }
            for (from, to) in &discovery.new_dependent_edges {
                scratch.add_dependency_by_id(from, to)?;
            }
        }

        // Acyclicity validation: any merge that introduces a cycle fails the
        // whole transaction, regardless of validation mode.
        scratch.topological_sort()?;

        *graph = scratch;
        journal.clear();
        Ok(added)
    }
}

fn clone_graph(graph: &BuildGraph) -> BuildGraph {
    let mut copy = BuildGraph::new(graph.mode());
    for node in graph.nodes() {
        copy.add_target(node.target.clone()).expect("fresh copy");
    }
    for node in graph.nodes() {
        for dep in &node.deps {
            copy.add_dependency_by_id(node.id(), dep)
                .expect("edges from a valid graph stay valid");
        }
    }
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ValidationMode;
    use bldr_core::TargetKind;

    #[test]
    fn merges_discoveries_and_stays_acyclic() {
        let mut g = BuildGraph::new(ValidationMode::Strict);
        g.add_target(Target::new("proto", TargetKind::Library, "proto"))
            .unwrap();
        let dyn_graph = DynamicBuildGraph::new(g);

        let mut discovery = Discovery::new("proto".into());
        discovery
            .new_targets
            .push(Target::new("proto-gen-cpp", TargetKind::Library, "cpp"));
        discovery
            .new_dependent_edges
            .push(("proto-gen-cpp".into(), "proto".into()));
        dyn_graph.record_discovery(discovery);

        let added = dyn_graph.apply_discoveries().unwrap();
        assert_eq!(added, vec![TargetId::from("proto-gen-cpp")]);
        dyn_graph.with_graph(|g| {
            assert_eq!(g.len(), 2);
            assert!(g.topological_sort().is_ok());
        });
    }

    #[test]
    fn rejects_merge_that_would_cycle() {
        let mut g = BuildGraph::new(ValidationMode::Strict);
        g.add_target(Target::new("a", TargetKind::Library, "rust"))
            .unwrap();
        g.add_target(Target::new("b", TargetKind::Library, "rust"))
            .unwrap();
        g.add_dependency_by_id(&"a".into(), &"b".into()).unwrap();
        let dyn_graph = DynamicBuildGraph::new(g);

        let mut discovery = Discovery::new("b".into());
        discovery
            .new_dependent_edges
            .push(("b".into(), "a".into()));
        dyn_graph.record_discovery(discovery);

        assert!(dyn_graph.apply_discoveries().is_err());
        // Journal retained, graph untouched.
        dyn_graph.with_graph(|g| assert_eq!(g.len(), 2));
    }
}
