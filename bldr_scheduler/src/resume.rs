//! Resume planning: decides, from a loaded [`Checkpoint`],
//! which nodes of a fresh [`BuildGraph`] get to skip rebuilding.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bldr_core::BuildStatus;
use bldr_graph::BuildGraph;
use thiserror::Error;

use crate::checkpoint::Checkpoint;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResumeError {
    #[error("checkpoint is older than the allowed maximum age")]
    TooOld,
    #[error("checkpoint does not match the current graph")]
    GraphMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeStrategy {
    RetryFailed,
    SkipFailed,
    RebuildAll,
    Smart,
}

impl Default for ResumeStrategy {
    fn default() -> Self {
        ResumeStrategy::Smart
    }
}

/// `graph.nodes.size == totalTargets` and every checkpointed key must exist
/// in the graph — a later-added target invalidates the snapshot.
pub fn is_valid(checkpoint: &Checkpoint, graph: &BuildGraph) -> bool {
    if graph.len() != checkpoint.total_targets as usize {
        return false;
    }
    checkpoint.node_states.keys().all(|id| graph.contains(id))
}

pub fn is_expired(checkpoint: &Checkpoint, max_age: Duration, now: SystemTime) -> bool {
    let checkpoint_time = UNIX_EPOCH + Duration::from_secs(checkpoint.timestamp_unix.max(0) as u64);
    now.duration_since(checkpoint_time).unwrap_or(Duration::ZERO) > max_age
}

/// Copies `Success`/`Cached` statuses and their hashes onto `graph`.
/// `Failed` and `Pending` entries are left `Pending` so they retry.
pub fn merge_with(checkpoint: &Checkpoint, graph: &mut BuildGraph) {
    for (id, status) in &checkpoint.node_states {
        if !status.is_satisfied() {
            continue;
        }
        if let Some(node) = graph.node_mut(id) {
            node.status = *status;
            if let Some(hash) = checkpoint.node_hashes.get(id) {
                node.hash = hash.clone();
            }
        }
    }
}

/// Applies `strategy` to `graph` using `checkpoint`, after validating age
/// and graph-shape compatibility. Returns the number of nodes restored to
/// a non-`Pending` status.
pub fn apply(
    checkpoint: &Checkpoint,
    graph: &mut BuildGraph,
    strategy: ResumeStrategy,
    max_age: Duration,
    now: SystemTime,
) -> Result<usize, ResumeError> {
    if strategy == ResumeStrategy::RebuildAll {
        return Ok(0);
    }
    if is_expired(checkpoint, max_age, now) {
        return Err(ResumeError::TooOld);
    }
    if !is_valid(checkpoint, graph) {
        return Err(ResumeError::GraphMismatch);
    }

    match strategy {
        ResumeStrategy::RebuildAll => unreachable!("handled above"),
        ResumeStrategy::SkipFailed => {
            for (id, status) in &checkpoint.node_states {
                if let Some(node) = graph.node_mut(id) {
                    node.status = *status;
                    if let Some(hash) = checkpoint.node_hashes.get(id) {
                        node.hash = hash.clone();
                    }
                }
            }
            Ok(checkpoint.node_states.len())
        }
        ResumeStrategy::RetryFailed => {
            merge_with(checkpoint, graph);
            Ok(checkpoint
                .node_states
                .values()
                .filter(|s| s.is_satisfied())
                .count())
        }
        ResumeStrategy::Smart => {
            // Like RetryFailed, but a dependency whose recorded hash no
            // longer matches its live node hash invalidates the downstream
            // skip — conservatively fall back to Pending so it rebuilds.
            let mut restored = 0;
            for (id, status) in &checkpoint.node_states {
                if !status.is_satisfied() {
                    continue;
                }
                let recorded_hash = checkpoint.node_hashes.get(id);
                let deps_unchanged = graph
                    .node(id)
                    .map(|n| {
                        n.deps.iter().all(|dep| {
                            checkpoint
                                .node_states
                                .get(dep)
                                .map(|s| s.is_satisfied())
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false);

                if !deps_unchanged {
                    continue;
                }
                if let Some(node) = graph.node_mut(id) {
                    node.status = *status;
                    if let Some(hash) = recorded_hash {
                        node.hash = hash.clone();
                    }
                    restored += 1;
                }
            }
            Ok(restored)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bldr_graph::ValidationMode;
    use bldr_core::{Target, TargetId, TargetKind};
    use std::collections::HashMap;

    fn target(name: &str) -> Target {
        Target::new(name, TargetKind::Library, "rust")
    }

    fn graph_with_four_targets() -> BuildGraph {
        let mut g = BuildGraph::new(ValidationMode::Strict);
        g.add_target(target("t1")).unwrap();
        g.add_target(target("t2")).unwrap();
        g.add_target(target("t3")).unwrap();
        g.add_target(target("t4")).unwrap();
        g.add_dependency_by_id(&"t2".into(), &"t1".into()).unwrap();
        g.add_dependency_by_id(&"t3".into(), &"t2".into()).unwrap();
        g
    }

    fn checkpoint_fail_on_third() -> Checkpoint {
        let mut node_states = HashMap::new();
        node_states.insert(TargetId::new("t1"), BuildStatus::Success);
        node_states.insert(TargetId::new("t2"), BuildStatus::Success);
        node_states.insert(TargetId::new("t3"), BuildStatus::Failed);
        node_states.insert(TargetId::new("t4"), BuildStatus::Pending);
        let mut node_hashes = HashMap::new();
        node_hashes.insert(TargetId::new("t1"), "h1".to_string());
        node_hashes.insert(TargetId::new("t2"), "h2".to_string());
        Checkpoint {
            workspace: "/ws".to_string(),
            timestamp_unix: 1_700_000_000,
            total_targets: 4,
            completed_targets: 2,
            failed_targets: 1,
            node_states,
            node_hashes,
            failed_ids: vec![TargetId::new("t3")],
        }
    }

    #[test]
    fn checkpoint_roundtrip_matches_expected_counts() {
        let ckpt = checkpoint_fail_on_third();
        assert_eq!(ckpt.completed_targets, 2);
        assert_eq!(ckpt.failed_ids, vec![TargetId::new("t3")]);
    }

    #[test]
    fn retry_failed_restores_successes_only() {
        let mut graph = graph_with_four_targets();
        let ckpt = checkpoint_fail_on_third();
        let restored = apply(
            &ckpt,
            &mut graph,
            ResumeStrategy::RetryFailed,
            Duration::from_secs(3600),
            UNIX_EPOCH + Duration::from_secs(1_700_000_100),
        )
            .unwrap();
        assert_eq!(restored, 2);
        assert_eq!(graph.node(&"t1".into()).unwrap().status, BuildStatus::Success);
        assert_eq!(graph.node(&"t3".into()).unwrap().status, BuildStatus::Pending);
        let ready: Vec<_> = graph.ready_nodes().iter().map(|n| n.id().clone()).collect();
        assert!(ready.contains(&"t3".into()));
    }

    #[test]
    fn too_old_checkpoint_is_rejected() {
        let mut graph = graph_with_four_targets();
        let ckpt = checkpoint_fail_on_third();
        let err = apply(
            &ckpt,
            &mut graph,
            ResumeStrategy::RetryFailed,
            Duration::from_secs(10),
            UNIX_EPOCH + Duration::from_secs(1_700_010_000),
        );
        assert_eq!(err, Err(ResumeError::TooOld));
    }

    #[test]
    fn mismatched_graph_shape_is_rejected() {
        let mut graph = BuildGraph::new(ValidationMode::Strict);
        graph.add_target(target("only-one")).unwrap();
        let ckpt = checkpoint_fail_on_third();
        let err = apply(
            &ckpt,
            &mut graph,
            ResumeStrategy::RetryFailed,
            Duration::from_secs(3600),
            UNIX_EPOCH + Duration::from_secs(1_700_000_100),
        );
        assert_eq!(err, Err(ResumeError::GraphMismatch));
    }

    #[test]
    fn rebuild_all_ignores_checkpoint() {
        let mut graph = graph_with_four_targets();
        let ckpt = checkpoint_fail_on_third();
        let restored = apply(
            &ckpt,
            &mut graph,
            ResumeStrategy::RebuildAll,
            Duration::from_secs(1),
            UNIX_EPOCH,
        )
            .unwrap();
        assert_eq!(restored, 0);
        assert_eq!(graph.node(&"t1".into()).unwrap().status, BuildStatus::Pending);
    }
}
