//! The scheduler/executor: a coordinator that dispatches
//! `Pending` nodes whose dependencies are satisfied to up to `W` concurrent
//! workers, consulting the cache before invoking the sandbox, and
//! propagating failure per the configured fail-fast/keep-going policy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bldr_cache::{CacheCoordinator, FileMetadata};
use bldr_core::{BuildStatus, EngineConfig, TargetId};
use bldr_events::{EventDispatcher, EventPayload, EventPublisher};
use bldr_graph::BuildGraph;
use bldr_sandbox::{SandboxExecutor, SandboxSpec};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Semaphore};

use crate::action::ActionBuilder;
use crate::checkpoint::Checkpoint;
use crate::retry::RetryOrchestrator;

/// BuildNode.hash is already a transitive content hash computed by the
/// graph builder; the Target Cache's fast path keys on a metadata value
/// derived from it rather than raw file stats, which belong to the
/// external source-scanning collaborator.
fn synthetic_metadata(content_hash: &str) -> FileMetadata {
    let mut acc: i64 = 0;
    for (i, b) in content_hash.bytes().enumerate() {
        acc = acc.wrapping_add((b as i64) << (i % 24));
    }
    FileMetadata {
        size: content_hash.len() as u64,
        mtime_secs: acc,
    }
}

#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub succeeded: Vec<TargetId>,
    pub cached: Vec<TargetId>,
    pub failed: Vec<TargetId>,
    pub skipped: Vec<TargetId>,
}

enum WorkerOutcome {
    Cached(TargetId),
    Success(TargetId, String),
    Failed(TargetId, String),
}

/// The coordinator. Owns the graph under a lock shared with nothing else.
pub struct Scheduler<P: EventPublisher> {
    graph: SyncMutex<BuildGraph>,
    cache: CacheCoordinator<P>,
    executor: SandboxExecutor,
    retry: RetryOrchestrator,
    events: Arc<EventDispatcher<P>>,
    action_builder: Box<dyn ActionBuilder>,
    config: EngineConfig,
    workspace_root: PathBuf,
    checkpoint_path: PathBuf,
    cancelled: AtomicBool,
    last_checkpoint: SyncMutex<Instant>,
    checkpoint_interval: Duration,
    active: AtomicU32,
}

impl<P: EventPublisher + 'static> Scheduler<P> {
    pub fn new(
        graph: BuildGraph,
        cache: CacheCoordinator<P>,
        executor: SandboxExecutor,
        events: Arc<EventDispatcher<P>>,
        action_builder: Box<dyn ActionBuilder>,
        config: EngineConfig,
        workspace_root: PathBuf,
    ) -> Self {
        let checkpoint_path = workspace_root.join(".builder-cache").join("checkpoint.bin");
        Scheduler {
            graph: SyncMutex::new(graph),
            cache,
            executor,
            retry: RetryOrchestrator::default(),
            events,
            action_builder,
            config,
            workspace_root,
            checkpoint_path,
            cancelled: AtomicBool::new(false),
            last_checkpoint: SyncMutex::new(Instant::now()),
            checkpoint_interval: Duration::from_secs(5),
            active: AtomicU32::new(0),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Runs the build to completion: dispatch waves until the ready-queue
    /// is empty and no node is `Building`.
    pub async fn run(self: Arc<Self>) -> RunReport {
        self.events.emit(EventPayload::GraphBuildStarted {
            target_count: self.graph.lock().len(),
        });

        let workers = self.config.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerOutcome>();

        loop {
            if self.is_cancelled() {
                break;
            }

            let dispatched = self.dispatch_wave(&self, &semaphore, tx.clone());

            let no_active = self.active.load(Ordering::SeqCst) == 0;
            if dispatched == 0 && no_active {
                break;
            }

            if dispatched == 0 {
                match rx.recv().await {
                    Some(outcome) => self.apply_outcome(outcome),
                    None => break,
                }
            } else {
                while let Ok(outcome) = rx.try_recv() {
                    self.apply_outcome(outcome);
                }
            }

            self.maybe_checkpoint();
        }

        // Drain any outcomes from nodes that were already in flight when
        // cancellation or the final empty wave was observed.
        while self.active.load(Ordering::SeqCst) > 0 {
            match rx.recv().await {
                Some(outcome) => self.apply_outcome(outcome),
                None => break,
            }
        }

        self.write_checkpoint();
        let report = self.report();

        {
            let stats = self.graph.lock().stats();
            self.events.emit(EventPayload::GraphBuildCompleted {
                target_count: stats.total_nodes,
                edge_count: stats.total_edges,
            });
        }

        report
    }

    fn dispatch_wave(
        &self,
        me: &Arc<Self>,
        semaphore: &Arc<Semaphore>,
        tx: mpsc::UnboundedSender<WorkerOutcome>,
    ) -> usize {
        let ready_ids: Vec<TargetId> = {
            let mut graph = self.graph.lock();
            let available = semaphore.available_permits();
            let ids: Vec<TargetId> = graph
                .ready_nodes()
                .into_iter()
                .take(available)
                .map(|n| n.id().clone())
                .collect();
            for id in &ids {
                graph.node_mut(id).unwrap().status = BuildStatus::Building;
            }
            ids
        };

        for id in &ready_ids {
            self.events.emit(EventPayload::TargetStarted { target: id.clone() });
        }

        for id in ready_ids.iter().cloned() {
            let this = Arc::clone(me);
            let sem = Arc::clone(semaphore);
            let tx = tx.clone();
            self.active.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore not closed");
                let outcome = this.execute_one(&id).await;
                this.active.fetch_sub(1, Ordering::SeqCst);
                let _ = tx.send(outcome);
            });
        }

        ready_ids.len()
    }

    async fn execute_one(&self, id: &TargetId) -> WorkerOutcome {
        let (target, current_hash, dependency_hashes) = {
            let graph = self.graph.lock();
            let node = graph.node(id).expect("dispatched node exists");
            let dependency_hashes: HashMap<TargetId, String> = node
                .deps
                .iter()
                .filter_map(|dep| graph.node(dep).map(|n| (dep.clone(), n.hash.clone())))
                .collect();
            (node.target.clone(), node.hash.clone(), dependency_hashes)
        };

        let metadata = synthetic_metadata(&current_hash);
        if let Some(bytes) = self.cache.is_cached(id, metadata, &current_hash) {
            return match self.materialize(id, &bytes).await {
                Ok(()) => WorkerOutcome::Cached(id.clone()),
                Err(e) => WorkerOutcome::Failed(id.clone(), format!("materializing cached output: {e}")),
            };
        }

        let cwd = self
            .workspace_root
            .join(id.as_str().replace(|c| c == ':' || c == '/', "_"));
        let action = self
            .action_builder
            .build_action_for(&target, cwd.to_string_lossy().as_ref());

        let action_id = crate::action::ActionId::new(id.clone(), action.kind.clone(), current_hash.clone());
        let action_key = action_id.as_key();
        let mut action_metadata = HashMap::new();
        action_metadata.insert("command".to_string(), action.command.join(" "));

        if let Some(output_hashes) = self.cache.is_action_cached(&action_key, &action_metadata) {
            if let Some(output_hash) = output_hashes.first() {
                match self.cache.get_blob(output_hash) {
                    Ok(bytes) => {
                        return match self.materialize(id, &bytes).await {
                            Ok(()) => WorkerOutcome::Cached(id.clone()),
                            Err(e) => {
                                WorkerOutcome::Failed(id.clone(), format!("materializing cached output: {e}"))
                            }
                        };
                    }
                    Err(e) => {
                        tracing::warn!(target = %id, error = %e, "action cache hit but blob missing, rebuilding");
                    }
                }
            }
        }

        let result = self
            .retry
            .run(|| {
                let command = action.command.clone();
                let cwd = cwd.clone();
                let spec: SandboxSpec = action.spec.clone();
                async move {
                    self.executor
                        .execute(&command, &cwd, &spec)
                        .await
                        .map_err(|e| bldr_core::Error::System(e.to_string()))
                }
            })
            .await;

        match result {
            Ok(output) if output.exit_code == 0 => {
                let output_hash = match self.cache.update(
                    id.clone(),
                    current_hash,
                    metadata,
                    dependency_hashes,
                    &output.stdout,
                ) {
                    Ok(hash) => hash,
                    Err(e) => return WorkerOutcome::Failed(id.clone(), e.to_string()),
                };
                self.cache.record_action(
                    action_key,
                    &action_metadata,
                    vec![output_hash.clone()],
                    true,
                );
                WorkerOutcome::Success(id.clone(), output_hash)
            }
            Ok(output) => {
                self.cache.record_action(action_key, &action_metadata, vec![], false);
                WorkerOutcome::Failed(
                    id.clone(),
                    format!("exit code {}: {}", output.exit_code, String::from_utf8_lossy(&output.stderr)),
                )
            }
            Err(e) => WorkerOutcome::Failed(id.clone(), e.to_string()),
        }
    }

    /// Writes a cache-restored output blob to the target's declared output
    /// directory, the same directory a live build's sandbox would write
    /// into.
    async fn materialize(&self, id: &TargetId, bytes: &[u8]) -> std::io::Result<()> {
        let cwd = self
            .workspace_root
            .join(id.as_str().replace(|c| c == ':' || c == '/', "_"));
        tokio::fs::create_dir_all(&cwd).await?;
        tokio::fs::write(cwd.join("output"), bytes).await
    }

    fn apply_outcome(&self, outcome: WorkerOutcome) {
        let mut graph = self.graph.lock();
        match outcome {
            WorkerOutcome::Cached(id) => {
                if let Some(node) = graph.node_mut(&id) {
                    node.status = BuildStatus::Cached;
                }
            }
            WorkerOutcome::Success(id, hash) => {
                if let Some(node) = graph.node_mut(&id) {
                    node.status = BuildStatus::Success;
                    node.hash = hash.clone();
                }
                self.events.emit(EventPayload::TargetCompleted { target: id, hash });
            }
            WorkerOutcome::Failed(id, error) => {
                if let Some(node) = graph.node_mut(&id) {
                    node.status = BuildStatus::Failed;
                }
                drop(graph);
                self.events.emit(EventPayload::TargetFailed {
                    target: id,
                    error,
                });
                if self.config.fail_fast {
                    self.cancel();
                }
                return;
            }
        }
    }

    fn maybe_checkpoint(&self) {
        let mut last = self.last_checkpoint.lock();
        if last.elapsed() >= self.checkpoint_interval {
            *last = Instant::now();
            drop(last);
            self.write_checkpoint();
        }
    }

    fn write_checkpoint(&self) {
        let graph = self.graph.lock();
        let mut node_states = HashMap::new();
        let mut node_hashes = HashMap::new();
        let mut failed_ids = Vec::new();
        let mut completed = 0u32;
        let mut failed = 0u32;

        for node in graph.nodes() {
            node_states.insert(node.id().clone(), node.status);
            if !node.hash.is_empty() {
                node_hashes.insert(node.id().clone(), node.hash.clone());
            }
            match node.status {
                BuildStatus::Success | BuildStatus::Cached => completed += 1,
                BuildStatus::Failed => {
                    failed += 1;
                    failed_ids.push(node.id().clone());
                }
                _ => {}
            }
        }

        let checkpoint = Checkpoint {
            workspace: self.workspace_root.to_string_lossy().to_string(),
            timestamp_unix: unix_seconds(),
            total_targets: graph.len() as u32,
            completed_targets: completed,
            failed_targets: failed,
            node_states,
            node_hashes,
            failed_ids,
        };
        drop(graph);

        match checkpoint.save(&self.checkpoint_path) {
            Ok(()) => {
                let at = chrono::DateTime::from_timestamp(checkpoint.timestamp_unix, 0)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default();
                tracing::debug!(path = %self.checkpoint_path.display(), %at, "wrote checkpoint");
            }
            Err(e) => tracing::warn!(error = %e, "failed to write checkpoint"),
        }
    }

    fn report(&self) -> RunReport {
        let graph = self.graph.lock();
        let mut report = RunReport::default();
        for node in graph.nodes() {
            match node.status {
                BuildStatus::Success => report.succeeded.push(node.id().clone()),
                BuildStatus::Cached => report.cached.push(node.id().clone()),
                BuildStatus::Failed => report.failed.push(node.id().clone()),
                BuildStatus::Pending | BuildStatus::Building => {
                    report.skipped.push(node.id().clone());
                }
            }
        }
        report
    }
}

fn unix_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::EchoActionBuilder;
    use bldr_cache::EvictionLimits;
    use bldr_core::{Target, TargetKind};
    use bldr_events::NullPublisher;
    use bldr_graph::ValidationMode;

    fn target(name: &str) -> Target {
        Target::new(name, TargetKind::Library, "rust")
    }

    #[tokio::test]
    async fn runs_independent_targets_to_success() {
        let mut graph = BuildGraph::new(ValidationMode::Strict);
        graph.add_target(target("a")).unwrap();
        graph.add_target(target("b")).unwrap();
        graph.node_mut(&"a".into()).unwrap().hash = "hash-a".to_string();
        graph.node_mut(&"b".into()).unwrap().hash = "hash-b".to_string();

        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(EventDispatcher::new(NullPublisher));
        let cache = CacheCoordinator::open(
            dir.path().join("cache"),
            b"ws".to_vec(),
            EvictionLimits::default(),
            Arc::clone(&events),
        )
            .unwrap();

        let scheduler = Arc::new(Scheduler::new(
            graph,
            cache,
            SandboxExecutor::default(),
            events,
            Box::new(EchoActionBuilder),
            EngineConfig {
                workers: 2,
                ..EngineConfig::default()
            },
            dir.path().to_path_buf(),
        ));

        let report = scheduler.run().await;
        assert_eq!(report.succeeded.len(), 2);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn keep_going_skips_only_downstream_of_failure() {
        use crate::action::{ActionBuilder, BuildAction};
        use bldr_sandbox::SandboxSpecBuilder;

        struct FailingBuilder;
        impl ActionBuilder for FailingBuilder {
            fn build_action_for(&self, target: &Target, cwd: &str) -> BuildAction {
                let spec = SandboxSpecBuilder::create().output(cwd).build().unwrap();
                let command = if target.id().as_str() == "b" {
                    vec!["sh".to_string(), "-c".to_string(), "exit 1".to_string()]
                } else {
                    vec!["sh".to_string(), "-c".to_string(), "true".to_string()]
                };
                BuildAction {
                    kind: "test".to_string(),
                    command,
                    spec,
                }
            }
        }

        let mut graph = BuildGraph::new(ValidationMode::Strict);
        graph.add_target(target("a")).unwrap();
        graph.add_target(target("b")).unwrap();
        graph.add_target(target("c")).unwrap();
        graph.add_dependency_by_id(&"c".into(), &"b".into()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(EventDispatcher::new(NullPublisher));
        let cache = CacheCoordinator::open(
            dir.path().join("cache"),
            b"ws".to_vec(),
            EvictionLimits::default(),
            Arc::clone(&events),
        )
            .unwrap();

        let scheduler = Arc::new(Scheduler::new(
            graph,
            cache,
            SandboxExecutor::default(),
            events,
            Box::new(FailingBuilder),
            EngineConfig {
                workers: 2,
                fail_fast: false,
                ..EngineConfig::default()
            },
            dir.path().to_path_buf(),
        ));

        let report = scheduler.run().await;
        assert!(report.succeeded.contains(&"a".into()));
        assert!(report.failed.contains(&"b".into()));
        assert!(report.skipped.contains(&"c".into()));
    }
}
