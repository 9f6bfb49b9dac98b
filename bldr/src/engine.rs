//! `Engine`: the single entry point external collaborators depend on
//! — a workspace/config parser constructs an [`EngineConfig`],
//! feeds targets and dependency edges through [`Engine::add_target`]/
//! [`Engine::add_dependency`], then calls [`Engine::run`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;

use bldr_cache::{CacheCoordinator, EvictionLimits};
use bldr_core::{EngineConfig, Target, TargetId};
use bldr_events::{EventDispatcher, EventPublisher};
use bldr_graph::{BuildGraph, Certificate, ValidationMode, Verifier};
use bldr_sandbox::SandboxExecutor;
use bldr_scheduler::{
    action::ActionBuilder, checkpoint::Checkpoint, resume, EchoActionBuilder, ResumeStrategy,
    RunReport, Scheduler,
};

pub struct Engine<P: EventPublisher + 'static> {
    graph: BuildGraph,
    config: EngineConfig,
    workspace_root: PathBuf,
    workspace_id: String,
    events: Arc<EventDispatcher<P>>,
    action_builder: Box<dyn ActionBuilder>,
}

impl<P: EventPublisher + 'static> Engine<P> {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        workspace_id: impl Into<String>,
        config: EngineConfig,
        publisher: P,
    ) -> Self {
        Engine {
            graph: BuildGraph::new(ValidationMode::Strict),
            config,
            workspace_root: workspace_root.into(),
            workspace_id: workspace_id.into(),
            events: Arc::new(EventDispatcher::new(publisher)),
            action_builder: Box::new(EchoActionBuilder),
        }
    }

    /// Swaps in a real language-handler action builder; the
    /// default echoes the target id, useful only for exercising the
    /// scheduler end to end.
    pub fn with_action_builder(mut self, builder: Box<dyn ActionBuilder>) -> Self {
        self.action_builder = builder;
        self
    }

    pub fn add_target(&mut self, target: Target) -> anyhow::Result<()> {
        self.graph.add_target(target).context("adding target")?;
        Ok(())
    }

    pub fn add_dependency(&mut self, from: &TargetId, to: &TargetId) -> anyhow::Result<()> {
        self.graph
            .add_dependency_by_id(from, to)
            .context("adding dependency edge")?;
        Ok(())
    }

    pub fn events(&self) -> Arc<EventDispatcher<P>> {
        Arc::clone(&self.events)
    }

    /// Proves acyclicity, hermeticity, determinism and race-freedom for the
    /// current graph and mints a [`Certificate`] signed with `signing_key`,
    /// without running anything. Determinism is checked against an empty
    /// history — a fresh `Engine` has no prior build results to cross-check,
    /// so that proof trivially holds until a caller supplies real records.
    pub fn verify(&self, signing_key: &[u8]) -> anyhow::Result<Certificate> {
        let cwd = self.workspace_root.to_string_lossy().into_owned();
        let mut specs = std::collections::HashMap::new();
        for node in self.graph.nodes() {
            let action = self.action_builder.build_action_for(&node.target, &cwd);
            specs.insert(node.target.id().clone(), action.spec);
        }
        let determinism_records = std::collections::HashMap::new();

        let proof = Verifier::verify(&self.graph, &specs, &determinism_records)
            .context("verifying build graph")?;
        Ok(Certificate::sign(proof, self.workspace_id.clone(), signing_key))
    }

    /// Validates the graph (runs a topological sort, promoting the graph
    /// to `Strict` mode) and executes it to completion.
    pub async fn run(self) -> anyhow::Result<RunReport> {
        let Engine {
            mut graph,
            config,
            workspace_root,
            workspace_id: _,
            action_builder,
            events,
        } = self;

        graph.validate().context("validating build graph")?;
        let cache = Self::open_cache_static(&workspace_root, &config, Arc::clone(&events))?;

        let scheduler = Arc::new(Scheduler::new(
            graph,
            cache,
            SandboxExecutor::default(),
            Arc::clone(&events),
            action_builder,
            config,
            workspace_root,
        ));

        Ok(scheduler.run().await)
    }

    fn open_cache_static(
        workspace_root: &PathBuf,
        config: &EngineConfig,
        events: Arc<EventDispatcher<P>>,
    ) -> anyhow::Result<CacheCoordinator<P>> {
        let cache_root = workspace_root.join(".builder-cache");
        let limits = EvictionLimits {
            max_entries: config.target_cache_limits.max_entries,
            max_total_bytes: if config.target_cache_limits.max_size_bytes == 0 {
                EvictionLimits::default().max_total_bytes
            } else {
                config.target_cache_limits.max_size_bytes
            },
            max_age: if config.target_cache_limits.max_age_days == 0 {
                EvictionLimits::default().max_age
            } else {
                Duration::from_secs(u64::from(config.target_cache_limits.max_age_days) * 86_400)
            },
        };
        CacheCoordinator::open(cache_root, config.signing_key.clone(), limits, events)
            .context("opening cache coordinator")
    }

    /// Loads a checkpoint from `<workspace>/.builder-cache/checkpoint.bin`
    /// if present and applies `strategy` before running.
    /// Falls back to a plain `run()` when no checkpoint exists.
    pub async fn resume(mut self, strategy: ResumeStrategy) -> anyhow::Result<RunReport> {
        let checkpoint_path = self.workspace_root.join(".builder-cache").join("checkpoint.bin");
        if checkpoint_path.is_file() {
            let checkpoint = Checkpoint::load(&checkpoint_path).context("loading checkpoint")?;
            let max_age = Duration::from_secs(self.config.max_checkpoint_age_secs);
            resume::apply(&checkpoint, &mut self.graph, strategy, max_age, SystemTime::now())
                .context("applying checkpoint to graph")?;
        }
        self.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bldr_core::TargetKind;
    use bldr_events::NullPublisher;

    #[tokio::test]
    async fn runs_two_independent_targets() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(
            dir.path(),
            "ws",
            EngineConfig {
                workers: 2,
                ..EngineConfig::default()
            },
            NullPublisher,
        );
        engine
            .add_target(Target::new("a", TargetKind::Library, "rust"))
            .unwrap();
        engine
            .add_target(Target::new("b", TargetKind::Library, "rust"))
            .unwrap();

        let report = engine.run().await.unwrap();
        assert_eq!(report.succeeded.len(), 2);
    }

    #[tokio::test]
    async fn rejects_cyclic_graph_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(dir.path(), "ws", EngineConfig::default(), NullPublisher);
        engine
            .add_target(Target::new("a", TargetKind::Library, "rust"))
            .unwrap();
        engine
            .add_target(Target::new("b", TargetKind::Library, "rust"))
            .unwrap();
        // Strict mode rejects the second edge outright, so build a
        // Deferred-mode cycle manually via the graph to exercise `run`'s
        // validation path instead.
        engine.graph = BuildGraph::new(ValidationMode::Deferred);
        engine
            .add_target(Target::new("a", TargetKind::Library, "rust"))
            .unwrap();
        engine
            .add_target(Target::new("b", TargetKind::Library, "rust"))
            .unwrap();
        engine
            .add_dependency(&"a".into(), &"b".into())
            .unwrap();
        engine
            .add_dependency(&"b".into(), &"a".into())
            .unwrap();

        assert!(engine.run().await.is_err());
    }

    #[test]
    fn verify_signs_a_certificate_for_an_acyclic_graph() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(dir.path(), "ws-verify", EngineConfig::default(), NullPublisher);
        engine
            .add_target(Target::new("a", TargetKind::Library, "rust"))
            .unwrap();
        engine
            .add_target(Target::new("b", TargetKind::Library, "rust"))
            .unwrap();
        engine.add_dependency(&"b".into(), &"a".into()).unwrap();

        let cert = engine.verify(b"test-key").unwrap();
        assert!(cert.verify(b"test-key").is_ok());
        assert!(cert.verify(b"wrong-key").is_err());
        assert_eq!(cert.proof.acyclicity.order.len(), 2);
    }
}
