//! Facade crate: wires the graph, cache, sandbox, scheduler and event
//! subsystems behind a single [`Engine`] entry point. Nothing
//! in this crate talks to a terminal, parses flags, or invokes a language
//! toolchain directly — those are external collaborators' jobs.

pub mod cloud;
pub mod engine;

pub use bldr_cache::{CacheCoordinator, CacheStats, EvictionLimits, GcReport};
pub use bldr_core::{EngineConfig, Error, ErrorCategory, Target, TargetId, TargetKind};
pub use bldr_events::{EventDispatcher, EventPayload, EventPublisher, NullPublisher};
pub use bldr_graph::{
    AcyclicityProof, BuildGraph, Certificate, DeterminismProof, DeterminismRecord, GraphError,
    HermeticityProof, Proof, RaceFreedomProof, ValidationMode, VerifyError, Verifier,
};
pub use bldr_sandbox::{
    NetworkPolicy, ProcessPolicy, ResourceLimits, SandboxExecutor, SandboxSpec, SandboxSpecBuilder,
};
pub use bldr_scheduler::{
    ActionBuilder, BuildAction, Checkpoint, CheckpointError, EchoActionBuilder, ResumeStrategy,
    RetryOrchestrator, RetryPolicy, RetryStats, RunReport, Scheduler,
};

pub use cloud::{CloudProvider, NoCloudProvider, WorkerId};
pub use engine::Engine;
