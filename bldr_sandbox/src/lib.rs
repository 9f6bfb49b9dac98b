//! The hermetic sandbox contract: a declarative
//! [`spec::SandboxSpec`] describing filesystem/network/resource isolation
//! for one action, a builder that validates it, and an executor that runs
//! the isolated command via a platform-specific adapter.

pub mod adapters;
pub mod builder;
pub mod determinism;
pub mod executor;
pub mod pathset;
pub mod process;
pub mod spec;
pub mod verify;

pub use builder::SandboxSpecBuilder;
pub use executor::{ExecutionOutput, SandboxExecError, SandboxExecutor};
pub use pathset::PathSet;
pub use spec::{NetworkPolicy, ProcessPolicy, ResourceLimits, SandboxSpec, SandboxSpecError};
