//! The scheduler's seam into language-specific toolchain invocation
//!: turning a [`Target`] into a concrete command
//! line and [`SandboxSpec`] is an external collaborator's job. This crate
//! only defines the trait and, for its own tests, a trivial "echo" default.

use bldr_core::{Target, TargetId};
use bldr_sandbox::SandboxSpec;

/// Identifies one sub-action within a target's build (e.g. `compile` vs
/// `link`) so the Action Cache can key on a narrower unit of work than the
/// whole target: `targetId:kind:inputHash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId {
    pub target: TargetId,
    pub kind: String,
    pub input_hash: String,
}

impl ActionId {
    pub fn new(target: TargetId, kind: impl Into<String>, input_hash: impl Into<String>) -> Self {
        ActionId {
            target,
            kind: kind.into(),
            input_hash: input_hash.into(),
        }
    }

    pub fn as_key(&self) -> String {
        format!("{}:{}:{}", self.target.as_str(), self.kind, self.input_hash)
    }
}

#[derive(Debug, Clone)]
pub struct BuildAction {
    /// Which sub-action this is (`"compile"`, `"link"`, ...); a language
    /// handler that only does one thing per target can use a constant.
    pub kind: String,
    pub command: Vec<String>,
    pub spec: SandboxSpec,
}

pub trait ActionBuilder: Send + Sync {
    fn build_action_for(&self, target: &Target, cwd: &str) -> BuildAction;
}

/// Exercises the scheduler without a real language handler: every target
/// resolves to `echo <target-id>` inside an otherwise-default sandbox spec.
pub struct EchoActionBuilder;

impl ActionBuilder for EchoActionBuilder {
    fn build_action_for(&self, target: &Target, cwd: &str) -> BuildAction {
        use bldr_sandbox::SandboxSpecBuilder;

        let spec = SandboxSpecBuilder::create()
            .output(cwd)
            .build()
            .expect("echo action spec is always valid");

        BuildAction {
            kind: "echo".to_string(),
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("echo {}", target.id()),
            ],
            spec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bldr_core::TargetKind;

    #[test]
    fn echo_builder_produces_valid_spec() {
        let target = Target::new("demo", TargetKind::Library, "rust");
        let action = EchoActionBuilder.build_action_for(&target, "/tmp");
        assert_eq!(action.command.last().unwrap(), "echo demo");
        assert_eq!(action.kind, "echo");
    }

    #[test]
    fn action_id_key_is_stable_and_distinguishes_kind() {
        let id = TargetId::new("pkg:a");
        let compile = ActionId::new(id.clone(), "compile", "h1").as_key();
        let link = ActionId::new(id, "link", "h1").as_key();
        assert_ne!(compile, link);
        assert_eq!(compile, "pkg:a:compile:h1");
    }
}
