use crate::spec::{NetworkPolicy, ProcessPolicy, ResourceLimits, SandboxSpec, SandboxSpecError};

/// Chainable construction of a [`SandboxSpec`]. `build()`
/// runs full validation and returns the structural errors defined by the
/// spec's path-set and network-policy invariants.
#[derive(Debug, Default)]
pub struct SandboxSpecBuilder {
    spec: SandboxSpec,
}

impl SandboxSpecBuilder {
    pub fn create() -> Self {
        SandboxSpecBuilder::default()
    }

    pub fn input(mut self, path: impl Into<String>) -> Self {
        self.spec.inputs.insert(path);
        self
    }

    pub fn output(mut self, path: impl Into<String>) -> Self {
        self.spec.outputs.insert(path);
        self
    }

    pub fn temp(mut self, path: impl Into<String>) -> Self {
        self.spec.temp.insert(path);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.environment.push((key.into(), value.into()));
        self
    }

    pub fn clear_environment(mut self) -> Self {
        self.spec.environment.clear();
        self
    }

    pub fn with_network(mut self, policy: NetworkPolicy) -> Self {
        self.spec.network = policy;
        self
    }

    pub fn with_resources(mut self, limits: ResourceLimits) -> Self {
        self.spec.resources = limits;
        self
    }

    pub fn with_process(mut self, policy: ProcessPolicy) -> Self {
        self.spec.process = policy;
        self
    }

    pub fn build(self) -> Result<SandboxSpec, SandboxSpecError> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_input_output_overlap() {
        let err = SandboxSpecBuilder::create()
            .input("/ws")
            .output("/ws/bin")
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn accepts_disjoint_paths() {
        let spec = SandboxSpecBuilder::create()
            .input("/ws")
            .output("/tmp/bin")
            .build();
        assert!(spec.is_ok());
    }

    #[test]
    fn rejects_hermetic_with_allowed_hosts() {
        let mut policy = NetworkPolicy::hermetic();
        policy.allowed_hosts.push("example.com".into());
        let err = SandboxSpecBuilder::create().with_network(policy).build();
        assert!(err.is_err());
    }
}
