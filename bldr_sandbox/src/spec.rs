use std::collections::BTreeMap;

use thiserror::Error;

use crate::pathset::PathSet;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SandboxSpecError {
    #[error("inputs and outputs overlap at {0}")]
    InputsOverlapOutputs(String),
    #[error("outputs and temp overlap at {0}")]
    OutputsOverlapTemp(String),
    #[error("inputs and temp overlap at {0}")]
    InputsOverlapTemp(String),
    #[error("network policy marked hermetic but allows non-hermetic access")]
    HermeticNetworkContradiction,
}

/// Network isolation for one action. `is_hermetic` implies no
/// HTTP/HTTPS and an empty allow-list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkPolicy {
    pub is_hermetic: bool,
    pub allow_http: bool,
    pub allow_https: bool,
    pub allow_dns: bool,
    pub allowed_hosts: Vec<String>,
}

impl NetworkPolicy {
    pub fn hermetic() -> Self {
        NetworkPolicy {
            is_hermetic: true,
..Default::default()
        }
    }

    fn validate(&self) -> Result<(), SandboxSpecError> {
        if self.is_hermetic
            && (self.allow_http || self.allow_https || !self.allowed_hosts.is_empty())
        {
            return Err(SandboxSpecError::HermeticNetworkContradiction);
        }
        Ok(())
    }
}

/// Resource caps for one action. `0` means "no explicit limit"
/// for that dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_memory_bytes: u64,
    pub max_duration_ms: u64,
    pub max_processes: u32,
}

/// Process-tree behavior for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessPolicy {
    pub kill_on_parent_exit: bool,
    pub max_children: u32,
}

impl Default for ProcessPolicy {
    fn default() -> Self {
        ProcessPolicy {
            kill_on_parent_exit: true,
            max_children: u32::MAX,
        }
    }
}

/// The declarative contract for one action's hermetic isolation: `inputs ∩ outputs = ∅`, `outputs ∩ temp = ∅`, `inputs ∩ temp = ∅`,
/// and a hermetic network policy has no HTTP/HTTPS/allow-list escape hatch.
#[derive(Debug, Clone, Default)]
pub struct SandboxSpec {
    pub inputs: PathSet,
    pub outputs: PathSet,
    pub temp: PathSet,
    /// Last-write-wins ordered mapping, preserved as insertion order.
    pub environment: Vec<(String, String)>,
    pub network: NetworkPolicy,
    pub resources: ResourceLimits,
    pub process: ProcessPolicy,
}

impl SandboxSpec {
    pub fn validate(&self) -> Result<(), SandboxSpecError> {
        if let Some(p) = self.inputs.first_intersection(&self.outputs) {
            return Err(SandboxSpecError::InputsOverlapOutputs(p));
        }
        if let Some(p) = self.outputs.first_intersection(&self.temp) {
            return Err(SandboxSpecError::OutputsOverlapTemp(p));
        }
        if let Some(p) = self.inputs.first_intersection(&self.temp) {
            return Err(SandboxSpecError::InputsOverlapTemp(p));
        }
        self.network.validate()?;
        Ok(())
    }

    /// Resolved environment as a last-write-wins map, for handing to a
    /// process spawn call.
    pub fn resolved_environment(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for (k, v) in &self.environment {
            map.insert(k.clone(), v.clone());
        }
        map
    }
}
