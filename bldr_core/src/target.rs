use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier of a [`Target`] within a workspace. A target's `name`
/// forms its id; there is no separate numbering scheme.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn new(name: impl Into<String>) -> Self {
        TargetId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        TargetId::new(s)
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        TargetId(s)
    }
}

/// What kind of thing a [`Target`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    Executable,
    Library,
    Test,
    Custom,
}

/// A user-declared build unit. Immutable once constructed; the
/// runtime state attached to it while building lives in [`crate::node::BuildNode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    id: TargetId,
    pub kind: TargetKind,
    pub language: String,
    pub sources: Vec<String>,
    pub deps: Vec<TargetId>,
    pub outputs: Vec<String>,
    pub config: BTreeMap<String, String>,
}

impl Target {
    pub fn new(name: impl Into<String>, kind: TargetKind, language: impl Into<String>) -> Self {
        let name = name.into();
        Target {
            id: TargetId::new(name),
            kind,
            language: language.into(),
            sources: Vec::new(),
            deps: Vec::new(),
            outputs: Vec::new(),
            config: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &TargetId {
        &self.id
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deps(mut self, deps: impl IntoIterator<Item = impl Into<TargetId>>) -> Self {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}
