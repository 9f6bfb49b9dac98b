use std::path::Path;

use tokio::process::Command;

use crate::spec::SandboxSpec;

use super::PlatformAdapter;

/// Runs the command as-is with no isolation. Used on unsupported platforms
/// and as the executor's fallback when a real adapter's setup step fails;
/// always reports `hermetic = false`.
#[derive(Debug, Default)]
pub struct NoopAdapter;

impl PlatformAdapter for NoopAdapter {
    fn prepare(&self, _cmd: &mut Command, _cwd: &Path, _spec: &SandboxSpec) {}

    fn is_hermetic_capable(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
