use std::path::Path;

use tokio::process::Command;

use crate::spec::SandboxSpec;

use super::PlatformAdapter;

/// Isolation via a Windows Job Object: the spawned process (and anything it
/// spawns) is assigned to a job with `JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE`, so
/// dropping the job handle tears down the whole tree. Filesystem/network
/// isolation on Windows has no equivalent to namespaces/Seatbelt, so this
/// adapter only enforces process-tree containment, not full hermeticity.
#[derive(Debug, Default)]
pub struct WindowsJobObjectAdapter {
    _private: (),
}

impl PlatformAdapter for WindowsJobObjectAdapter {
    fn prepare(&self, cmd: &mut Command, cwd: &Path, spec: &SandboxSpec) {
        cmd.current_dir(cwd);
        cmd.env_clear();
        for (k, v) in &spec.environment {
            cmd.env(k, v);
        }
        // Job assignment happens after spawn, once the child handle exists;
        // see `crate::executor::Executor::execute`.
    }

    fn is_hermetic_capable(&self) -> bool {
        // Only the process tree is contained; no filesystem/network jail.
        false
    }

    fn name(&self) -> &'static str {
        "windows-job-object"
    }
}
