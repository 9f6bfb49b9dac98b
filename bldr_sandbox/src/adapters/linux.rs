use std::os::unix::process::CommandExt as _;
use std::path::Path;

use tokio::process::Command;

use crate::spec::SandboxSpec;

use super::PlatformAdapter;

/// Isolation via Linux user + network namespaces. Bind mounts for the
/// declared input/output path sets are applied by the caller before spawn
/// (they require a mount namespace set up ahead of `pre_exec`, which is the
/// forkserver's job in the real daemon); this adapter is responsible for the
/// per-child namespace unshare and for clearing the environment.
#[derive(Debug, Default)]
pub struct LinuxNamespaceAdapter {
    _private: (),
}

impl PlatformAdapter for LinuxNamespaceAdapter {
    fn prepare(&self, cmd: &mut Command, cwd: &Path, spec: &SandboxSpec) {
        cmd.current_dir(cwd);

        cmd.env_clear();
        for (k, v) in &spec.environment {
            cmd.env(k, v);
        }

        let hermetic_network = spec.network.is_hermetic;
        unsafe {
            cmd.pre_exec(move || {
                let mut flags = libc::CLONE_NEWUSER | libc::CLONE_NEWNS;
                if hermetic_network {
                    flags |= libc::CLONE_NEWNET;
                }
                if libc::unshare(flags) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    fn is_hermetic_capable(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "linux-namespaces"
    }
}
