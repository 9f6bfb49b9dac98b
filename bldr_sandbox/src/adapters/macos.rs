use std::path::Path;

use tokio::process::Command;

use crate::spec::SandboxSpec;

use super::PlatformAdapter;

/// Isolation via `sandbox-exec` profiles (Seatbelt). We generate a minimal
/// allow/deny profile from the spec's path sets and network policy and pass
/// it with `-p`, wrapping the real command.
#[derive(Debug, Default)]
pub struct MacSandboxProfileAdapter {
    _private: (),
}

impl MacSandboxProfileAdapter {
    fn profile(spec: &SandboxSpec) -> String {
        let mut lines = vec![
            "(version 1)".to_string(),
            "(deny default)".to_string(),
            "(allow process-fork)".to_string(),
            "(allow process-exec)".to_string(),
        ];
        for path in spec.inputs.iter() {
            lines.push(format!("(allow file-read* (subpath \"{path}\"))"));
        }
        for path in spec.outputs.iter().chain(spec.temp.iter()) {
            lines.push(format!(
                "(allow file-read* file-write* (subpath \"{path}\"))"
            ));
        }
        if !spec.network.is_hermetic {
            lines.push("(allow network*)".to_string());
        }
        lines.join("\n")
    }

    fn rewrite_with_profile(cmd: &mut Command, spec: &SandboxSpec) {
        let profile = Self::profile(spec);
        let original_program = cmd.as_std().get_program().to_owned();
        let original_args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_owned()).collect();

        let mut new_cmd = Command::new("sandbox-exec");
        new_cmd.arg("-p").arg(profile);
        new_cmd.arg(&original_program);
        new_cmd.args(&original_args);
        *cmd = new_cmd;
    }
}

impl PlatformAdapter for MacSandboxProfileAdapter {
    fn prepare(&self, cmd: &mut Command, cwd: &Path, spec: &SandboxSpec) {
        cmd.current_dir(cwd);
        cmd.env_clear();
        for (k, v) in &spec.environment {
            cmd.env(k, v);
        }
        Self::rewrite_with_profile(cmd, spec);
    }

    fn is_hermetic_capable(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "macos-seatbelt"
    }
}
