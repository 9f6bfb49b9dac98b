//! Determinism enforcement layered on top of the executor:
//! injecting `SOURCE_DATE_EPOCH`, a fixed PRNG seed and path-remap flags, and
//! flagging commands that omit determinism-relevant compiler flags.

/// Whether a rule fires when its flag is missing (the compiler needs it to
/// be deterministic) or when its flag is present (the flag itself breaks
/// determinism).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    FlagAbsent,
    FlagPresent,
}

/// One `(compiler, flag, trigger, reason)` tuple. The list is enumerable
/// and extensible.
#[derive(Debug, Clone)]
pub struct DeterminismRule {
    pub compiler: &'static str,
    pub flag: &'static str,
    pub trigger: Trigger,
    pub reason: &'static str,
}

pub fn default_rules() -> Vec<DeterminismRule> {
    vec![
        DeterminismRule {
            compiler: "gcc",
            flag: "-fdebug-prefix-map",
            trigger: Trigger::FlagAbsent,
            reason: "embeds the build directory's absolute path into debug info otherwise",
        },
        DeterminismRule {
            compiler: "g++",
            flag: "-fdebug-prefix-map",
            trigger: Trigger::FlagAbsent,
            reason: "embeds the build directory's absolute path into debug info otherwise",
        },
        DeterminismRule {
            compiler: "go",
            flag: "-trimpath",
            trigger: Trigger::FlagAbsent,
            reason: "embeds the GOPATH-relative absolute source path into the binary otherwise",
        },
        DeterminismRule {
            compiler: "rustc",
            flag: "-Cincremental=true",
            trigger: Trigger::FlagPresent,
            reason: "incremental compilation caches are not reproducible across runs",
        },
    ]
}

/// Fixed values injected into every hermetic action's environment so that
/// tools which read ambient wall-clock time or randomness still produce
/// reproducible output.
pub struct DeterminismEnv {
    pub source_date_epoch: u64,
    pub prng_seed: u64,
}

impl Default for DeterminismEnv {
    fn default() -> Self {
        DeterminismEnv {
            source_date_epoch: 0,
            prng_seed: 0,
        }
    }
}

impl DeterminismEnv {
    pub fn as_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("SOURCE_DATE_EPOCH".to_string(), self.source_date_epoch.to_string()),
            ("BLDR_PRNG_SEED".to_string(), self.prng_seed.to_string()),
        ]
    }
}

/// A rule violation found in a command line: either a required flag was
/// missing, or a flag that breaks determinism was present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismWarning {
    pub compiler: String,
    pub flag: String,
    pub reason: String,
}

/// Scans `argv` (a command line, argv[0] is the compiler) against `rules`
/// and returns every rule whose compiler matches and whose trigger fired:
/// `FlagAbsent` rules fire when the flag is missing, `FlagPresent` rules
/// fire when the flag is present.
pub fn check_command_line(argv: &[String], rules: &[DeterminismRule]) -> Vec<DeterminismWarning> {
    let Some(exe) = argv.first() else {
        return Vec::new();
    };
    let exe_name = std::path::Path::new(exe)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(exe.as_str());

    rules
        .iter()
        .filter(|rule| rule.compiler == exe_name)
        .filter(|rule| {
            let present = argv.iter().any(|a| a.starts_with(rule.flag));
            match rule.trigger {
                Trigger::FlagAbsent => !present,
                Trigger::FlagPresent => present,
            }
        })
        .map(|rule| DeterminismWarning {
            compiler: rule.compiler.to_string(),
            flag: rule.flag.to_string(),
            reason: rule.reason.to_string(),
        })
        .collect()
}
