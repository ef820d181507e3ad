//! Process-wide engine state, expressed as an explicit context object
//! rather than globals (spec §9 design note: "pass as fields of an
//! explicit engine context threaded through every function").

use std::collections::HashSet;

/// How the engine should react to a repairable anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractivityMode {
    /// `-a`/`-y`: apply the default repair without asking.
    Auto,
    /// `-r`: show a menu and apply the user's choice.
    Interactive,
    /// `-n`: report only, never write.
    ReadOnly,
}

impl InteractivityMode {
    pub fn may_write(self) -> bool {
        !matches!(self, InteractivityMode::ReadOnly)
    }

    pub fn is_interactive(self) -> bool {
        matches!(self, InteractivityMode::Interactive)
    }
}

/// Sink for progress output and, in interactive mode, a source of user
/// decisions. A single-threaded, synchronous trait object: there is
/// exactly one consumer and no concurrency to decouple (spec §5).
pub trait Reporter {
    /// Progress output, destined for stdout in the CLI.
    fn info(&mut self, message: &str);
    /// One-line anomaly identification or warning, destined for stderr.
    fn warn(&mut self, message: &str);
    /// Present `choices` for `question`; return the chosen index.
    /// Implementations that cannot prompt (auto mode, tests) should
    /// return `default` unconditionally.
    fn prompt(&mut self, question: &str, choices: &[&str], default: usize) -> usize {
        let _ = (question, choices);
        default
    }
}

/// A reporter that only ever takes the default choice and discards
/// output — the engine's behavior under `-a` and in unit tests.
#[derive(Default)]
pub struct SilentReporter {
    pub infos: Vec<String>,
    pub warnings: Vec<String>,
}

impl Reporter for SilentReporter {
    fn info(&mut self, message: &str) {
        self.infos.push(message.to_string());
    }

    fn warn(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }
}

/// Process-wide counters the driver reports at the end of a run (spec
/// §9: "counters (`n_files`, `alloc_clusters`, `bad_clusters`,
/// `remain_dirty`)"), reset at the start of every pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
    pub n_files: u32,
    pub alloc_clusters: u32,
    pub bad_clusters: u32,
    pub remain_dirty: bool,
}

/// All engine configuration and process-wide state for one run.
pub struct EngineContext {
    pub mode: InteractivityMode,
    pub atari_format: bool,
    /// `-f`: salvage orphan chains as recovered files rather than
    /// simply freeing them.
    pub salvage_orphans: bool,
    /// `-l`: list every path visited.
    pub list_paths: bool,
    /// `-t`: read-test data clusters not already known bad.
    pub read_test: bool,
    /// `-V`: run a second, verification-only pass after repairs.
    pub verify_pass: bool,
    /// `-w`: commit every write immediately rather than batching.
    pub write_immediate: bool,
    /// `-C`: only check and report the dirty flag.
    pub dirty_only: bool,
    /// Paths forced to be dropped (`-d`), matched and consumed during
    /// the walk; anything left over is reported as unused.
    pub force_drop: HashSet<String>,
    /// Paths forced to be undeleted (`-u`).
    pub force_undelete: HashSet<String>,
    pub counters: Counters,
    pub reporter: Box<dyn Reporter>,
}

impl EngineContext {
    pub fn new(mode: InteractivityMode, reporter: Box<dyn Reporter>) -> Self {
        Self {
            mode,
            atari_format: false,
            salvage_orphans: false,
            list_paths: false,
            read_test: false,
            verify_pass: false,
            write_immediate: false,
            dirty_only: false,
            force_drop: HashSet::new(),
            force_undelete: HashSet::new(),
            counters: Counters::default(),
            reporter,
        }
    }

    pub fn reset_counters(&mut self) {
        self.counters = Counters::default();
    }

    pub fn may_write(&self) -> bool {
        self.mode.may_write()
    }
}
