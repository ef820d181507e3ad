//! Command-line front end for the `fatcheck` engine.
//!
//! Parses flags with `clap`'s derive API, wires a terminal [`Reporter`]
//! that either prompts on a TTY or silently takes the default choice,
//! runs one engine pass, and maps the result onto the process exit code.

use std::io::{self, Write as _};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser};

use fatcheck::context::{EngineContext, InteractivityMode, Reporter};
use fatcheck::error::{CheckError, ExitStatus};
use fatcheck::Driver;

#[derive(Debug, Parser)]
#[command(
    name = "fatcheck",
    version,
    about = "Check and repair MS-DOS / Windows FAT filesystems",
    group(ArgGroup::new("mode").args(["auto", "interactive", "read_only"])),
    group(ArgGroup::new("write_mode").args(["auto", "interactive"]).multiple(true)),
)]
struct Cli {
    /// Device or disk image to check.
    device: PathBuf,

    /// Automatically repair without asking (same as -y).
    #[arg(short = 'a', long = "auto", visible_short_alias = 'y')]
    auto: bool,

    /// Ask before applying each repair.
    #[arg(short = 'r', long = "interactive")]
    interactive: bool,

    /// Check only, never write.
    #[arg(short = 'n', long = "read-only")]
    read_only: bool,

    /// Treat the volume as Atari-format FAT.
    #[arg(short = 'A', long = "atari")]
    atari: bool,

    /// Only check and report the dirty flag, then exit.
    #[arg(short = 'C', long = "dirty-only")]
    dirty_only: bool,

    /// Force the named path to be dropped; may be repeated.
    #[arg(short = 'd', long = "drop", value_name = "PATH")]
    drop_paths: Vec<String>,

    /// Force the named path to be undeleted; may be repeated.
    #[arg(short = 'u', long = "undelete", value_name = "PATH")]
    undelete_paths: Vec<String>,

    /// Salvage orphan chains as recovered files instead of freeing them.
    #[arg(short = 'f', long = "salvage")]
    salvage: bool,

    /// List every path visited.
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Read-test every data cluster not already known bad.
    #[arg(short = 't', long = "read-test", requires = "write_mode")]
    read_test: bool,

    /// Increase logging verbosity; may be repeated.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Run a second, verification-only pass after repairs.
    #[arg(short = 'V', long = "verify")]
    verify: bool,

    /// Commit every write immediately rather than batching.
    #[arg(short = 'w', long = "write-immediate", requires = "write_mode")]
    write_immediate: bool,
}

/// Reports progress to stdout, warnings to stderr, and — on an
/// interactive run — prompts on stdin; falls back to the default
/// choice whenever stdin isn't a terminal a human can answer.
struct TerminalReporter {
    interactive: bool,
}

impl Reporter for TerminalReporter {
    fn info(&mut self, message: &str) {
        println!("{message}");
    }

    fn warn(&mut self, message: &str) {
        eprintln!("{message}");
    }

    fn prompt(&mut self, question: &str, choices: &[&str], default: usize) -> usize {
        if !self.interactive {
            return default;
        }
        eprintln!("{question}");
        for (index, choice) in choices.iter().enumerate() {
            eprintln!("  {}) {choice}{}", index + 1, if index == default { " (default)" } else { "" });
        }
        loop {
            eprint!("? ");
            let _ = io::stderr().flush();
            let mut line = String::new();
            if io::stdin().read_line(&mut line).is_err() || line.trim().is_empty() {
                return default;
            }
            match line.trim().parse::<usize>() {
                Ok(n) if n >= 1 && n <= choices.len() => return n - 1,
                _ => eprintln!("please enter a number between 1 and {}", choices.len()),
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    match run(cli) {
        Ok(status) => exit_code_from(status),
        Err(err) => {
            eprintln!("fatcheck: {err:#}");
            exit_code_from(exit_status_for(&err))
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitStatus> {
    let mode = if cli.read_only {
        InteractivityMode::ReadOnly
    } else if cli.interactive {
        InteractivityMode::Interactive
    } else {
        // No explicit mode is read-only: an unattended invocation of a
        // disk-repair tool must never write without being told to.
        InteractivityMode::ReadOnly
    };

    let reporter = TerminalReporter {
        interactive: mode.is_interactive(),
    };
    let mut ctx = EngineContext::new(mode, Box::new(reporter));
    ctx.atari_format = cli.atari;
    ctx.salvage_orphans = cli.salvage;
    ctx.list_paths = cli.list;
    ctx.read_test = cli.read_test;
    ctx.verify_pass = cli.verify;
    ctx.write_immediate = cli.write_immediate;
    ctx.dirty_only = cli.dirty_only;
    ctx.force_drop = cli.drop_paths.into_iter().collect();
    ctx.force_undelete = cli.undelete_paths.into_iter().collect();

    let read_write = mode.may_write();
    let mut driver = Driver::open(&cli.device, read_write)?;
    let summary = driver.run(&mut ctx)?;

    log::info!(
        "{} files, {} allocated clusters, {} bad clusters, dirty={}",
        summary.counters.n_files,
        summary.counters.alloc_clusters,
        summary.counters.bad_clusters,
        summary.counters.remain_dirty,
    );

    Ok(summary.exit_status)
}

fn exit_status_for(err: &anyhow::Error) -> ExitStatus {
    err.downcast_ref::<CheckError>()
        .map(ExitStatus::from)
        .unwrap_or(ExitStatus::OPERATIONAL)
}

fn exit_code_from(status: ExitStatus) -> ExitCode {
    let bits = i32::from(status);
    ExitCode::from((bits & 0xFF) as u8)
}
