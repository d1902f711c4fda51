//! CLI argument parsing using clap.
//!
//! One flat flag surface serves both roles of the binary: the driver (the
//! default) and the worker (spawned internally with the hidden
//! `--worker-mode` options).

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// SCIP indexer for C and C++ compilation databases
#[derive(Parser, Debug)]
#[command(
    name = "scip-cxx",
    version = env!("CARGO_PKG_VERSION"),
    about = "Index C/C++ codebases into a SCIP code-intelligence index",
    long_about = "Indexes every translation unit of a compilation database, \
                  deduplicating headers across TUs by preprocessor effect, \
                  and merges the result into one SCIP index."
)]
pub struct Cli {
    /// Path to a compilation database (compile_commands.json)
    #[arg(long, value_name = "PATH")]
    pub compdb_path: Option<PathBuf>,

    /// Destination for the merged SCIP index
    #[arg(long, value_name = "PATH", default_value = "index.scip")]
    pub index_output_path: PathBuf,

    /// Worker pool size (default: available parallelism)
    #[arg(long, short = 'j', value_name = "N")]
    pub jobs: Option<usize>,

    /// Use stable iteration orders so repeated runs produce byte-identical
    /// output
    #[arg(long)]
    pub deterministic: bool,

    /// Root used to derive root-relative document paths (default: current
    /// directory)
    #[arg(long, value_name = "PATH")]
    pub project_root_path: Option<PathBuf>,

    /// Scratch directory for shard files (default: a fresh temporary
    /// directory, removed on exit)
    #[arg(long, value_name = "PATH")]
    pub temporary_output_dir: Option<PathBuf>,

    /// Logging verbosity
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "warn",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Record preprocessor events for headers whose absolute path matches
    /// this regex
    #[arg(long, value_name = "REGEX")]
    pub preprocessor_record_history_filter: Option<String>,

    /// Destination of the preprocessor event log
    #[arg(long, value_name = "PATH")]
    pub preprocessor_history_log_path: Option<PathBuf>,

    /// Forward parser diagnostics to stderr
    #[arg(long)]
    pub show_compiler_diagnostics: bool,

    /// Per-job timeout before the worker is killed and the job retried
    #[arg(long, value_name = "SECONDS", default_value_t = 600)]
    pub job_timeout_seconds: u64,

    /// Give up on a task after this many re-dispatches
    #[arg(long, value_name = "N", default_value_t = 2)]
    pub job_retry_limit: u32,

    /// Worker self-termination timeout on a silent driver queue
    #[arg(long, hide = true, value_name = "SECONDS", default_value_t = 300)]
    pub receive_timeout_seconds: u64,

    // Worker-internal options; the driver sets these when spawning.
    #[arg(long, hide = true, value_enum)]
    pub worker_mode: Option<WorkerModeArg>,

    #[arg(long, hide = true)]
    pub driver_id: Option<String>,

    #[arg(long, hide = true)]
    pub worker_id: Option<u32>,

    /// Fault injection for testing: crash-once, hang or malformed
    #[arg(long, hide = true, value_name = "FAULT")]
    pub worker_fault: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkerModeArg {
    /// Communicate with a driver over IPC
    Ipc,
    /// Process a compilation database directly, single-process
    Compdb,
    /// Driven by test code
    Testing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_invocation_parses() {
        let cli = Cli::try_parse_from([
            "scip-cxx",
            "--compdb-path",
            "compile_commands.json",
            "--index-output-path",
            "out.scip",
            "-j",
            "4",
            "--deterministic",
        ])
        .unwrap();
        assert_eq!(cli.jobs, Some(4));
        assert!(cli.deterministic);
        assert!(cli.worker_mode.is_none());
    }

    #[test]
    fn test_worker_invocation_parses() {
        let cli = Cli::try_parse_from([
            "scip-cxx",
            "--worker-mode",
            "ipc",
            "--driver-id",
            "1234-abc",
            "--worker-id",
            "2",
            "--worker-fault",
            "crash-once",
        ])
        .unwrap();
        assert_eq!(cli.worker_mode, Some(WorkerModeArg::Ipc));
        assert_eq!(cli.worker_id, Some(2));
        assert_eq!(cli.worker_fault.as_deref(), Some("crash-once"));
    }
}
