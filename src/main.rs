use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;

use scip_cxx::cli::{Cli, WorkerModeArg};
use scip_cxx::driver::{DriverOptions, run_driver};
use scip_cxx::types::{AbsolutePath, RootPath};
use scip_cxx::worker::{
    RecordingOptions, WorkerFault, WorkerMode, WorkerOptions, worker_main,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    scip_cxx::logging::init(&cli.log_level);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("scip-cxx: error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let project_root = resolve_project_root(cli.project_root_path.as_deref())?;
    let recording = match (
        &cli.preprocessor_record_history_filter,
        &cli.preprocessor_history_log_path,
    ) {
        (Some(filter), Some(log_path)) => Some(RecordingOptions {
            filter: filter.clone(),
            log_path: log_path.clone(),
        }),
        (Some(_), None) => {
            bail!("--preprocessor-record-history-filter requires --preprocessor-history-log-path")
        }
        _ => None,
    };

    if let Some(mode) = cli.worker_mode {
        let fault = cli
            .worker_fault
            .as_deref()
            .map(str::parse::<WorkerFault>)
            .transpose()?;
        let options = WorkerOptions {
            project_root,
            mode: match mode {
                WorkerModeArg::Ipc => WorkerMode::Ipc,
                WorkerModeArg::Compdb => WorkerMode::Compdb,
                WorkerModeArg::Testing => WorkerMode::Testing,
            },
            driver_id: cli.driver_id.unwrap_or_else(|| "standalone".to_string()),
            worker_id: cli.worker_id.unwrap_or(0),
            receive_timeout: Duration::from_secs(cli.receive_timeout_seconds),
            deterministic: cli.deterministic,
            temporary_output_dir: cli
                .temporary_output_dir
                .unwrap_or_else(std::env::temp_dir),
            compdb_path: cli.compdb_path,
            index_output_path: Some(cli.index_output_path),
            show_compiler_diagnostics: cli.show_compiler_diagnostics,
            recording,
            fault,
        };
        worker_main(options).context("worker failed")?;
        return Ok(true);
    }

    let compdb_path = cli
        .compdb_path
        .context("--compdb-path is required (see --help)")?;
    let fault = cli
        .worker_fault
        .as_deref()
        .map(str::parse::<WorkerFault>)
        .transpose()?;
    let options = DriverOptions {
        compdb_path,
        index_output_path: cli.index_output_path,
        num_workers: cli.jobs.unwrap_or_else(num_cpus::get),
        project_root,
        temporary_output_dir: cli.temporary_output_dir,
        deterministic: cli.deterministic,
        job_timeout: Duration::from_secs(cli.job_timeout_seconds),
        worker_receive_timeout: Duration::from_secs(cli.receive_timeout_seconds),
        retry_limit: cli.job_retry_limit,
        show_compiler_diagnostics: cli.show_compiler_diagnostics,
        log_level: cli.log_level,
        recording,
        worker_fault: fault,
        worker_program: std::env::current_exe().context("locating worker executable")?,
    };

    let summary = run_driver(options).context("driver failed")?;
    println!(
        "scip-cxx: {} succeeded, {} failed, {} timed out",
        summary.tasks_succeeded, summary.tasks_failed, summary.tasks_timed_out
    );
    Ok(summary.is_success())
}

fn resolve_project_root(arg: Option<&Path>) -> anyhow::Result<RootPath> {
    let dir: PathBuf = match arg {
        Some(path) => {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()?.join(path)
            }
        }
        None => std::env::current_dir()?,
    };
    let absolute = AbsolutePath::new(&dir)
        .with_context(|| format!("project root '{}' is not absolute", dir.display()))?;
    Ok(RootPath::new(absolute))
}
