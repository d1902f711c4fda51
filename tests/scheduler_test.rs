//! Driver/worker scheduling scenarios against real spawned worker
//! processes, including fault injection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use scip_cxx::compdb::{self, CompileCommand};
use scip_cxx::driver::{DriverOptions, run_driver};
use scip_cxx::scip::{self, SymbolRole};
use scip_cxx::types::{AbsolutePath, RootPath};
use scip_cxx::worker::WorkerFault;

fn worker_program() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_scip-cxx"))
}

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write_compdb(&self, files: &[&str]) -> PathBuf {
        let commands: Vec<CompileCommand> = files
            .iter()
            .map(|file| CompileCommand {
                directory: self.path().display().to_string(),
                file: file.to_string(),
                output: String::new(),
                arguments: vec![
                    "c++".to_string(),
                    "-I".to_string(),
                    ".".to_string(),
                    "-c".to_string(),
                    file.to_string(),
                ],
            })
            .collect();
        let path = self.path().join("compile_commands.json");
        compdb::save(&path, &commands).unwrap();
        path
    }

    fn driver_options(&self, compdb_path: PathBuf, output: &str) -> DriverOptions {
        DriverOptions {
            compdb_path,
            index_output_path: self.path().join(output),
            num_workers: 2,
            project_root: RootPath::new(AbsolutePath::new(self.path()).unwrap()),
            temporary_output_dir: None,
            deterministic: true,
            job_timeout: Duration::from_secs(60),
            worker_receive_timeout: Duration::from_secs(60),
            retry_limit: 2,
            show_compiler_diagnostics: false,
            log_level: "warn".to_string(),
            recording: None,
            worker_fault: None,
            worker_program: worker_program(),
        }
    }
}

fn shared_header_project() -> Project {
    Project::new(&[
        ("h.h", "int g();\n"),
        ("a.cpp", "#include \"h.h\"\nint a() { return g(); }\n"),
        ("b.cpp", "#include \"h.h\"\nint b() { return g(); }\n"),
        ("c.cpp", "int standalone() { return 3; }\n"),
    ])
}

#[test]
fn test_driver_produces_index_over_worker_pool() {
    let project = shared_header_project();
    let compdb_path = project.write_compdb(&["a.cpp", "b.cpp", "c.cpp"]);
    let summary = run_driver(project.driver_options(compdb_path, "index.scip")).unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.tasks_succeeded, 3);

    let index = scip::read_index(&project.path().join("index.scip")).unwrap();
    let paths: Vec<&str> = index
        .documents
        .iter()
        .map(|d| d.relative_path.as_str())
        .collect();
    assert_eq!(paths, vec!["a.cpp", "b.cpp", "c.cpp", "h.h"]);

    // No symbol carries more than one definition-role occurrence across
    // all documents.
    let mut definition_counts = std::collections::HashMap::new();
    for doc in &index.documents {
        for occ in &doc.occurrences {
            if occ.symbol_roles & SymbolRole::DEFINITION.bits() != 0 {
                *definition_counts.entry(occ.symbol.clone()).or_insert(0usize) += 1;
            }
        }
    }
    for (symbol, count) in definition_counts {
        assert_eq!(count, 1, "symbol {symbol} defined more than once");
    }
}

#[test]
fn test_crashing_worker_is_respawned_and_job_retried() {
    // S4: worker 0 aborts on its first job; the respawned worker picks the
    // job back up and the final index matches a fault-free run.
    let project = shared_header_project();
    let compdb_path = project.write_compdb(&["a.cpp", "b.cpp", "c.cpp"]);

    let mut faulty = project.driver_options(compdb_path.clone(), "faulty.scip");
    faulty.worker_fault = Some(WorkerFault::CrashOnce);
    let summary = run_driver(faulty).unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.tasks_succeeded, 3);

    let clean = project.driver_options(compdb_path, "clean.scip");
    run_driver(clean).unwrap();

    let faulty_bytes = std::fs::read(project.path().join("faulty.scip")).unwrap();
    let clean_bytes = std::fs::read(project.path().join("clean.scip")).unwrap();
    assert_eq!(faulty_bytes, clean_bytes);
}

#[test]
fn test_hanging_worker_times_out_and_rest_completes() {
    // S5: worker 0 hangs forever; with no retries its task is dropped,
    // the others finish, and the summary is a failure.
    let project = shared_header_project();
    let compdb_path = project.write_compdb(&["a.cpp", "b.cpp", "c.cpp"]);

    let mut options = project.driver_options(compdb_path, "index.scip");
    options.worker_fault = Some(WorkerFault::Hang);
    options.job_timeout = Duration::from_secs(2);
    options.retry_limit = 0;
    let summary = run_driver(options).unwrap();

    assert!(!summary.is_success());
    assert!(summary.tasks_timed_out >= 1);
    assert_eq!(
        summary.tasks_succeeded + summary.tasks_failed + summary.tasks_timed_out,
        3
    );
    assert!(summary.tasks_succeeded >= 2);

    // The surviving tasks still produced an index.
    let index = scip::read_index(&project.path().join("index.scip")).unwrap();
    assert!(!index.documents.is_empty());
}

#[test]
fn test_malformed_message_treated_as_worker_failure() {
    let project = shared_header_project();
    let compdb_path = project.write_compdb(&["a.cpp", "b.cpp", "c.cpp"]);

    let mut options = project.driver_options(compdb_path, "index.scip");
    options.worker_fault = Some(WorkerFault::Malformed);
    let summary = run_driver(options).unwrap();

    // The malformed sender is replaced and its job re-dispatched.
    assert!(summary.is_success());
    assert_eq!(summary.tasks_succeeded, 3);
}
