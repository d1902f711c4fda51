//! Single-process compdb worker mode: the full two-phase pipeline without
//! a driver, used for debugging and determinism checks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use scip_cxx::compdb::{self, CompileCommand};
use scip_cxx::scip;
use scip_cxx::types::{AbsolutePath, RootPath};
use scip_cxx::worker::{Worker, WorkerMode, WorkerOptions};

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

    fn run_compdb_worker(&self, compdb_path: &Path, output: &str) {
        let scratch = self.path().join(format!("scratch-{output}"));
        std::fs::create_dir_all(&scratch).unwrap();
        let mut worker = Worker::new(WorkerOptions {
            project_root: RootPath::new(AbsolutePath::new(self.path()).unwrap()),
            mode: WorkerMode::Compdb,
            driver_id: "compdb".to_string(),
            worker_id: 0,
            receive_timeout: Duration::from_secs(60),
            deterministic: true,
            temporary_output_dir: scratch,
            compdb_path: Some(compdb_path.to_path_buf()),
            index_output_path: Some(self.path().join(output)),
            show_compiler_diagnostics: false,
            recording: None,
            fault: None,
        });
        worker.run().unwrap();
    }
}

#[test]
fn test_compdb_mode_indexes_whole_database() {
    let project = Project::new(&[
        ("h.h", "int g();\n"),
        ("a.cpp", "#include \"h.h\"\nint a() { return g(); }\n"),
        ("b.cpp", "#include \"h.h\"\nint b() { return g(); }\n"),
    ]);
    let compdb_path = project.write_compdb(&["a.cpp", "b.cpp"]);
    project.run_compdb_worker(&compdb_path, "index.scip");

    let index = scip::read_index(&project.path().join("index.scip")).unwrap();
    let paths: Vec<&str> = index
        .documents
        .iter()
        .map(|d| d.relative_path.as_str())
        .collect();
    assert_eq!(paths, vec!["a.cpp", "b.cpp", "h.h"]);
}

#[test]
fn test_deterministic_runs_are_byte_identical() {
    let project = Project::new(&[
        ("h.h", "#if LARGE\nint big();\n#else\nint small();\n#endif\n"),
        ("a.cpp", "#define LARGE 1\n#include \"h.h\"\n"),
        ("b.cpp", "#include \"h.h\"\nstruct Local { int member; };\n"),
    ]);
    let compdb_path = project.write_compdb(&["a.cpp", "b.cpp"]);

    project.run_compdb_worker(&compdb_path, "first.scip");
    project.run_compdb_worker(&compdb_path, "second.scip");

    let first = std::fs::read(project.path().join("first.scip")).unwrap();
    let second = std::fs::read(project.path().join("second.scip")).unwrap();
    assert_eq!(first, second);
}
