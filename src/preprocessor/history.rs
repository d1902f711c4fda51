//! Optional event log for debugging preprocessor behavior.
//!
//! When `--preprocessor-record-history-filter` matches a file's absolute
//! path, every preprocessor event touching that file is appended to the
//! history log as one JSON record per line.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::error::{IndexError, IndexResult};
use crate::types::{FileRange, HashValue};

use super::{FileId, FileTable, MacroId, MacroTable, PpObserver};

#[derive(Debug, Serialize)]
struct HistoryRecord<'a> {
    event: &'a str,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
}

pub struct HistoryRecorder {
    filter: Regex,
    writer: BufWriter<File>,
}

impl HistoryRecorder {
    pub fn new(filter: Regex, log_path: &Path) -> IndexResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|source| IndexError::FileWrite {
                path: log_path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            filter,
            writer: BufWriter::new(file),
        })
    }

    fn matches(&self, files: &FileTable, file: FileId) -> bool {
        self.filter.is_match(&files.path(file).to_string())
    }

    fn write(&mut self, record: &HistoryRecord<'_>) {
        let line = serde_json::to_string(record).expect("history record serializes");
        if let Err(err) = writeln!(self.writer, "{line}") {
            warn!(%err, "failed to append preprocessor history record");
        }
    }

    pub fn flush(&mut self) {
        if let Err(err) = self.writer.flush() {
            warn!(%err, "failed to flush preprocessor history log");
        }
    }
}

impl PpObserver for HistoryRecorder {
    fn file_entered(&mut self, files: &FileTable, file: FileId) {
        if self.matches(files, file) {
            self.write(&HistoryRecord {
                event: "file_entered",
                path: files.path(file).to_string(),
                line: None,
                name: None,
                hash: None,
                target: None,
            });
        }
    }

    fn file_exited(&mut self, files: &FileTable, file: FileId, hash: HashValue) {
        if self.matches(files, file) {
            self.write(&HistoryRecord {
                event: "file_exited",
                path: files.path(file).to_string(),
                line: None,
                name: None,
                hash: Some(hash.to_string()),
                target: None,
            });
        }
    }

    fn include_resolved(
        &mut self,
        files: &FileTable,
        file: FileId,
        range: FileRange,
        target: FileId,
    ) {
        if self.matches(files, file) {
            self.write(&HistoryRecord {
                event: "include_resolved",
                path: files.path(file).to_string(),
                line: Some(range.start_line),
                name: None,
                hash: None,
                target: Some(files.path(target).to_string()),
            });
        }
    }

    fn macro_defined(
        &mut self,
        files: &FileTable,
        macros: &MacroTable,
        file: FileId,
        range: FileRange,
        def: MacroId,
    ) {
        if self.matches(files, file) {
            self.write(&HistoryRecord {
                event: "macro_defined",
                path: files.path(file).to_string(),
                line: Some(range.start_line),
                name: Some(&macros.record(def).name),
                hash: None,
                target: None,
            });
        }
    }

    fn macro_undefined(
        &mut self,
        files: &FileTable,
        macros: &MacroTable,
        file: FileId,
        range: FileRange,
        def: MacroId,
    ) {
        if self.matches(files, file) {
            self.write(&HistoryRecord {
                event: "macro_undefined",
                path: files.path(file).to_string(),
                line: Some(range.start_line),
                name: Some(&macros.record(def).name),
                hash: None,
                target: None,
            });
        }
    }

    fn macro_expanded(
        &mut self,
        files: &FileTable,
        macros: &MacroTable,
        file: FileId,
        range: FileRange,
        def: MacroId,
    ) {
        if self.matches(files, file) {
            self.write(&HistoryRecord {
                event: "macro_expanded",
                path: files.path(file).to_string(),
                line: Some(range.start_line),
                name: Some(&macros.record(def).name),
                hash: None,
                target: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compdb::Language;
    use crate::preprocessor::{PpOptions, Preprocessor};
    use crate::types::{AbsolutePath, RootPath};

    #[test]
    fn test_recorder_logs_matching_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("h.h"), "#define IN_H 1\nint g();\n").unwrap();
        std::fs::write(dir.path().join("a.cpp"), "#include \"h.h\"\n#define LOCAL 2\n").unwrap();
        let log_path = dir.path().join("history.log");

        let mut recorder =
            HistoryRecorder::new(Regex::new(r"h\.h$").unwrap(), &log_path).unwrap();
        let root = RootPath::new(AbsolutePath::new(dir.path()).unwrap());
        let options = PpOptions {
            language: Language::Cpp,
            include_dirs: vec![AbsolutePath::new(dir.path()).unwrap()],
            defines: Vec::new(),
            undefs: Vec::new(),
        };
        let main = AbsolutePath::new(&dir.path().join("a.cpp")).unwrap();
        Preprocessor::new(root, options, vec![&mut recorder])
            .process(&main)
            .unwrap();
        recorder.flush();

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("\"event\":\"file_entered\""));
        assert!(log.contains("\"name\":\"IN_H\""));
        // Events for the non-matching main file are filtered out.
        assert!(!log.contains("\"name\":\"LOCAL\""));
    }
}
