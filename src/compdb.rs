//! Compilation database loading and compile-command interpretation.
//!
//! A compilation database is a JSON array of records with fields
//! `directory`, `file`, `output` (optional) and `arguments` (or a single
//! `command` string). Each record describes one translation unit and is the
//! unit of scheduling for the driver.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};
use crate::types::AbsolutePath;

/// One entry of the compilation database; the wire form used in IPC jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    pub directory: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    pub arguments: Vec<String>,
}

/// Source language of a translation unit, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    C,
    Cpp,
}

impl Language {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("c") => Language::C,
            // Headers default to C++ so templates and namespaces parse.
            _ => Language::Cpp,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }
}

impl CompileCommand {
    /// Working directory of the compiler invocation as an absolute path.
    pub fn working_directory(&self) -> IndexResult<AbsolutePath> {
        AbsolutePath::new(Path::new(&self.directory)).ok_or_else(|| IndexError::Config {
            reason: format!(
                "compilation database directory '{}' is not absolute",
                self.directory
            ),
        })
    }

    /// The main source file, resolved against the working directory.
    pub fn main_file(&self) -> IndexResult<AbsolutePath> {
        let dir = self.working_directory()?;
        Ok(AbsolutePath::resolve(&dir, Path::new(&self.file)))
    }

    pub fn language(&self) -> Language {
        Language::from_path(Path::new(&self.file))
    }

    /// Include search directories from `-I`, `-isystem` and `-iquote`
    /// arguments, in command-line order, resolved against the working
    /// directory.
    pub fn include_directories(&self) -> IndexResult<Vec<AbsolutePath>> {
        let dir = self.working_directory()?;
        let mut dirs = Vec::new();
        let mut args = self.arguments.iter().peekable();
        while let Some(arg) = args.next() {
            let dir_arg = if let Some(rest) = arg.strip_prefix("-I") {
                if rest.is_empty() {
                    args.next().map(String::as_str)
                } else {
                    Some(rest)
                }
            } else if arg == "-isystem" || arg == "-iquote" {
                args.next().map(String::as_str)
            } else {
                None
            };
            if let Some(d) = dir_arg {
                dirs.push(AbsolutePath::resolve(&dir, Path::new(d)));
            }
        }
        Ok(dirs)
    }

    /// Command-line macro definitions: `(name, replacement)` for each `-D`,
    /// plus the names removed by `-U`.
    pub fn cli_macros(&self) -> (Vec<(String, String)>, Vec<String>) {
        let mut defines = Vec::new();
        let mut undefs = Vec::new();
        let mut args = self.arguments.iter().peekable();
        while let Some(arg) = args.next() {
            if let Some(rest) = arg.strip_prefix("-D") {
                let spec = if rest.is_empty() {
                    args.next().cloned().unwrap_or_default()
                } else {
                    rest.to_string()
                };
                match spec.split_once('=') {
                    Some((name, value)) => defines.push((name.to_string(), value.to_string())),
                    // A bare -DNAME defines NAME as 1.
                    None => defines.push((spec, "1".to_string())),
                }
            } else if let Some(rest) = arg.strip_prefix("-U") {
                let name = if rest.is_empty() {
                    args.next().cloned().unwrap_or_default()
                } else {
                    rest.to_string()
                };
                undefs.push(name);
            }
        }
        (defines, undefs)
    }
}

/// Raw on-disk entry; tools differ on `arguments` array vs `command` string.
#[derive(Debug, Deserialize)]
struct RawEntry {
    directory: String,
    file: String,
    #[serde(default)]
    output: String,
    #[serde(default)]
    arguments: Vec<String>,
    #[serde(default)]
    command: Option<String>,
}

/// A loaded compilation database.
#[derive(Debug, Clone)]
pub struct CompilationDatabase {
    pub commands: Vec<CompileCommand>,
}

impl CompilationDatabase {
    pub fn load(path: &Path) -> IndexResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| IndexError::CompdbRead {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: Vec<RawEntry> =
            serde_json::from_str(&text).map_err(|source| IndexError::CompdbParse {
                path: path.to_path_buf(),
                source,
            })?;
        let commands = raw
            .into_iter()
            .map(|entry| {
                let arguments = if entry.arguments.is_empty() {
                    // Whitespace splitting covers the compiler invocations in
                    // practice; quoted arguments with spaces are rare in
                    // generated databases.
                    entry
                        .command
                        .as_deref()
                        .unwrap_or_default()
                        .split_whitespace()
                        .map(str::to_string)
                        .collect()
                } else {
                    entry.arguments
                };
                CompileCommand {
                    directory: entry.directory,
                    file: entry.file,
                    output: entry.output,
                    arguments,
                }
            })
            .collect();
        Ok(Self { commands })
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Write a compilation database for a set of commands; used by tests and
/// fixture tooling.
pub fn save(path: &Path, commands: &[CompileCommand]) -> IndexResult<()> {
    let text = serde_json::to_string_pretty(commands).expect("compile commands serialize");
    std::fs::write(path, text).map_err(|source| IndexError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn command(args: &[&str]) -> CompileCommand {
        CompileCommand {
            directory: "/proj".to_string(),
            file: "src/a.cpp".to_string(),
            output: String::new(),
            arguments: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_compile_command_json_round_trip() {
        let cmd = command(&["clang++", "-I", "include", "-DX=1", "-c", "src/a.cpp"]);
        let encoded = serde_json::to_string(&cmd).unwrap();
        let decoded: CompileCommand = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, cmd);

        // encode ∘ decode is idempotent
        let encoded_again = serde_json::to_string(&decoded).unwrap();
        assert_eq!(encoded, encoded_again);
    }

    #[test]
    fn test_main_file_resolves_against_directory() {
        let cmd = command(&["cc", "-c", "src/a.cpp"]);
        assert_eq!(
            cmd.main_file().unwrap().as_path(),
            Path::new("/proj/src/a.cpp")
        );
    }

    #[test]
    fn test_include_directories_both_spellings() {
        let cmd = command(&["cc", "-Iinclude", "-I", "/opt/sdk/include", "-isystem", "vendor"]);
        let dirs = cmd.include_directories().unwrap();
        assert_eq!(
            dirs.iter().map(|d| d.as_path().to_path_buf()).collect::<Vec<_>>(),
            vec![
                PathBuf::from("/proj/include"),
                PathBuf::from("/opt/sdk/include"),
                PathBuf::from("/proj/vendor"),
            ]
        );
    }

    #[test]
    fn test_cli_macros() {
        let cmd = command(&["cc", "-DX=2", "-DFLAG", "-UY"]);
        let (defines, undefs) = cmd.cli_macros();
        assert_eq!(
            defines,
            vec![
                ("X".to_string(), "2".to_string()),
                ("FLAG".to_string(), "1".to_string())
            ]
        );
        assert_eq!(undefs, vec!["Y".to_string()]);
    }

    #[test]
    fn test_load_accepts_command_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compile_commands.json");
        std::fs::write(
            &path,
            r#"[{"directory": "/proj", "file": "a.c", "command": "cc -c a.c"}]"#,
        )
        .unwrap();

        let db = CompilationDatabase::load(&path).unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(db.commands[0].arguments, vec!["cc", "-c", "a.c"]);
        assert_eq!(db.commands[0].language(), Language::C);
    }
}
