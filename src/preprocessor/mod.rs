//! Directive-level preprocessing of one translation unit.
//!
//! Scans the main file and every resolved include in inclusion order,
//! maintaining the macro environment and conditional state, and delivers
//! the event stream the indexing pipeline consumes: file enter/exit,
//! include resolution, macro define/undef and macro expansion. While
//! scanning it folds the observed token stream of each file into a rolling
//! hash; the sealed per-file hashes decide which TU gets to index which
//! header.
//!
//! This is not a conforming C preprocessor: token pasting, stringization
//! and computed includes are not interpreted. Unknown constructs degrade
//! to opaque tokens, which still feed the hash, so canonical-TU election
//! stays sound.

pub mod cond;
pub mod history;
pub mod lexer;

use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use std::path::Path;

use seahash::SeaHasher;
use tracing::debug;

use crate::compdb::Language;
use crate::error::{IndexError, IndexResult};
use crate::ipc::{PreprocessedFileInfo, PreprocessedFileInfoMulti};
use crate::types::{AbsolutePath, FileRange, HashValue, RootPath, StableFileId};

use lexer::{LogicalLine, Tok, TokKind};

pub use history::HistoryRecorder;

/// Opaque per-TU file handle. Only meaningful while the owning
/// [`FileTable`] is alive; translate to [`StableFileId`] before crossing a
/// TU boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(u32);

#[derive(Debug)]
struct FileEntry {
    path: AbsolutePath,
    stable: StableFileId,
}

/// Arena of files touched by one TU, interned by normalized absolute path.
#[derive(Debug)]
pub struct FileTable {
    root: RootPath,
    entries: Vec<FileEntry>,
    by_path: HashMap<AbsolutePath, FileId>,
}

impl FileTable {
    pub fn new(root: RootPath) -> Self {
        Self {
            root,
            entries: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    pub fn intern(&mut self, path: &AbsolutePath) -> FileId {
        if let Some(id) = self.by_path.get(path) {
            return *id;
        }
        let id = FileId(self.entries.len() as u32);
        self.entries.push(FileEntry {
            path: path.clone(),
            stable: StableFileId::from_absolute(&self.root, path),
        });
        self.by_path.insert(path.clone(), id);
        id
    }

    pub fn lookup(&self, path: &AbsolutePath) -> Option<FileId> {
        self.by_path.get(path).copied()
    }

    pub fn path(&self, id: FileId) -> &AbsolutePath {
        &self.entries[id.0 as usize].path
    }

    pub fn stable_id(&self, id: FileId) -> &StableFileId {
        &self.entries[id.0 as usize].stable
    }

    pub fn root(&self) -> &RootPath {
        &self.root
    }

    pub fn iter(&self) -> impl Iterator<Item = FileId> + '_ {
        (0..self.entries.len() as u32).map(FileId)
    }
}

/// Handle into the macro-definition arena. Pointer-stable for the TU's
/// lifetime, so it can stand in for definition identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacroId(u32);

#[derive(Debug)]
pub struct MacroDefinitionRecord {
    pub name: String,
    /// `None` for object-like macros.
    pub params: Option<Vec<String>>,
    pub body: Vec<Tok>,
    /// Definition site; `None` for command-line and builtin macros.
    pub site: Option<(FileId, FileRange)>,
}

impl MacroDefinitionRecord {
    pub fn is_file_based(&self) -> bool {
        self.site.is_some()
    }
}

/// Arena of macro definitions plus the live name→definition environment.
/// Records are never removed; `#undef` only drops the name binding, so
/// occurrence data can keep referring to dead definitions.
#[derive(Debug, Default)]
pub struct MacroTable {
    records: Vec<MacroDefinitionRecord>,
    by_name: HashMap<String, MacroId>,
}

impl MacroTable {
    pub fn define(&mut self, record: MacroDefinitionRecord) -> MacroId {
        let id = MacroId(self.records.len() as u32);
        self.by_name.insert(record.name.clone(), id);
        self.records.push(record);
        id
    }

    pub fn undefine(&mut self, name: &str) -> Option<MacroId> {
        self.by_name.remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<MacroId> {
        self.by_name.get(name).copied()
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn record(&self, id: MacroId) -> &MacroDefinitionRecord {
        &self.records[id.0 as usize]
    }
}

/// Receiver for preprocessor events. The file table is passed alongside so
/// implementations can resolve paths without holding their own copy.
pub trait PpObserver {
    fn file_entered(&mut self, _files: &FileTable, _file: FileId) {}
    fn file_exited(&mut self, _files: &FileTable, _file: FileId, _hash: HashValue) {}
    fn include_resolved(
        &mut self,
        _files: &FileTable,
        _file: FileId,
        _range: FileRange,
        _target: FileId,
    ) {
    }
    fn macro_defined(
        &mut self,
        _files: &FileTable,
        _macros: &MacroTable,
        _file: FileId,
        _range: FileRange,
        _def: MacroId,
    ) {
    }
    fn macro_undefined(
        &mut self,
        _files: &FileTable,
        _macros: &MacroTable,
        _file: FileId,
        _range: FileRange,
        _def: MacroId,
    ) {
    }
    fn macro_expanded(
        &mut self,
        _files: &FileTable,
        _macros: &MacroTable,
        _file: FileId,
        _range: FileRange,
        _def: MacroId,
    ) {
    }
}

/// Configuration derived from one compile command.
#[derive(Debug, Clone)]
pub struct PpOptions {
    pub language: Language,
    pub include_dirs: Vec<AbsolutePath>,
    pub defines: Vec<(String, String)>,
    pub undefs: Vec<String>,
}

/// Everything the preprocessor learned about one TU.
pub struct PpTuOutput {
    pub files: FileTable,
    pub macros: MacroTable,
    pub main_file: FileId,
    pub well_behaved: Vec<PreprocessedFileInfo>,
    pub ill_behaved: Vec<PreprocessedFileInfoMulti>,
}

const MAX_INCLUDE_DEPTH: usize = 200;

enum OnceGuard {
    PragmaOnce,
    Macro(String),
}

struct CondFrame {
    active: bool,
    taken: bool,
    parent_active: bool,
}

pub struct Preprocessor<'obs> {
    files: FileTable,
    macros: MacroTable,
    options: PpOptions,
    observers: Vec<&'obs mut dyn PpObserver>,
    include_stack: Vec<AbsolutePath>,
    once_guards: HashMap<AbsolutePath, OnceGuard>,
    observed: Vec<(AbsolutePath, HashValue)>,
}

impl<'obs> Preprocessor<'obs> {
    pub fn new(
        root: RootPath,
        options: PpOptions,
        observers: Vec<&'obs mut dyn PpObserver>,
    ) -> Self {
        let mut pp = Self {
            files: FileTable::new(root),
            macros: MacroTable::default(),
            options,
            observers,
            include_stack: Vec::new(),
            once_guards: HashMap::new(),
            observed: Vec::new(),
        };
        pp.install_initial_macros();
        pp
    }

    fn install_initial_macros(&mut self) {
        match self.options.language {
            Language::Cpp => self.define_non_file_based("__cplusplus", "201703L"),
            Language::C => self.define_non_file_based("__STDC__", "1"),
        }
        let defines = self.options.defines.clone();
        for (name, value) in defines {
            self.define_non_file_based(&name, &value);
        }
        let undefs = self.options.undefs.clone();
        for name in undefs {
            self.macros.undefine(&name);
        }
    }

    fn define_non_file_based(&mut self, name: &str, value: &str) {
        let body = lexer::logical_lines(value)
            .into_iter()
            .flat_map(|line| line.tokens)
            .collect();
        self.macros.define(MacroDefinitionRecord {
            name: name.to_string(),
            params: None,
            body,
            site: None,
        });
    }

    /// Run over the main file of the TU and classify every entered file.
    pub fn process(mut self, main_file: &AbsolutePath) -> IndexResult<PpTuOutput> {
        let hash = self.process_file(main_file)?;
        debug!(file = %main_file, %hash, "finished preprocessing");
        let main_id = self
            .files
            .lookup(main_file)
            .expect("main file was interned during processing");

        // Classify: one distinct hash per path is well-behaved, more than
        // one is ill-behaved.
        let mut per_path: HashMap<AbsolutePath, Vec<HashValue>> = HashMap::new();
        for (path, hash) in &self.observed {
            let hashes = per_path.entry(path.clone()).or_default();
            if !hashes.contains(hash) {
                hashes.push(*hash);
            }
        }
        let mut well_behaved = Vec::new();
        let mut ill_behaved = Vec::new();
        for (path, mut hashes) in per_path {
            if hashes.len() == 1 {
                well_behaved.push(PreprocessedFileInfo {
                    path,
                    hash_value: hashes[0],
                });
            } else {
                hashes.sort();
                ill_behaved.push(PreprocessedFileInfoMulti {
                    path,
                    hash_values: hashes,
                });
            }
        }
        well_behaved.sort();
        ill_behaved.sort();

        Ok(PpTuOutput {
            files: self.files,
            macros: self.macros,
            main_file: main_id,
            well_behaved,
            ill_behaved,
        })
    }

    fn process_file(&mut self, path: &AbsolutePath) -> IndexResult<HashValue> {
        let content =
            std::fs::read_to_string(path.as_path()).map_err(|source| IndexError::FileRead {
                path: path.as_path().to_path_buf(),
                source,
            })?;
        let file = self.files.intern(path);
        self.include_stack.push(path.clone());
        self.emit(|obs, files, _| obs.file_entered(files, file));

        let lines = lexer::logical_lines(&content);
        let mut hasher = SeaHasher::new();
        let mut frames: Vec<CondFrame> = Vec::new();
        let mut guard_candidate: Option<String> = None;
        let mut guard_closed = false;

        for (index, line) in lines.iter().enumerate() {
            let active = frames.last().is_none_or(|f| f.active);

            if line.is_directive() {
                match line.directive_name() {
                    Some("if") | Some("ifdef") | Some("ifndef") => {
                        let name = line.directive_name().unwrap();
                        let condition = if active {
                            self.evaluate_condition(name, &line.tokens[2..], file)
                        } else {
                            false
                        };
                        if index == 0 && name == "ifndef" {
                            if let Some(tok) = line.tokens.get(2) {
                                guard_candidate = Some(tok.text.clone());
                            }
                        }
                        frames.push(CondFrame {
                            active: active && condition,
                            // An inactive parent poisons the whole group.
                            taken: condition || !active,
                            parent_active: active,
                        });
                        if active {
                            mix_tokens(&mut hasher, &line.tokens);
                        }
                        continue;
                    }
                    Some("elif") => {
                        let reconsider = frames
                            .last()
                            .is_some_and(|f| !f.taken && f.parent_active);
                        let condition =
                            reconsider && self.evaluate_condition("elif", &line.tokens[2..], file);
                        if let Some(frame) = frames.last_mut() {
                            frame.active = condition;
                            frame.taken |= condition;
                            if frame.parent_active {
                                mix_tokens(&mut hasher, &line.tokens);
                            }
                        }
                        continue;
                    }
                    Some("else") => {
                        if let Some(frame) = frames.last_mut() {
                            frame.active = frame.parent_active && !frame.taken;
                            frame.taken = true;
                        }
                        continue;
                    }
                    Some("endif") => {
                        frames.pop();
                        if frames.is_empty() && guard_candidate.is_some() {
                            guard_closed = true;
                        }
                        continue;
                    }
                    _ => {}
                }

                if !active {
                    continue;
                }
                // Content after the guard's #endif disqualifies it.
                if guard_closed {
                    guard_candidate = None;
                    guard_closed = false;
                }
                self.handle_directive(file, line, &mut hasher)?;
                continue;
            }

            if !active {
                continue;
            }
            if guard_closed {
                guard_candidate = None;
                guard_closed = false;
            }
            // Ordinary text line: expand and fold into the hash.
            let mut expanded = Vec::new();
            let mut active_macros = Vec::new();
            let mut ctx = ExpandCtx {
                macros: &self.macros,
                files: &self.files,
                observers: &mut self.observers,
                emit_events: true,
            };
            expand_tokens(&mut ctx, file, &line.tokens, &mut active_macros, &mut expanded);
            mix_tokens(&mut hasher, &expanded);
        }

        let hash = HashValue(hasher.finish());
        if let Some(name) = guard_candidate {
            if (guard_closed || frames.is_empty()) && self.macros.is_defined(&name) {
                self.once_guards
                    .insert(path.clone(), OnceGuard::Macro(name));
            }
        }
        self.observed.push((path.clone(), hash));
        self.emit(|obs, files, _| obs.file_exited(files, file, hash));
        self.include_stack.pop();
        Ok(hash)
    }

    fn handle_directive(
        &mut self,
        file: FileId,
        line: &LogicalLine,
        hasher: &mut SeaHasher,
    ) -> IndexResult<()> {
        match line.directive_name() {
            Some("include") => self.handle_include(file, line, hasher),
            Some("define") => {
                mix_tokens(hasher, &line.tokens);
                self.handle_define(file, line);
                Ok(())
            }
            Some("undef") => {
                mix_tokens(hasher, &line.tokens);
                if let Some(tok) = line.tokens.get(2) {
                    if let Some(id) = self.macros.undefine(&tok.text) {
                        let range = token_range(tok);
                        self.emit(|obs, files, macros| {
                            obs.macro_undefined(files, macros, file, range, id)
                        });
                    }
                }
                Ok(())
            }
            Some("pragma") => {
                mix_tokens(hasher, &line.tokens);
                if line.tokens.get(2).is_some_and(|t| t.is_ident("once")) {
                    let path = self.files.path(file).clone();
                    self.once_guards.insert(path, OnceGuard::PragmaOnce);
                }
                Ok(())
            }
            _ => {
                // #error, #warning, #line and friends: hashed, not interpreted.
                mix_tokens(hasher, &line.tokens);
                Ok(())
            }
        }
    }

    fn handle_include(
        &mut self,
        file: FileId,
        line: &LogicalLine,
        hasher: &mut SeaHasher,
    ) -> IndexResult<()> {
        hasher.write(b"#include\x1f");
        let Some((spec, quoted, range)) = parse_include_spec(&line.tokens) else {
            debug!(file = %self.files.path(file), "uninterpretable include, hashing raw tokens");
            mix_tokens(hasher, &line.tokens);
            return Ok(());
        };
        let includer = self.files.path(file).clone();
        let Some(target) = self.resolve_include(&includer, &spec, quoted) else {
            debug!(file = %includer, include = %spec, "include not found");
            hasher.write(spec.as_bytes());
            return Ok(());
        };
        hasher.write(target.to_string().as_bytes());

        let target_id = self.files.intern(&target);
        self.emit(|obs, files, _| obs.include_resolved(files, file, range, target_id));

        if self.skip_by_guard(&target) {
            hasher.write(b"\x1fguarded");
            return Ok(());
        }
        if self.include_stack.contains(&target) {
            debug!(file = %includer, include = %target, "include cycle, skipping");
            hasher.write(b"\x1fcycle");
            return Ok(());
        }
        if self.include_stack.len() >= MAX_INCLUDE_DEPTH {
            debug!(file = %includer, include = %target, "include depth limit reached");
            hasher.write(b"\x1fdepth");
            return Ok(());
        }
        let child_hash = self.process_file(&target)?;
        hasher.write_u64(child_hash.0);
        Ok(())
    }

    fn skip_by_guard(&self, path: &AbsolutePath) -> bool {
        match self.once_guards.get(path) {
            Some(OnceGuard::PragmaOnce) => true,
            Some(OnceGuard::Macro(name)) => self.macros.is_defined(name),
            None => false,
        }
    }

    fn resolve_include(
        &self,
        includer: &AbsolutePath,
        spec: &str,
        quoted: bool,
    ) -> Option<AbsolutePath> {
        if quoted {
            if let Some(dir) = includer.parent() {
                let candidate = dir.join(Path::new(spec));
                if candidate.as_path().is_file() {
                    return Some(candidate);
                }
            }
        }
        for dir in &self.options.include_dirs {
            let candidate = dir.join(Path::new(spec));
            if candidate.as_path().is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn handle_define(&mut self, file: FileId, line: &LogicalLine) {
        let Some(name_tok) = line.tokens.get(2) else {
            return;
        };
        if name_tok.kind != TokKind::Ident {
            return;
        }
        let mut params = None;
        let mut body_start = 3;
        // Function-like iff '(' immediately follows the name.
        if let Some(paren) = line.tokens.get(3) {
            if paren.is_punct("(")
                && paren.line == name_tok.line
                && paren.col == name_tok.end_col() + 1
            {
                let mut names = Vec::new();
                let mut index = 4;
                while let Some(tok) = line.tokens.get(index) {
                    if tok.is_punct(")") {
                        index += 1;
                        break;
                    }
                    if tok.kind == TokKind::Ident || tok.is_punct("...") {
                        names.push(tok.text.clone());
                    }
                    index += 1;
                }
                params = Some(names);
                body_start = index;
            }
        }
        let record = MacroDefinitionRecord {
            name: name_tok.text.clone(),
            params,
            body: line.tokens[body_start.min(line.tokens.len())..].to_vec(),
            site: Some((file, token_range(name_tok))),
        };
        let range = token_range(name_tok);
        let id = self.macros.define(record);
        self.emit(|obs, files, macros| obs.macro_defined(files, macros, file, range, id));
    }

    fn evaluate_condition(&mut self, directive: &str, tokens: &[Tok], file: FileId) -> bool {
        match directive {
            "ifdef" => tokens
                .first()
                .is_some_and(|t| self.macros.is_defined(&t.text)),
            "ifndef" => tokens
                .first()
                .is_some_and(|t| !self.macros.is_defined(&t.text)),
            _ => {
                let substituted = self.substitute_defined(tokens);
                let mut expanded = Vec::new();
                let mut active = Vec::new();
                let mut ctx = ExpandCtx {
                    macros: &self.macros,
                    files: &self.files,
                    observers: &mut self.observers,
                    // Conditional evaluation is speculative; occurrences come
                    // only from retained text.
                    emit_events: false,
                };
                expand_tokens(&mut ctx, file, &substituted, &mut active, &mut expanded);
                cond::evaluate(&expanded)
            }
        }
    }

    /// Replace `defined NAME` and `defined(NAME)` before macro expansion.
    fn substitute_defined(&self, tokens: &[Tok]) -> Vec<Tok> {
        let mut out = Vec::new();
        let mut index = 0;
        while index < tokens.len() {
            let tok = &tokens[index];
            if tok.is_ident("defined") {
                let (name, consumed) = match tokens.get(index + 1) {
                    Some(paren) if paren.is_punct("(") => {
                        (tokens.get(index + 2).map(|t| t.text.clone()), 4)
                    }
                    Some(name) if name.kind == TokKind::Ident => (Some(name.text.clone()), 2),
                    _ => (None, 1),
                };
                let value = name.is_some_and(|n| self.macros.is_defined(&n));
                out.push(Tok {
                    kind: TokKind::Number,
                    text: if value { "1" } else { "0" }.to_string(),
                    line: tok.line,
                    col: tok.col,
                });
                index += consumed;
            } else {
                out.push(tok.clone());
                index += 1;
            }
        }
        out
    }

    fn emit<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut dyn PpObserver, &FileTable, &MacroTable),
    {
        let files = &self.files;
        let macros = &self.macros;
        for obs in &mut self.observers {
            f(&mut **obs, files, macros);
        }
    }
}

struct ExpandCtx<'a, 'obs> {
    macros: &'a MacroTable,
    files: &'a FileTable,
    observers: &'a mut Vec<&'obs mut dyn PpObserver>,
    emit_events: bool,
}

impl ExpandCtx<'_, '_> {
    fn emit_expansion(&mut self, file: FileId, range: FileRange, def: MacroId) {
        if !self.emit_events {
            return;
        }
        for obs in &mut *self.observers {
            obs.macro_expanded(self.files, self.macros, file, range, def);
        }
    }
}

/// Expand `tokens` (spelled in `file`) into `out`, firing expansion events.
///
/// Tokens originating from a macro body are attributed to the definition
/// site's file, so the same inner occurrence reported from repeated
/// expansions lands on the same range every time.
fn expand_tokens(
    ctx: &mut ExpandCtx<'_, '_>,
    file: FileId,
    tokens: &[Tok],
    active: &mut Vec<String>,
    out: &mut Vec<Tok>,
) {
    let mut index = 0;
    while index < tokens.len() {
        let tok = &tokens[index];
        index += 1;
        if tok.kind != TokKind::Ident {
            out.push(tok.clone());
            continue;
        }
        let Some(id) = ctx.macros.lookup(&tok.text) else {
            out.push(tok.clone());
            continue;
        };
        if active.contains(&tok.text) {
            // Self-referential macros stop expanding, as in the standard.
            out.push(tok.clone());
            continue;
        }
        let record = ctx.macros.record(id);

        let args = if record.params.is_some() {
            match collect_macro_args(tokens, &mut index) {
                Some(args) => Some(args),
                None => {
                    // Function-like macro named without an argument list.
                    out.push(tok.clone());
                    continue;
                }
            }
        } else {
            None
        };

        ctx.emit_expansion(file, token_range(tok), id);

        // Arguments expand in the caller's file before substitution.
        let expanded_args: Vec<Vec<Tok>> = args
            .map(|args| {
                args.iter()
                    .map(|arg| {
                        let mut expanded = Vec::new();
                        expand_tokens(ctx, file, arg, active, &mut expanded);
                        expanded
                    })
                    .collect()
            })
            .unwrap_or_default();

        let body_file = record.site.map(|(f, _)| f);
        active.push(record.name.clone());
        expand_body(ctx, record, body_file, &expanded_args, active, out);
        active.pop();
    }
}

fn expand_body(
    ctx: &mut ExpandCtx<'_, '_>,
    record: &MacroDefinitionRecord,
    body_file: Option<FileId>,
    args: &[Vec<Tok>],
    active: &mut Vec<String>,
    out: &mut Vec<Tok>,
) {
    let params = record.params.as_deref().unwrap_or(&[]);
    let mut index = 0;
    while index < record.body.len() {
        let tok = &record.body[index];
        index += 1;
        if tok.kind == TokKind::Ident {
            if let Some(position) = params.iter().position(|p| p == &tok.text) {
                if let Some(arg) = args.get(position) {
                    out.extend(arg.iter().cloned());
                }
                continue;
            }
            if let Some(id) = ctx.macros.lookup(&tok.text) {
                if !active.contains(&tok.text) {
                    let inner = ctx.macros.record(id);
                    let inner_args = if inner.params.is_some() {
                        collect_macro_args(&record.body, &mut index)
                    } else {
                        None
                    };
                    if inner.params.is_some() && inner_args.is_none() {
                        out.push(tok.clone());
                        continue;
                    }
                    // Attribute the nested reference to the body token's
                    // own definition file, when there is one.
                    if let Some(body_file) = body_file {
                        ctx.emit_expansion(body_file, token_range(tok), id);
                    }
                    let expanded_args: Vec<Vec<Tok>> = inner_args
                        .map(|raw| {
                            raw.iter()
                                .map(|arg| {
                                    let mut expanded = Vec::new();
                                    if let Some(body_file) = body_file {
                                        expand_tokens(ctx, body_file, arg, active, &mut expanded);
                                    } else {
                                        expanded.extend(arg.iter().cloned());
                                    }
                                    expanded
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    let inner_body_file = inner.site.map(|(f, _)| f);
                    active.push(inner.name.clone());
                    expand_body(ctx, inner, inner_body_file, &expanded_args, active, out);
                    active.pop();
                    continue;
                }
            }
        }
        out.push(tok.clone());
    }
}

/// Collect `(a, b, ...)` argument lists starting at `tokens[*index]`.
/// Leaves `index` past the closing parenthesis on success.
fn collect_macro_args(tokens: &[Tok], index: &mut usize) -> Option<Vec<Vec<Tok>>> {
    if !tokens.get(*index)?.is_punct("(") {
        return None;
    }
    let mut cursor = *index + 1;
    let mut depth = 1usize;
    let mut args: Vec<Vec<Tok>> = vec![Vec::new()];
    while let Some(tok) = tokens.get(cursor) {
        cursor += 1;
        if tok.is_punct("(") {
            depth += 1;
        } else if tok.is_punct(")") {
            depth -= 1;
            if depth == 0 {
                *index = cursor;
                if args.len() == 1 && args[0].is_empty() {
                    args.clear();
                }
                return Some(args);
            }
        } else if tok.is_punct(",") && depth == 1 {
            args.push(Vec::new());
            continue;
        }
        args.last_mut().unwrap().push(tok.clone());
    }
    None
}

fn parse_include_spec(tokens: &[Tok]) -> Option<(String, bool, FileRange)> {
    let first = tokens.get(2)?;
    if first.kind == TokKind::Str {
        let spec = first.text.trim_matches('"').to_string();
        return Some((spec, true, token_range(first)));
    }
    if first.is_punct("<") {
        let mut spec = String::new();
        let mut last = first;
        for tok in &tokens[3..] {
            if tok.is_punct(">") {
                last = tok;
                break;
            }
            spec.push_str(&tok.text);
            last = tok;
        }
        let range = FileRange::new(first.line, first.col, last.line, last.end_col());
        return Some((spec, false, range));
    }
    None
}

fn token_range(tok: &Tok) -> FileRange {
    FileRange::new(tok.line, tok.col, tok.line, tok.end_col())
}

fn mix_tokens(hasher: &mut SeaHasher, tokens: &[Tok]) {
    for tok in tokens {
        hasher.write(tok.text.as_bytes());
        hasher.write_u8(0x1f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct EventLog {
        defined: Vec<(String, u32)>,
        expanded: Vec<(String, u32, u32)>,
        includes: Vec<String>,
        entered: Vec<String>,
    }

    impl EventLog {
        fn new() -> Self {
            Self {
                defined: Vec::new(),
                expanded: Vec::new(),
                includes: Vec::new(),
                entered: Vec::new(),
            }
        }
    }

    impl PpObserver for EventLog {
        fn file_entered(&mut self, files: &FileTable, file: FileId) {
            self.entered.push(files.path(file).to_string());
        }
        fn include_resolved(
            &mut self,
            files: &FileTable,
            _file: FileId,
            _range: FileRange,
            target: FileId,
        ) {
            self.includes.push(files.path(target).to_string());
        }
        fn macro_defined(
            &mut self,
            _files: &FileTable,
            macros: &MacroTable,
            _file: FileId,
            range: FileRange,
            def: MacroId,
        ) {
            self.defined.push((macros.record(def).name.clone(), range.start_line));
        }
        fn macro_expanded(
            &mut self,
            _files: &FileTable,
            macros: &MacroTable,
            _file: FileId,
            range: FileRange,
            def: MacroId,
        ) {
            self.expanded
                .push((macros.record(def).name.clone(), range.start_line, range.start_column));
        }
    }

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
            }
        }

        fn write(&self, name: &str, content: &str) -> AbsolutePath {
            let path = self.dir.path().join(name);
            fs::write(&path, content).unwrap();
            AbsolutePath::new(&path).unwrap()
        }

        fn root(&self) -> RootPath {
            RootPath::new(AbsolutePath::new(self.dir.path()).unwrap())
        }

        fn options(&self) -> PpOptions {
            PpOptions {
                language: Language::Cpp,
                include_dirs: vec![AbsolutePath::new(self.dir.path()).unwrap()],
                defines: Vec::new(),
                undefs: Vec::new(),
            }
        }
    }

    fn run(fixture: &Fixture, main: &AbsolutePath, options: PpOptions) -> PpTuOutput {
        Preprocessor::new(fixture.root(), options, Vec::new())
            .process(main)
            .unwrap()
    }

    #[test]
    fn test_same_state_yields_same_hash() {
        let fx = Fixture::new();
        fx.write("h.h", "int g();\n");
        let a = fx.write("a.cpp", "#include \"h.h\"\nint a() { return g(); }\n");
        let b = fx.write("b.cpp", "#include \"h.h\"\nint b() { return g(); }\n");

        let out_a = run(&fx, &a, fx.options());
        let out_b = run(&fx, &b, fx.options());

        let header = fx.dir.path().join("h.h");
        let hash_of = |out: &PpTuOutput| {
            out.well_behaved
                .iter()
                .find(|info| info.path.as_path() == header)
                .map(|info| info.hash_value)
                .unwrap()
        };
        assert_eq!(hash_of(&out_a), hash_of(&out_b));
    }

    #[test]
    fn test_macro_state_changes_header_hash() {
        let fx = Fixture::new();
        fx.write("h.h", "int arr[X];\n");
        let a = fx.write("a.cpp", "#define X 1\n#include \"h.h\"\n");
        let b = fx.write("b.cpp", "#define X 2\n#include \"h.h\"\n");

        let out_a = run(&fx, &a, fx.options());
        let out_b = run(&fx, &b, fx.options());

        let header = fx.dir.path().join("h.h");
        let find = |out: &PpTuOutput| {
            out.well_behaved
                .iter()
                .find(|info| info.path.as_path() == header)
                .map(|info| info.hash_value)
                .unwrap()
        };
        assert_ne!(find(&out_a), find(&out_b));
    }

    #[test]
    fn test_conditional_branch_changes_hash() {
        let fx = Fixture::new();
        fx.write("h.h", "#if X == 1\nint one();\n#else\nint other();\n#endif\n");
        let a = fx.write("a.cpp", "#define X 1\n#include \"h.h\"\n");
        let b = fx.write("b.cpp", "#define X 2\n#include \"h.h\"\n");

        let out_a = run(&fx, &a, fx.options());
        let out_b = run(&fx, &b, fx.options());
        let header = fx.dir.path().join("h.h");
        let find = |out: &PpTuOutput| {
            out.well_behaved
                .iter()
                .find(|info| info.path.as_path() == header)
                .map(|info| info.hash_value)
                .unwrap()
        };
        assert_ne!(find(&out_a), find(&out_b));
    }

    #[test]
    fn test_ill_behaved_header_detected_within_one_tu() {
        let fx = Fixture::new();
        fx.write("h.h", "int arr[X];\n");
        let main = fx.write(
            "a.cpp",
            "#define X 1\n#include \"h.h\"\n#undef X\n#define X 2\n#include \"h.h\"\n",
        );

        let out = run(&fx, &main, fx.options());
        let header = fx.dir.path().join("h.h");
        let ill = out
            .ill_behaved
            .iter()
            .find(|info| info.path.as_path() == header)
            .expect("header should be ill-behaved");
        assert_eq!(ill.hash_values.len(), 2);
        assert!(ill.hash_values[0] < ill.hash_values[1]);
    }

    #[test]
    fn test_include_guard_suppresses_reentry() {
        let fx = Fixture::new();
        fx.write(
            "g.h",
            "#ifndef G_H\n#define G_H\nint g();\n#endif\n",
        );
        let main = fx.write("a.cpp", "#include \"g.h\"\n#include \"g.h\"\n");

        let mut log = EventLog::new();
        let pp = Preprocessor::new(fx.root(), fx.options(), vec![&mut log]);
        let out = pp.process(&main).unwrap();

        // Entered once, resolved twice, and well-behaved with one hash.
        let header = fx.dir.path().join("g.h");
        assert_eq!(
            log.entered.iter().filter(|p| p.ends_with("g.h")).count(),
            1
        );
        assert_eq!(log.includes.len(), 2);
        assert!(
            out.well_behaved
                .iter()
                .any(|info| info.path.as_path() == header)
        );
    }

    #[test]
    fn test_nested_macro_expansion_reports_inner_occurrence() {
        let fx = Fixture::new();
        let main = fx.write(
            "a.cpp",
            "#define A 0\n#define A2 (2 * A)\nint a4 = A2 * A2;\n",
        );

        let mut log = EventLog::new();
        let pp = Preprocessor::new(fx.root(), fx.options(), vec![&mut log]);
        pp.process(&main).unwrap();

        assert_eq!(log.defined.len(), 2);
        // Each A2 expansion also reports A at its spelling inside line 2,
        // at the same range both times.
        let inner: Vec<_> = log.expanded.iter().filter(|(n, _, _)| n == "A").collect();
        assert_eq!(inner.len(), 2);
        assert_eq!(inner[0], inner[1]);
        assert_eq!(inner[0].1, 2);
    }

    #[test]
    fn test_function_like_macro_arguments_expand_at_call_site() {
        let fx = Fixture::new();
        let main = fx.write(
            "a.cpp",
            "#define ID(x) x\n#define ONE 1\nint v = ID(ONE);\n",
        );

        let mut log = EventLog::new();
        let pp = Preprocessor::new(fx.root(), fx.options(), vec![&mut log]);
        pp.process(&main).unwrap();

        let one = log
            .expanded
            .iter()
            .find(|(n, _, _)| n == "ONE")
            .expect("ONE expands");
        // Reported at the argument's spelling on line 3.
        assert_eq!(one.1, 3);
    }

    #[test]
    fn test_cli_defines_participate() {
        let fx = Fixture::new();
        fx.write("h.h", "#if FLAG\nint flagged();\n#endif\n");
        let main = fx.write("a.cpp", "#include \"h.h\"\n");

        let mut with_flag = fx.options();
        with_flag.defines.push(("FLAG".to_string(), "1".to_string()));
        let out_with = run(&fx, &main, with_flag);
        let out_without = run(&fx, &main, fx.options());

        let header = fx.dir.path().join("h.h");
        let find = |out: &PpTuOutput| {
            out.well_behaved
                .iter()
                .find(|info| info.path.as_path() == header)
                .map(|info| info.hash_value)
                .unwrap()
        };
        assert_ne!(find(&out_with), find(&out_without));
    }
}
