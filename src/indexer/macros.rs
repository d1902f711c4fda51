//! Macro occurrence collection.
//!
//! Listens to preprocessor events and groups macro occurrences by file.
//! Occurrence identity is the range alone: expanding a macro whose body
//! expands other macros reports the same inner occurrence once per outer
//! expansion, and different code paths never emit different roles or
//! different macros at one range, so the range-keyed set deduplicates them.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::preprocessor::{FileId, FileTable, MacroId, MacroTable, PpObserver};
use crate::scip::{
    Document, Index, Occurrence, SymbolInformation, SymbolRole, compare_occurrences, syntax_kind,
};
use crate::types::FileRange;

use super::symbols::SymbolFormatter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Definition,
    Reference,
}

#[derive(Debug, Clone)]
pub struct MacroOccurrence {
    pub range: FileRange,
    pub def: MacroId,
    pub role: Role,
}

impl PartialEq for MacroOccurrence {
    fn eq(&self, other: &Self) -> bool {
        self.range == other.range
    }
}

impl Eq for MacroOccurrence {}

impl Hash for MacroOccurrence {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.range.hash(state);
    }
}

/// Accumulates macro occurrences and include ranges for one TU.
#[derive(Debug, Default)]
pub struct MacroIndexer {
    table: HashMap<FileId, HashSet<MacroOccurrence>>,
    /// Command-line and builtin macros referenced anywhere in the TU; they
    /// have no definition site and become external symbols.
    non_file_based: HashSet<MacroId>,
    include_ranges: HashMap<FileId, Vec<(FileRange, FileId)>>,
}

impl MacroIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    fn save_occurrence(&mut self, file: FileId, range: FileRange, def: MacroId, role: Role) {
        self.table
            .entry(file)
            .or_default()
            .insert(MacroOccurrence { range, def, role });
    }

    pub fn includes_in_file(&self, file: FileId) -> &[(FileRange, FileId)] {
        self.include_ranges
            .get(&file)
            .map_or(&[], |ranges| ranges.as_slice())
    }

    fn macro_symbol(
        &self,
        files: &FileTable,
        macros: &MacroTable,
        formatter: &SymbolFormatter,
        def: MacroId,
    ) -> String {
        let record = macros.record(def);
        match record.site {
            Some((file, range)) => formatter.macro_symbol(
                &record.name,
                Some((files.stable_id(file), range.start_line, range.start_column)),
            ),
            None => formatter.macro_symbol(&record.name, None),
        }
    }

    /// Emit this file's macro occurrences into its document, with
    /// definition symbol information for macros defined here.
    pub fn emit_document_occurrences(
        &self,
        deterministic: bool,
        files: &FileTable,
        macros: &MacroTable,
        formatter: &SymbolFormatter,
        file: FileId,
        document: &mut Document,
    ) {
        let Some(occurrences) = self.table.get(&file) else {
            return;
        };
        let mut emitted: Vec<Occurrence> = occurrences
            .iter()
            .map(|occ| {
                let roles = match occ.role {
                    Role::Definition => SymbolRole::DEFINITION.bits(),
                    Role::Reference => 0,
                };
                Occurrence {
                    range: occ.range.to_scip_range(),
                    symbol: self.macro_symbol(files, macros, formatter, occ.def),
                    symbol_roles: roles,
                    syntax_kind: syntax_kind::IDENTIFIER_MACRO,
                    ..Default::default()
                }
            })
            .collect();
        if deterministic {
            emitted.sort_by(compare_occurrences);
        }

        for occ in occurrences {
            if occ.role == Role::Definition {
                let record = macros.record(occ.def);
                document.symbols.push(SymbolInformation {
                    symbol: self.macro_symbol(files, macros, formatter, occ.def),
                    display_name: record.name.clone(),
                    ..Default::default()
                });
            }
        }
        if deterministic {
            document.symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        }
        document.occurrences.extend(emitted);
    }

    /// Emit symbol information for non-file-based macros into the index's
    /// external symbols.
    pub fn emit_external_symbols(
        &self,
        deterministic: bool,
        files: &FileTable,
        macros: &MacroTable,
        formatter: &SymbolFormatter,
        index: &mut Index,
    ) {
        let mut defs: Vec<MacroId> = self.non_file_based.iter().copied().collect();
        if deterministic {
            defs.sort_by(|a, b| {
                macros
                    .record(*a)
                    .name
                    .cmp(&macros.record(*b).name)
                    .then(a.cmp(b))
            });
        }
        for def in defs {
            let record = macros.record(def);
            index.external_symbols.push(SymbolInformation {
                symbol: self.macro_symbol(files, macros, formatter, def),
                display_name: record.name.clone(),
                ..Default::default()
            });
        }
    }
}

impl PpObserver for MacroIndexer {
    fn include_resolved(
        &mut self,
        _files: &FileTable,
        file: FileId,
        range: FileRange,
        target: FileId,
    ) {
        self.include_ranges
            .entry(file)
            .or_default()
            .push((range, target));
    }

    fn macro_defined(
        &mut self,
        _files: &FileTable,
        macros: &MacroTable,
        file: FileId,
        range: FileRange,
        def: MacroId,
    ) {
        if macros.record(def).is_file_based() {
            self.save_occurrence(file, range, def, Role::Definition);
        } else {
            self.non_file_based.insert(def);
        }
    }

    fn macro_undefined(
        &mut self,
        _files: &FileTable,
        macros: &MacroTable,
        file: FileId,
        range: FileRange,
        def: MacroId,
    ) {
        if macros.record(def).is_file_based() {
            self.save_occurrence(file, range, def, Role::Reference);
        } else {
            self.non_file_based.insert(def);
        }
    }

    fn macro_expanded(
        &mut self,
        _files: &FileTable,
        macros: &MacroTable,
        file: FileId,
        range: FileRange,
        def: MacroId,
    ) {
        if macros.record(def).is_file_based() {
            self.save_occurrence(file, range, def, Role::Reference);
        } else {
            // The reference is still visible in the file; the definition
            // itself only exists as an external symbol.
            self.save_occurrence(file, range, def, Role::Reference);
            self.non_file_based.insert(def);
        }
    }
}
