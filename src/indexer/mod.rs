//! Per-translation-unit indexing state.
//!
//! The worker runs the preprocessor (macro occurrences, hashes) and the AST
//! walk (semantic occurrences) over one TU, both feeding a [`TuIndexer`]
//! that partitions output by file. Only files the TU owns produce
//! occurrences; definitions in owned files outside the project root become
//! external symbols, and everything else is left to the TU that owns it.

pub mod ast;
pub mod macros;
pub mod symbols;

use std::collections::{HashMap, HashSet};

use crate::preprocessor::{FileId, FileTable};
use crate::scip::{
    Document, Index, Occurrence, Relationship, SymbolInformation, SymbolRole,
    compare_occurrences, syntax_kind,
};
use crate::types::FileRange;

pub use macros::MacroIndexer;
pub use symbols::{Descriptor, SymbolFormatter};

/// Documentation extracted from the comment preceding a declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocComment {
    pub lines: Vec<String>,
}

impl DocComment {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Occurrences and symbol information accumulated for one file.
///
/// A vector of occurrences suffices here (unlike the merge builders'
/// sets): each AST node is traversed once, and the only duplicate source,
/// a reference colliding with a definition site, is filtered on save.
#[derive(Debug, Default)]
struct PartialDocument {
    occurrences: Vec<Occurrence>,
    symbol_infos: HashMap<String, SymbolInformation>,
    definition_sites: HashSet<(FileRange, String)>,
}

/// Per-TU accumulator the AST walk and include handling write into.
pub struct TuIndexer<'a> {
    files: &'a FileTable,
    formatter: &'a SymbolFormatter,
    owned: HashSet<FileId>,
    documents: HashMap<FileId, PartialDocument>,
    external_symbols: HashMap<String, SymbolInformation>,
    forward_declarations: HashMap<String, (String, DocComment)>,
}

impl<'a> TuIndexer<'a> {
    pub fn new(
        files: &'a FileTable,
        formatter: &'a SymbolFormatter,
        owned: HashSet<FileId>,
    ) -> Self {
        Self {
            files,
            formatter,
            owned,
            documents: HashMap::new(),
            external_symbols: HashMap::new(),
            forward_declarations: HashMap::new(),
        }
    }

    pub fn files(&self) -> &FileTable {
        self.files
    }

    pub fn formatter(&self) -> &SymbolFormatter {
        self.formatter
    }

    pub fn owns(&self, file: FileId) -> bool {
        self.owned.contains(&file)
    }

    fn emits_document_for(&self, file: FileId) -> bool {
        self.owns(file) && self.files.stable_id(file).is_in_project()
    }

    /// Emit a fake definition for a file itself, targetable by
    /// go-to-definition from `#include` lines.
    pub fn save_synthetic_file_definition(&mut self, file: FileId) {
        if !self.emits_document_for(file) {
            return;
        }
        let symbol = self.formatter.file_symbol(self.files.stable_id(file));
        let display_name = self.files.stable_id(file).display_path();
        let doc = self.documents.entry(file).or_default();
        doc.occurrences.push(Occurrence {
            range: FileRange::make_empty(1, 1).to_scip_range(),
            symbol: symbol.clone(),
            symbol_roles: SymbolRole::DEFINITION.bits(),
            syntax_kind: syntax_kind::IDENTIFIER_FILE,
            ..Default::default()
        });
        doc.symbol_infos.entry(symbol).or_insert(SymbolInformation {
            display_name,
            ..Default::default()
        });
    }

    /// Reference from an `#include` directive to the included file.
    pub fn save_include(&mut self, file: FileId, range: FileRange, target: FileId) {
        if !self.emits_document_for(file) {
            return;
        }
        let symbol = self.formatter.file_symbol(self.files.stable_id(target));
        let doc = self.documents.entry(file).or_default();
        doc.occurrences.push(Occurrence {
            range: range.to_scip_range(),
            symbol,
            syntax_kind: syntax_kind::IDENTIFIER_FILE,
            ..Default::default()
        });
    }

    /// Record a definition occurrence plus its symbol information.
    ///
    /// Definitions in owned project files land in the file's document;
    /// definitions in owned out-of-project files become external symbols;
    /// definitions in files owned by other TUs are skipped entirely.
    pub fn save_definition(
        &mut self,
        file: FileId,
        range: FileRange,
        symbol: &str,
        display_name: &str,
        doc_comment: DocComment,
        relationships: Vec<Relationship>,
        syntax: i32,
    ) {
        if !self.owns(file) {
            return;
        }
        if !self.files.stable_id(file).is_in_project() {
            let info = self
                .external_symbols
                .entry(symbol.to_string())
                .or_insert_with(|| SymbolInformation {
                    symbol: symbol.to_string(),
                    display_name: display_name.to_string(),
                    ..Default::default()
                });
            if info.documentation.is_empty() {
                info.documentation = doc_comment.lines;
            }
            for rel in relationships {
                if !info.relationships.contains(&rel) {
                    info.relationships.push(rel);
                }
            }
            return;
        }

        let doc = self.documents.entry(file).or_default();
        doc.occurrences.push(Occurrence {
            range: range.to_scip_range(),
            symbol: symbol.to_string(),
            symbol_roles: SymbolRole::DEFINITION.bits(),
            syntax_kind: syntax,
            ..Default::default()
        });
        doc.definition_sites.insert((range, symbol.to_string()));
        let info = doc
            .symbol_infos
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolInformation {
                display_name: display_name.to_string(),
                ..Default::default()
            });
        if info.documentation.is_empty() {
            info.documentation = doc_comment.lines;
        }
        for rel in relationships {
            if !info.relationships.contains(&rel) {
                info.relationships.push(rel);
            }
        }
    }

    /// Record a reference occurrence.
    ///
    /// A reference located exactly at a definition site of the same symbol
    /// is dropped; the definition occurrence already covers it.
    pub fn save_reference(&mut self, file: FileId, range: FileRange, symbol: &str, syntax: i32) {
        if !self.emits_document_for(file) {
            return;
        }
        let doc = self.documents.entry(file).or_default();
        if doc.definition_sites.contains(&(range, symbol.to_string())) {
            return;
        }
        doc.occurrences.push(Occurrence {
            range: range.to_scip_range(),
            symbol: symbol.to_string(),
            syntax_kind: syntax,
            ..Default::default()
        });
    }

    /// Record a forward declaration: an occurrence with the
    /// forward-definition role, plus documentation destined for the
    /// forward-declarations shard.
    pub fn save_forward_declaration(
        &mut self,
        file: FileId,
        range: FileRange,
        symbol: &str,
        display_name: &str,
        doc_comment: DocComment,
        syntax: i32,
    ) {
        if !self.owns(file) {
            return;
        }
        if self.files.stable_id(file).is_in_project() {
            let doc = self.documents.entry(file).or_default();
            doc.occurrences.push(Occurrence {
                range: range.to_scip_range(),
                symbol: symbol.to_string(),
                symbol_roles: SymbolRole::FORWARD_DEFINITION.bits(),
                syntax_kind: syntax,
                ..Default::default()
            });
        }
        let entry = self
            .forward_declarations
            .entry(symbol.to_string())
            .or_insert_with(|| (display_name.to_string(), DocComment::default()));
        if entry.1.is_empty() {
            entry.1 = doc_comment;
        }
    }

    /// Files that accumulated document content, in arbitrary order.
    pub fn document_files(&self) -> Vec<FileId> {
        self.documents.keys().copied().collect()
    }

    /// Drain one file's occurrences and symbols into a SCIP document.
    pub fn emit_document(&mut self, deterministic: bool, file: FileId, document: &mut Document) {
        let Some(partial) = self.documents.remove(&file) else {
            return;
        };
        let mut occurrences = partial.occurrences;
        if deterministic {
            occurrences.sort_by(compare_occurrences);
        }
        let mut symbols: Vec<(String, SymbolInformation)> =
            partial.symbol_infos.into_iter().collect();
        if deterministic {
            symbols.sort_by(|(a, _), (b, _)| a.cmp(b));
        }
        document.occurrences.extend(occurrences);
        document
            .symbols
            .extend(symbols.into_iter().map(|(symbol, mut info)| {
                info.symbol = symbol;
                info
            }));
    }

    /// Drain external symbols into the docs-and-externals index.
    pub fn emit_external_symbols(&mut self, deterministic: bool, index: &mut Index) {
        let mut externals: Vec<SymbolInformation> =
            std::mem::take(&mut self.external_symbols).into_values().collect();
        if deterministic {
            externals.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        }
        index.external_symbols.extend(externals);
    }

    /// Drain forward declarations into the forward-decls shard index.
    pub fn emit_forward_declarations(&mut self, deterministic: bool, index: &mut Index) {
        let mut decls: Vec<(String, (String, DocComment))> =
            std::mem::take(&mut self.forward_declarations).into_iter().collect();
        if deterministic {
            decls.sort_by(|(a, _), (b, _)| a.cmp(b));
        }
        for (symbol, (display_name, doc)) in decls {
            index.external_symbols.push(SymbolInformation {
                symbol,
                documentation: doc.lines,
                display_name,
                ..Default::default()
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

    fn setup(dir: &std::path::Path, main: &str) -> (FileTable, FileId) {
        let root = RootPath::new(AbsolutePath::new(dir).unwrap());
        let options = PpOptions {
            language: Language::Cpp,
            include_dirs: Vec::new(),
            defines: Vec::new(),
            undefs: Vec::new(),
        };
        let main = AbsolutePath::new(&dir.join(main)).unwrap();
        let out = Preprocessor::new(root, options, Vec::new())
            .process(&main)
            .unwrap();
        (out.files, out.main_file)
    }

    #[test]
    fn test_reference_at_definition_site_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.cpp"), "int f() { return 0; }\n").unwrap();
        let (files, main) = setup(dir.path(), "a.cpp");

        let formatter = SymbolFormatter;
        let mut tu = TuIndexer::new(&files, &formatter, HashSet::from([main]));
        let range = FileRange::new(1, 5, 1, 5);
        tu.save_definition(
            main,
            range,
            "cxx . . . f().",
            "f",
            DocComment::default(),
            Vec::new(),
            syntax_kind::IDENTIFIER_FUNCTION,
        );
        tu.save_reference(main, range, "cxx . . . f().", syntax_kind::IDENTIFIER_FUNCTION);

        let mut document = Document::default();
        tu.emit_document(true, main, &mut document);
        assert_eq!(document.occurrences.len(), 1);
        assert!(document.occurrences[0].is_definition());
    }

    #[test]
    fn test_unowned_files_produce_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.cpp"), "int f();\n").unwrap();
        let (files, main) = setup(dir.path(), "a.cpp");

        let formatter = SymbolFormatter;
        let mut tu = TuIndexer::new(&files, &formatter, HashSet::new());
        tu.save_definition(
            main,
            FileRange::new(1, 5, 1, 5),
            "cxx . . . f().",
            "f",
            DocComment::default(),
            Vec::new(),
            syntax_kind::IDENTIFIER_FUNCTION,
        );
        assert!(tu.document_files().is_empty());
    }

    #[test]
    fn test_synthetic_file_definition_and_include_reference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("h.h"), "int g();\n").unwrap();
        std::fs::write(dir.path().join("a.cpp"), "#include \"h.h\"\n").unwrap();
        let root = RootPath::new(AbsolutePath::new(dir.path()).unwrap());
        let options = PpOptions {
            language: Language::Cpp,
            include_dirs: vec![AbsolutePath::new(dir.path()).unwrap()],
            defines: Vec::new(),
            undefs: Vec::new(),
        };
        let main_path = AbsolutePath::new(&dir.path().join("a.cpp")).unwrap();
        let out = Preprocessor::new(root, options, Vec::new())
            .process(&main_path)
            .unwrap();

        let header = out
            .files
            .lookup(&AbsolutePath::new(&dir.path().join("h.h")).unwrap())
            .unwrap();
        let formatter = SymbolFormatter;
        let mut tu = TuIndexer::new(
            &out.files,
            &formatter,
            HashSet::from([out.main_file, header]),
        );
        tu.save_synthetic_file_definition(out.main_file);
        tu.save_include(out.main_file, FileRange::new(1, 10, 1, 14), header);

        let mut document = Document::default();
        tu.emit_document(true, out.main_file, &mut document);
        assert_eq!(document.occurrences.len(), 2);
        let include_ref = &document.occurrences[1];
        assert!(include_ref.symbol.contains("h.h"));
        assert!(!include_ref.is_definition());
    }

    #[test]
    fn test_definition_outside_project_becomes_external() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("proj");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(dir.path().join("ext.h"), "int e();\n").unwrap();
        std::fs::write(
            project.join("a.cpp"),
            format!("#include \"{}\"\n", dir.path().join("ext.h").display()),
        )
        .unwrap();

        let root = RootPath::new(AbsolutePath::new(&project).unwrap());
        let options = PpOptions {
            language: Language::Cpp,
            include_dirs: Vec::new(),
            defines: Vec::new(),
            undefs: Vec::new(),
        };
        let main_path = AbsolutePath::new(&project.join("a.cpp")).unwrap();
        let out = Preprocessor::new(root, options, Vec::new())
            .process(&main_path)
            .unwrap();
        let ext = out
            .files
            .lookup(&AbsolutePath::new(&dir.path().join("ext.h")).unwrap())
            .unwrap();

        let formatter = SymbolFormatter;
        let mut tu = TuIndexer::new(&out.files, &formatter, HashSet::from([out.main_file, ext]));
        tu.save_definition(
            ext,
            FileRange::new(1, 5, 1, 5),
            "cxx . . . e().",
            "e",
            DocComment::default(),
            Vec::new(),
            syntax_kind::IDENTIFIER_FUNCTION,
        );

        let mut index = Index::default();
        tu.emit_external_symbols(true, &mut index);
        assert_eq!(index.external_symbols.len(), 1);
        assert_eq!(index.external_symbols[0].symbol, "cxx . . . e().");
        // No document for the external file.
        assert!(tu.document_files().is_empty());
    }
}
