//! Accumulators that merge per-TU index fragments.
//!
//! Documents from distinct TUs that share a root-relative path are merged by
//! unioning occurrence sets and reconciling symbol information; forward
//! declarations attach their documentation to the canonical definition when
//! one exists. Builders carry a [`Bomb`] so that dropping one without
//! `finish`/`discard` aborts instead of silently losing index data.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::raii::Bomb;
use crate::scip::{Document, Index, Metadata, Occurrence, Relationship, SymbolInformation};
use crate::types::RootRelativePath;

/// Total ordering over occurrences: range (lexicographic on its integer
/// components), then symbol, then role bits, then syntax kind, then
/// diagnostics. Borrows both sides, so sorting emit buffers never clones.
pub fn compare_occurrences(a: &Occurrence, b: &Occurrence) -> Ordering {
    a.range
        .cmp(&b.range)
        .then_with(|| a.symbol.cmp(&b.symbol))
        .then_with(|| a.symbol_roles.cmp(&b.symbol_roles))
        .then_with(|| a.syntax_kind.cmp(&b.syntax_kind))
        .then_with(|| a.diagnostics.cmp(&b.diagnostics))
        .then_with(|| a.override_documentation.cmp(&b.override_documentation))
}

/// An occurrence with the total ordering and structural hash used for
/// set-union deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OccurrenceExt(pub Occurrence);

impl Ord for OccurrenceExt {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_occurrences(&self.0, &other.0)
    }
}

impl PartialOrd for OccurrenceExt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A relationship ordered by symbol, then by its flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipExt(pub Relationship);

impl Ord for RelationshipExt {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = &self.0;
        let b = &other.0;
        a.symbol
            .cmp(&b.symbol)
            .then_with(|| a.is_definition.cmp(&b.is_definition))
            .then_with(|| a.is_reference.cmp(&b.is_reference))
            .then_with(|| a.is_type_definition.cmp(&b.is_type_definition))
            .then_with(|| a.is_implementation.cmp(&b.is_implementation))
    }
}

impl PartialOrd for RelationshipExt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Non-empty symbol string in the SCIP symbol grammar, usable as a map key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolName(String);

impl SymbolName {
    pub fn new(value: String) -> Self {
        assert!(!value.is_empty(), "symbol names must be non-empty");
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-symbol accumulator: documentation settable at most once,
/// relationships unioned.
#[derive(Debug)]
pub struct SymbolInformationBuilder {
    documentation: Vec<String>,
    relationships: HashSet<RelationshipExt>,
    display_name: String,
    bomb: Bomb,
}

impl SymbolInformationBuilder {
    pub fn new(name: &SymbolName, info: SymbolInformation) -> Self {
        let mut builder = Self {
            documentation: Vec::new(),
            relationships: HashSet::new(),
            display_name: info.display_name.clone(),
            bomb: Bomb::new(format!("SymbolInformationBuilder for '{name}'")),
        };
        if !info.documentation.is_empty() {
            builder.set_documentation(info.documentation);
        }
        builder.merge_relationships(info.relationships);
        builder
    }

    pub fn has_documentation(&self) -> bool {
        !self.documentation.is_empty()
    }

    /// Pre-condition: no documentation set yet. Callers decide the
    /// first-writer-wins policy by checking [`Self::has_documentation`].
    pub fn set_documentation(&mut self, documentation: Vec<String>) {
        assert!(
            !self.has_documentation(),
            "documentation may only be set once"
        );
        self.documentation = documentation;
    }

    pub fn merge_relationships(&mut self, relationships: Vec<Relationship>) {
        for rel in relationships {
            self.relationships.insert(RelationshipExt(rel));
        }
    }

    pub fn merge(&mut self, info: SymbolInformation) {
        if !self.has_documentation() && !info.documentation.is_empty() {
            self.set_documentation(info.documentation);
        }
        if self.display_name.is_empty() {
            self.display_name = info.display_name;
        }
        self.merge_relationships(info.relationships);
    }

    pub fn discard(mut self) {
        self.bomb.defuse();
    }

    pub fn finish(mut self, deterministic: bool, symbol: String) -> SymbolInformation {
        self.bomb.defuse();
        let mut relationships: Vec<Relationship> = self
            .relationships
            .drain()
            .map(|RelationshipExt(rel)| rel)
            .collect();
        if deterministic {
            // The derived field-order Ord on Relationship is the required
            // symbol-then-flags ordering.
            relationships.sort();
        }
        SymbolInformation {
            symbol,
            documentation: std::mem::take(&mut self.documentation),
            relationships,
            display_name: std::mem::take(&mut self.display_name),
        }
    }
}

/// Per-document accumulator for files visible from multiple TUs.
#[derive(Debug)]
pub struct DocumentBuilder {
    language: String,
    relative_path: String,
    occurrences: HashSet<OccurrenceExt>,
    // Keyed by the symbol name; the builder value does not repeat it.
    symbol_infos: HashMap<SymbolName, SymbolInformationBuilder>,
    bomb: Bomb,
}

impl DocumentBuilder {
    pub fn new(document: Document) -> Self {
        let mut builder = Self {
            language: document.language.clone(),
            relative_path: document.relative_path.clone(),
            occurrences: HashSet::new(),
            symbol_infos: HashMap::new(),
            bomb: Bomb::new(format!("DocumentBuilder for '{}'", document.relative_path)),
        };
        builder.merge(document);
        builder
    }

    pub fn merge(&mut self, document: Document) {
        for occ in document.occurrences {
            self.occurrences.insert(OccurrenceExt(occ));
        }
        for info in document.symbols {
            let name = SymbolName::new(info.symbol.clone());
            match self.symbol_infos.get_mut(&name) {
                Some(existing) => existing.merge(info),
                None => {
                    let builder = SymbolInformationBuilder::new(&name, info);
                    self.symbol_infos.insert(name, builder);
                }
            }
        }
    }

    fn symbol_builder_mut(&mut self, name: &SymbolName) -> Option<&mut SymbolInformationBuilder> {
        self.symbol_infos.get_mut(name)
    }

    pub fn finish(mut self, deterministic: bool) -> Document {
        self.bomb.defuse();
        let mut occurrences: Vec<OccurrenceExt> = self.occurrences.drain().collect();
        if deterministic {
            occurrences.sort();
        }
        let mut symbols: Vec<(SymbolName, SymbolInformationBuilder)> =
            self.symbol_infos.drain().collect();
        if deterministic {
            symbols.sort_by(|(a, _), (b, _)| a.cmp(b));
        }
        Document {
            language: self.language,
            relative_path: self.relative_path,
            occurrences: occurrences.into_iter().map(|OccurrenceExt(o)| o).collect(),
            symbols: symbols
                .into_iter()
                .map(|(name, builder)| builder.finish(deterministic, name.into_string()))
                .collect(),
        }
    }
}

/// Where the canonical symbol information for a name lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolOwner {
    /// In the external-symbols map.
    External,
    /// In the document builder for this path.
    Merged(RootRelativePath),
    /// In a directly added (singly indexed) document, by index.
    Direct(usize),
}

/// Reverse map spanning per-document and external symbols.
pub type SymbolToInfoMap = HashMap<SymbolName, SymbolOwner>;

/// Owns the final index during the merge phase.
///
/// Documents for singly indexed paths are appended directly; multiply
/// indexed paths go through a [`DocumentBuilder`] keyed by path only (not
/// path+hash) so that all semantic shapes of one header land in a single
/// output document.
#[derive(Debug)]
pub struct IndexBuilder {
    index: Index,
    multiply_indexed: HashMap<RootRelativePath, DocumentBuilder>,
    external_symbols: HashMap<SymbolName, SymbolInformationBuilder>,
    bomb: Bomb,
}

impl IndexBuilder {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            index: Index {
                metadata,
                documents: Vec::new(),
                external_symbols: Vec::new(),
            },
            multiply_indexed: HashMap::new(),
            external_symbols: HashMap::new(),
            bomb: Bomb::new("IndexBuilder".to_string()),
        }
    }

    pub fn add_document(&mut self, document: Document, is_multiply_indexed: bool) {
        if !is_multiply_indexed {
            self.index.documents.push(document);
            return;
        }
        let path = RootRelativePath::new(document.relative_path.clone())
            .expect("documents carry non-empty relative paths");
        match self.multiply_indexed.get_mut(&path) {
            Some(builder) => builder.merge(document),
            None => {
                self.multiply_indexed
                    .insert(path, DocumentBuilder::new(document));
            }
        }
    }

    pub fn add_external_symbol(&mut self, info: SymbolInformation) {
        let name = SymbolName::new(info.symbol.clone());
        match self.external_symbols.get_mut(&name) {
            Some(existing) => existing.merge(info),
            None => {
                let builder = SymbolInformationBuilder::new(&name, info);
                self.external_symbols.insert(name, builder);
            }
        }
    }

    /// Build the symbol→owner reverse map used to resolve forward
    /// declarations. Call after all documents and external symbols have
    /// been added.
    pub fn populate_symbol_to_info_map(&self) -> SymbolToInfoMap {
        let mut map = SymbolToInfoMap::new();
        for name in self.external_symbols.keys() {
            map.insert(name.clone(), SymbolOwner::External);
        }
        for (path, builder) in &self.multiply_indexed {
            for name in builder.symbol_infos.keys() {
                map.insert(name.clone(), SymbolOwner::Merged(path.clone()));
            }
        }
        for (idx, doc) in self.index.documents.iter().enumerate() {
            for info in &doc.symbols {
                map.insert(
                    SymbolName::new(info.symbol.clone()),
                    SymbolOwner::Direct(idx),
                );
            }
        }
        map
    }

    /// Attach a forward declaration's documentation to its canonical entry
    /// when that entry has none; otherwise the forward declaration is
    /// dropped. With no canonical entry it remains an external symbol.
    pub fn add_forward_declaration(&mut self, map: &SymbolToInfoMap, fwd: SymbolInformation) {
        let name = SymbolName::new(fwd.symbol.clone());
        match map.get(&name) {
            Some(SymbolOwner::External) => {
                let builder = self
                    .external_symbols
                    .get_mut(&name)
                    .expect("map entry implies builder entry");
                if !builder.has_documentation() && !fwd.documentation.is_empty() {
                    builder.set_documentation(fwd.documentation);
                }
            }
            Some(SymbolOwner::Merged(path)) => {
                let builder = self
                    .multiply_indexed
                    .get_mut(path)
                    .expect("map entry implies document builder")
                    .symbol_builder_mut(&name)
                    .expect("map entry implies symbol entry");
                if !builder.has_documentation() && !fwd.documentation.is_empty() {
                    builder.set_documentation(fwd.documentation);
                }
            }
            Some(SymbolOwner::Direct(idx)) => {
                let doc = &mut self.index.documents[*idx];
                if let Some(info) = doc.symbols.iter_mut().find(|s| s.symbol == fwd.symbol) {
                    if info.documentation.is_empty() {
                        info.documentation = fwd.documentation;
                    }
                }
            }
            None => self.add_external_symbol(fwd),
        }
    }

    pub fn finish(mut self, deterministic: bool) -> Index {
        self.bomb.defuse();
        let mut merged: Vec<(RootRelativePath, DocumentBuilder)> =
            self.multiply_indexed.drain().collect();
        if deterministic {
            merged.sort_by(|(a, _), (b, _)| a.cmp(b));
        }
        for (_, builder) in merged {
            self.index.documents.push(builder.finish(deterministic));
        }

        let mut externals: Vec<(SymbolName, SymbolInformationBuilder)> =
            self.external_symbols.drain().collect();
        if deterministic {
            externals.sort_by(|(a, _), (b, _)| a.cmp(b));
        }
        for (name, builder) in externals {
            let info = builder.finish(deterministic, name.into_string());
            self.index.external_symbols.push(info);
        }

        if deterministic {
            self.index
                .documents
                .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        }
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scip::SymbolRole;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn occurrence(range: &[i32], symbol: &str, roles: i32) -> Occurrence {
        Occurrence {
            range: range.to_vec(),
            symbol: symbol.to_string(),
            symbol_roles: roles,
            ..Default::default()
        }
    }

    fn hash_of(occ: &OccurrenceExt) -> u64 {
        let mut hasher = DefaultHasher::new();
        occ.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_occurrence_ext_equality_consistent_with_hash() {
        let a = OccurrenceExt(occurrence(&[1, 0, 3], "sym", 1));
        let b = OccurrenceExt(occurrence(&[1, 0, 3], "sym", 1));
        let c = OccurrenceExt(occurrence(&[1, 0, 3], "sym", 0));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);
    }

    #[test]
    fn test_occurrence_ext_orders_by_range_first() {
        let early = OccurrenceExt(occurrence(&[0, 0, 1], "zzz", 0));
        let late = OccurrenceExt(occurrence(&[2, 0, 1], "aaa", 0));
        assert!(early < late);

        let same_range_a = OccurrenceExt(occurrence(&[1, 0, 1], "aaa", 0));
        let same_range_b = OccurrenceExt(occurrence(&[1, 0, 1], "bbb", 0));
        assert!(same_range_a < same_range_b);
    }

    fn sample_document() -> Document {
        Document {
            language: "cpp".to_string(),
            relative_path: "include/h.h".to_string(),
            occurrences: vec![
                occurrence(&[0, 4, 5], "pkg g().", SymbolRole::DEFINITION.bits()),
                occurrence(&[2, 0, 3], "pkg S#", 0),
            ],
            symbols: vec![SymbolInformation {
                symbol: "pkg g().".to_string(),
                documentation: vec!["declares g".to_string()],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_merging_document_with_itself_is_identity() {
        let mut builder = DocumentBuilder::new(sample_document());
        builder.merge(sample_document());
        let merged = builder.finish(true);

        let mut expected = sample_document();
        expected.occurrences.sort_by(compare_occurrences);
        assert_eq!(merged.occurrences, expected.occurrences);
        assert_eq!(merged.symbols.len(), 1);
        assert_eq!(merged.symbols[0].documentation, vec!["declares g"]);
    }

    #[test]
    fn test_first_non_empty_documentation_wins() {
        let mut builder = DocumentBuilder::new(sample_document());
        let mut second = sample_document();
        second.symbols[0].documentation = vec!["other doc".to_string()];
        builder.merge(second);
        let merged = builder.finish(true);
        assert_eq!(merged.symbols[0].documentation, vec!["declares g"]);
    }

    #[test]
    fn test_relationships_are_set_unioned() {
        let rel = Relationship {
            symbol: "pkg Base#".to_string(),
            is_implementation: true,
            ..Default::default()
        };
        let mut doc = sample_document();
        doc.symbols[0].relationships = vec![rel.clone()];
        let mut builder = DocumentBuilder::new(doc.clone());
        builder.merge(doc);
        let merged = builder.finish(true);
        assert_eq!(merged.symbols[0].relationships, vec![rel]);
    }

    #[test]
    fn test_forward_declaration_attaches_documentation() {
        let mut builder = IndexBuilder::new(Metadata::default());
        let mut definition_doc = Document {
            language: "cpp".to_string(),
            relative_path: "src/s.cpp".to_string(),
            occurrences: vec![occurrence(&[0, 7, 8], "pkg S#", SymbolRole::DEFINITION.bits())],
            symbols: vec![SymbolInformation {
                symbol: "pkg S#".to_string(),
                ..Default::default()
            }],
        };
        definition_doc.symbols[0].documentation.clear();
        builder.add_document(definition_doc, false);

        let map = builder.populate_symbol_to_info_map();
        builder.add_forward_declaration(
            &map,
            SymbolInformation {
                symbol: "pkg S#".to_string(),
                documentation: vec!["doc".to_string()],
                ..Default::default()
            },
        );
        let index = builder.finish(true);
        assert_eq!(index.documents[0].symbols[0].documentation, vec!["doc"]);
        assert!(index.external_symbols.is_empty());
    }

    #[test]
    fn test_forward_declaration_without_canonical_stays_external() {
        let mut builder = IndexBuilder::new(Metadata::default());
        let map = builder.populate_symbol_to_info_map();
        builder.add_forward_declaration(
            &map,
            SymbolInformation {
                symbol: "pkg Missing#".to_string(),
                documentation: vec!["doc".to_string()],
                ..Default::default()
            },
        );
        let index = builder.finish(true);
        assert_eq!(index.external_symbols.len(), 1);
        assert_eq!(index.external_symbols[0].symbol, "pkg Missing#");
    }

    #[test]
    fn test_forward_declaration_does_not_override_existing_doc() {
        let mut builder = IndexBuilder::new(Metadata::default());
        builder.add_external_symbol(SymbolInformation {
            symbol: "pkg E#".to_string(),
            documentation: vec!["canonical".to_string()],
            ..Default::default()
        });
        let map = builder.populate_symbol_to_info_map();
        builder.add_forward_declaration(
            &map,
            SymbolInformation {
                symbol: "pkg E#".to_string(),
                documentation: vec!["fwd".to_string()],
                ..Default::default()
            },
        );
        let index = builder.finish(true);
        assert_eq!(index.external_symbols[0].documentation, vec!["canonical"]);
    }

    #[test]
    fn test_finish_sorts_documents_deterministically() {
        let mut builder = IndexBuilder::new(Metadata::default());
        for path in ["z.cpp", "a.cpp", "m.h"] {
            builder.add_document(
                Document {
                    relative_path: path.to_string(),
                    ..Default::default()
                },
                path.ends_with(".h"),
            );
        }
        let index = builder.finish(true);
        let paths: Vec<&str> = index
            .documents
            .iter()
            .map(|d| d.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["a.cpp", "m.h", "z.cpp"]);
    }
}
