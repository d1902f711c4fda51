//! Tree-sitter AST walk producing semantic occurrences.
//!
//! Two passes over every file the preprocessor entered: the first collects
//! declarations into a TU-wide table (so references in owned files can
//! resolve to declarations living in files owned by other TUs), the second
//! resolves identifier, member and qualified-name references against that
//! table. Occurrence emission is gated per file by the [`TuIndexer`].
//!
//! Reference resolution is scope-chain name lookup, not full semantic
//! analysis: unresolved names are skipped rather than guessed.

use std::collections::HashMap;

use tracing::debug;
use tree_sitter::{Node, Parser};

use crate::compdb::Language;
use crate::error::IndexResult;
use crate::preprocessor::FileId;
use crate::scip::{Relationship, syntax_kind};
use crate::types::FileRange;

use super::symbols::Descriptor;
use super::{DocComment, TuIndexer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclKind {
    Namespace,
    Type,
    Function,
    Field,
    EnumMember,
    TypeParameter,
}

impl DeclKind {
    fn syntax(self) -> i32 {
        match self {
            DeclKind::Namespace => syntax_kind::IDENTIFIER_NAMESPACE,
            DeclKind::Type => syntax_kind::IDENTIFIER_TYPE,
            DeclKind::Function => syntax_kind::IDENTIFIER_FUNCTION,
            DeclKind::Field => syntax_kind::IDENTIFIER_FIELD,
            DeclKind::EnumMember => syntax_kind::IDENTIFIER_CONSTANT,
            DeclKind::TypeParameter => syntax_kind::IDENTIFIER_TYPE_PARAMETER,
        }
    }

    fn descriptor(self, name: &str) -> Descriptor {
        match self {
            DeclKind::Namespace => Descriptor::Namespace(name.to_string()),
            DeclKind::Type => Descriptor::Type(name.to_string()),
            DeclKind::Function => Descriptor::Method(name.to_string()),
            DeclKind::Field | DeclKind::EnumMember => Descriptor::Term(name.to_string()),
            DeclKind::TypeParameter => Descriptor::TypeParameter(name.to_string()),
        }
    }
}

#[derive(Debug)]
struct DeclRecord {
    file: FileId,
    range: FileRange,
    symbol: String,
    display_name: String,
    kind: DeclKind,
    doc: DocComment,
    /// Base class names as written, with the scope active at the decl.
    bases: Vec<String>,
    scope_names: Vec<String>,
    is_forward: bool,
}

#[derive(Debug, Default)]
struct DeclTable {
    records: Vec<DeclRecord>,
    by_qualified: HashMap<String, usize>,
    by_suffix: HashMap<String, Vec<usize>>,
}

impl DeclTable {
    fn insert(&mut self, qualified: String, record: DeclRecord) {
        let index = self.records.len();
        self.by_suffix
            .entry(record.display_name.clone())
            .or_default()
            .push(index);
        self.records.push(record);
        // First declaration wins; redeclarations share its symbol.
        self.by_qualified.entry(qualified).or_insert(index);
    }

    fn resolve(&self, scope: &[String], name_path: &[String]) -> Option<&DeclRecord> {
        for depth in (0..=scope.len()).rev() {
            let mut key = scope[..depth].join("::");
            if !key.is_empty() {
                key.push_str("::");
            }
            key.push_str(&name_path.join("::"));
            if let Some(index) = self.by_qualified.get(&key) {
                return Some(&self.records[*index]);
            }
        }
        None
    }

    /// Resolve a member name by unique suffix match among member-like
    /// declarations; ambiguity yields nothing.
    fn resolve_member(&self, name: &str) -> Option<&DeclRecord> {
        self.resolve_suffix(name, &[DeclKind::Field, DeclKind::Function, DeclKind::EnumMember])
    }

    /// Unscoped enumerators are visible without qualification; resolve a
    /// bare identifier against them when scope lookup finds nothing.
    fn resolve_enum_member(&self, name: &str) -> Option<&DeclRecord> {
        self.resolve_suffix(name, &[DeclKind::EnumMember])
    }

    fn resolve_suffix(&self, name: &str, kinds: &[DeclKind]) -> Option<&DeclRecord> {
        let candidates = self.by_suffix.get(name)?;
        let mut found: Option<&DeclRecord> = None;
        for index in candidates {
            let record = &self.records[*index];
            if !kinds.contains(&record.kind) {
                continue;
            }
            match found {
                None => found = Some(record),
                Some(existing) if existing.symbol == record.symbol => {}
                Some(_) => return None,
            }
        }
        found
    }
}

/// Walk every file of the TU and feed occurrences into `tu`.
pub fn index_translation_unit(tu: &mut TuIndexer<'_>) -> IndexResult<()> {
    let mut sources: Vec<(FileId, String)> = Vec::new();
    for file in tu.files().iter() {
        let path = tu.files().path(file);
        match std::fs::read_to_string(path.as_path()) {
            Ok(content) => sources.push((file, content)),
            Err(err) => {
                debug!(file = %path, %err, "skipping unreadable file in AST walk");
            }
        }
    }

    let mut table = DeclTable::default();
    for (file, content) in &sources {
        let path = tu.files().path(*file);
        let language = Language::from_path(path.as_path());
        let Some(tree) = parse(language, content) else {
            debug!(file = %path, "tree-sitter failed to parse file");
            continue;
        };
        let mut scope = Vec::new();
        collect_node(tree.root_node(), *file, content, &mut scope, &mut table);
    }

    emit_declarations(tu, &table);

    for (file, content) in &sources {
        let path = tu.files().path(*file);
        if !tu.owns(*file) || !tu.files().stable_id(*file).is_in_project() {
            continue;
        }
        let language = Language::from_path(path.as_path());
        let Some(tree) = parse(language, content) else {
            continue;
        };
        let mut scope = Vec::new();
        let mut walker = RefWalker {
            tu: &mut *tu,
            table: &table,
            file: *file,
            src: content,
        };
        walker.walk(tree.root_node(), &mut scope);
    }
    Ok(())
}

/// Surface parse trouble on stderr when `--show-compiler-diagnostics` is
/// set. Tree-sitter has no structured diagnostics, so this reports files
/// whose tree contains error nodes.
pub fn report_parse_diagnostics(files: &crate::preprocessor::FileTable) {
    for file in files.iter() {
        let path = files.path(file);
        let Ok(content) = std::fs::read_to_string(path.as_path()) else {
            continue;
        };
        let language = Language::from_path(path.as_path());
        if let Some(tree) = parse(language, &content) {
            if tree.root_node().has_error() {
                eprintln!("scip-cxx: syntax errors while parsing {path}");
            }
        }
    }
}

fn parse(language: Language, content: &str) -> Option<tree_sitter::Tree> {
    let mut parser = Parser::new();
    let grammar = match language {
        Language::C => tree_sitter_c::LANGUAGE.into(),
        Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
    };
    parser.set_language(&grammar).ok()?;
    parser.parse(content, None)
}

fn text<'s>(node: Node<'_>, src: &'s str) -> &'s str {
    node.utf8_text(src.as_bytes()).unwrap_or("")
}

fn range_of(node: Node<'_>) -> FileRange {
    FileRange::from_ts_range(&node.range())
}

const TAG_SPECIFIERS: &[&str] = &[
    "class_specifier",
    "struct_specifier",
    "union_specifier",
    "enum_specifier",
];

fn is_tag_specifier(kind: &str) -> bool {
    TAG_SPECIFIERS.contains(&kind)
}

// ---------------------------------------------------------------------------
// Pass 1: declaration collection
// ---------------------------------------------------------------------------

fn collect_node(
    node: Node<'_>,
    file: FileId,
    src: &str,
    scope: &mut Vec<(String, Descriptor)>,
    table: &mut DeclTable,
) {
    match node.kind() {
        "comment" | "preproc_include" | "preproc_def" | "preproc_function_def" | "preproc_call" => {
        }
        "namespace_definition" => {
            let name = node.child_by_field_name("name");
            let component = match name {
                Some(name_node) => {
                    let name_text = text(name_node, src).to_string();
                    record_decl(
                        table,
                        file,
                        range_of(name_node),
                        scope,
                        &name_text,
                        DeclKind::Namespace,
                        doc_comment_for(node, src),
                        Vec::new(),
                        false,
                    );
                    name_text
                }
                None => "(anonymous)".to_string(),
            };
            if let Some(body) = node.child_by_field_name("body") {
                scope.push((component.clone(), Descriptor::Namespace(component)));
                collect_children(body, file, src, scope, table);
                scope.pop();
            }
        }
        "class_specifier" | "struct_specifier" | "union_specifier" => {
            let Some(body) = node.child_by_field_name("body") else {
                maybe_record_forward_tag(node, file, src, scope, table);
                return;
            };
            let Some(name_node) = node.child_by_field_name("name") else {
                collect_children(body, file, src, scope, table);
                return;
            };
            let name_text = text(name_node, src).to_string();
            let bases = collect_base_names(node, src);
            record_decl(
                table,
                file,
                range_of(name_node),
                scope,
                &name_text,
                DeclKind::Type,
                outer_doc_comment(node, src),
                bases,
                false,
            );
            collect_template_params(
                node,
                file,
                src,
                scope,
                (&name_text, Descriptor::Type(name_text.clone())),
                table,
            );
            scope.push((name_text.clone(), Descriptor::Type(name_text)));
            collect_children(body, file, src, scope, table);
            scope.pop();
        }
        "enum_specifier" => {
            let Some(body) = node.child_by_field_name("body") else {
                maybe_record_forward_tag(node, file, src, scope, table);
                return;
            };
            let Some(name_node) = node.child_by_field_name("name") else {
                return;
            };
            let name_text = text(name_node, src).to_string();
            record_decl(
                table,
                file,
                range_of(name_node),
                scope,
                &name_text,
                DeclKind::Type,
                outer_doc_comment(node, src),
                Vec::new(),
                false,
            );
            scope.push((name_text.clone(), Descriptor::Type(name_text)));
            let mut cursor = body.walk();
            for child in body.named_children(&mut cursor) {
                if child.kind() == "enumerator" {
                    if let Some(enum_name) = child.child_by_field_name("name") {
                        record_decl(
                            table,
                            file,
                            range_of(enum_name),
                            scope,
                            text(enum_name, src),
                            DeclKind::EnumMember,
                            doc_comment_for(child, src),
                            Vec::new(),
                            false,
                        );
                    }
                }
            }
            scope.pop();
        }
        "function_definition" => {
            collect_function(node, file, src, scope, table, false);
        }
        "field_declaration" => {
            if let Some(declarator) = function_declarator_of(node) {
                // In-class method declaration: the canonical declaration.
                if let Some((scope_ext, leaf)) = declarator_name(declarator, src) {
                    let name_text = text(leaf, src).to_string();
                    let mut extended = scope.clone();
                    for component in scope_ext {
                        extended.push((component.clone(), Descriptor::Type(component)));
                    }
                    record_decl(
                        table,
                        file,
                        range_of(leaf),
                        &extended,
                        &name_text,
                        DeclKind::Function,
                        outer_doc_comment(node, src),
                        Vec::new(),
                        false,
                    );
                }
                return;
            }
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "field_identifier" {
                    record_decl(
                        table,
                        file,
                        range_of(child),
                        scope,
                        text(child, src),
                        DeclKind::Field,
                        doc_comment_for(node, src),
                        Vec::new(),
                        false,
                    );
                }
            }
        }
        "declaration" => {
            if let Some(declarator) = function_declarator_of(node) {
                // Free-function prototype: a forward declaration.
                if let Some((scope_ext, leaf)) = declarator_name(declarator, src) {
                    let name_text = text(leaf, src).to_string();
                    let mut extended = scope.clone();
                    for component in scope_ext {
                        extended.push((component.clone(), Descriptor::Type(component)));
                    }
                    record_decl(
                        table,
                        file,
                        range_of(leaf),
                        &extended,
                        &name_text,
                        DeclKind::Function,
                        outer_doc_comment(node, src),
                        Vec::new(),
                        true,
                    );
                }
                return;
            }
            // An inline or forward tag declaration hides in the type.
            if let Some(type_node) = node.child_by_field_name("type") {
                collect_node(type_node, file, src, scope, table);
            }
        }
        "type_definition" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "type_identifier"
                    && node.child_by_field_name("declarator") == Some(child)
                {
                    record_decl(
                        table,
                        file,
                        range_of(child),
                        scope,
                        text(child, src),
                        DeclKind::Type,
                        doc_comment_for(node, src),
                        Vec::new(),
                        false,
                    );
                }
            }
            // An inline struct body in a typedef still declares its tag.
            if let Some(type_node) = node.child_by_field_name("type") {
                collect_node(type_node, file, src, scope, table);
            }
        }
        "alias_declaration" => {
            if let Some(name_node) = node.child_by_field_name("name") {
                record_decl(
                    table,
                    file,
                    range_of(name_node),
                    scope,
                    text(name_node, src),
                    DeclKind::Type,
                    outer_doc_comment(node, src),
                    Vec::new(),
                    false,
                );
            }
        }
        _ => collect_children(node, file, src, scope, table),
    }
}

/// True when a bodyless tag specifier is a forward declaration (`struct
/// S;`) rather than an elaborated type reference (`struct S x;`).
fn is_forward_tag_site(node: Node<'_>) -> bool {
    match node.parent() {
        Some(parent) => match parent.kind() {
            "declaration" | "template_declaration" | "field_declaration" => {
                parent.child_by_field_name("declarator").is_none()
            }
            // Grammars may surface `struct S;` directly at file scope.
            "translation_unit" => true,
            _ => false,
        },
        None => false,
    }
}

fn maybe_record_forward_tag(
    node: Node<'_>,
    file: FileId,
    src: &str,
    scope: &[(String, Descriptor)],
    table: &mut DeclTable,
) {
    if !is_forward_tag_site(node) {
        return;
    }
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let doc_anchor = match node.parent() {
        Some(parent) if parent.kind() != "translation_unit" => parent,
        _ => node,
    };
    record_decl(
        table,
        file,
        range_of(name_node),
        scope,
        text(name_node, src),
        DeclKind::Type,
        outer_doc_comment(doc_anchor, src),
        Vec::new(),
        true,
    );
}

fn collect_children(
    node: Node<'_>,
    file: FileId,
    src: &str,
    scope: &mut Vec<(String, Descriptor)>,
    table: &mut DeclTable,
) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_node(child, file, src, scope, table);
    }
}

#[allow(clippy::too_many_arguments)]
fn record_decl(
    table: &mut DeclTable,
    file: FileId,
    range: FileRange,
    scope: &[(String, Descriptor)],
    name: &str,
    kind: DeclKind,
    doc: DocComment,
    bases: Vec<String>,
    is_forward: bool,
) {
    if name.is_empty() {
        return;
    }
    let mut descriptors: Vec<Descriptor> = scope.iter().map(|(_, d)| d.clone()).collect();
    descriptors.push(kind.descriptor(name));
    let symbol = super::SymbolFormatter.format(&descriptors);
    let scope_names: Vec<String> = scope.iter().map(|(n, _)| n.clone()).collect();
    let mut qualified = scope_names.join("::");
    if !qualified.is_empty() {
        qualified.push_str("::");
    }
    qualified.push_str(name);
    table.insert(
        qualified,
        DeclRecord {
            file,
            range,
            symbol,
            display_name: name.to_string(),
            kind,
            doc,
            bases,
            scope_names,
            is_forward,
        },
    );
}

fn collect_function(
    node: Node<'_>,
    file: FileId,
    src: &str,
    scope: &mut Vec<(String, Descriptor)>,
    table: &mut DeclTable,
    is_forward: bool,
) {
    let Some(declarator) = function_declarator_of(node) else {
        return;
    };
    let Some((scope_ext, leaf)) = declarator_name(declarator, src) else {
        return;
    };
    let name_text = text(leaf, src).to_string();
    let mut extended = scope.clone();
    for component in &scope_ext {
        extended.push((component.clone(), Descriptor::Type(component.clone())));
    }
    record_decl(
        table,
        file,
        range_of(leaf),
        &extended,
        &name_text,
        DeclKind::Function,
        outer_doc_comment(node, src),
        Vec::new(),
        is_forward,
    );
    collect_template_params(
        node,
        file,
        src,
        &extended,
        (&name_text, Descriptor::Method(name_text.clone())),
        table,
    );
    // Function bodies only declare locals; nothing to collect inside.
}

/// Record the type parameters of an enclosing `template<...>` under the
/// templated entity, so `T` resolves inside its body.
fn collect_template_params(
    node: Node<'_>,
    file: FileId,
    src: &str,
    scope: &[(String, Descriptor)],
    entity: (&str, Descriptor),
    table: &mut DeclTable,
) {
    let Some(parent) = node.parent() else { return };
    if parent.kind() != "template_declaration" {
        return;
    }
    let Some(params) = parent.child_by_field_name("parameters") else {
        return;
    };
    let mut extended: Vec<(String, Descriptor)> = scope.to_vec();
    extended.push((entity.0.to_string(), entity.1));
    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        if child.kind() == "type_parameter_declaration" {
            let mut inner = child.walk();
            for name_node in child.named_children(&mut inner) {
                if name_node.kind() == "type_identifier" {
                    record_decl(
                        table,
                        file,
                        range_of(name_node),
                        &extended,
                        text(name_node, src),
                        DeclKind::TypeParameter,
                        DocComment::default(),
                        Vec::new(),
                        false,
                    );
                }
            }
        }
    }
}

fn collect_base_names(class_node: Node<'_>, src: &str) -> Vec<String> {
    let mut bases = Vec::new();
    let mut cursor = class_node.walk();
    for child in class_node.named_children(&mut cursor) {
        if child.kind() != "base_class_clause" {
            continue;
        }
        let mut inner = child.walk();
        for base in child.named_children(&mut inner) {
            match base.kind() {
                "type_identifier" | "qualified_identifier" => {
                    bases.push(text(base, src).to_string());
                }
                "template_type" => {
                    if let Some(name) = base.child_by_field_name("name") {
                        bases.push(text(name, src).to_string());
                    }
                }
                _ => {}
            }
        }
    }
    bases
}

/// Find the `function_declarator` under a definition or declaration,
/// looking through pointer and reference wrappers.
fn function_declarator_of(node: Node<'_>) -> Option<Node<'_>> {
    let mut declarator = node.child_by_field_name("declarator")?;
    loop {
        match declarator.kind() {
            "function_declarator" => return Some(declarator),
            "pointer_declarator" | "reference_declarator" => {
                declarator = declarator.child_by_field_name("declarator").or_else(|| {
                    let mut cursor = declarator.walk();
                    declarator.named_children(&mut cursor).last()
                })?;
            }
            _ => return None,
        }
    }
}

/// Extract the scope components and leaf name node of a declarator, e.g.
/// `S::f` yields `(["S"], f)`.
fn declarator_name<'t>(declarator: Node<'t>, src: &str) -> Option<(Vec<String>, Node<'t>)> {
    let mut name = declarator.child_by_field_name("declarator")?;
    let mut scope_ext = Vec::new();
    while name.kind() == "qualified_identifier" {
        if let Some(scope_node) = name.child_by_field_name("scope") {
            scope_ext.push(text(scope_node, src).to_string());
        }
        name = name.child_by_field_name("name")?;
    }
    match name.kind() {
        "identifier" | "field_identifier" | "destructor_name" | "operator_name" => {
            Some((scope_ext, name))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Doc comments
// ---------------------------------------------------------------------------

/// Doc comment immediately preceding `node`, if it looks like one.
fn doc_comment_for(node: Node<'_>, src: &str) -> DocComment {
    let mut lines = Vec::new();
    let mut cursor = node;
    let mut expected_end = node.start_position().row;
    while let Some(prev) = cursor.prev_named_sibling() {
        if prev.kind() != "comment" || prev.end_position().row + 1 < expected_end {
            break;
        }
        let comment = text(prev, src);
        if !(comment.starts_with("///") || comment.starts_with("/**") || comment.starts_with("//!"))
        {
            break;
        }
        lines.push(comment_lines(comment));
        expected_end = prev.start_position().row;
        cursor = prev;
    }
    lines.reverse();
    DocComment {
        lines: lines.into_iter().flatten().collect(),
    }
}

/// Doc comment of a declaration, looking at the `template_declaration`
/// wrapper when there is one.
fn outer_doc_comment(node: Node<'_>, src: &str) -> DocComment {
    let anchor = match node.parent() {
        Some(parent) if parent.kind() == "template_declaration" => parent,
        _ => node,
    };
    doc_comment_for(anchor, src)
}

fn comment_lines(comment: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for raw in comment.lines() {
        let mut line = raw.trim();
        line = line
            .trim_start_matches("///")
            .trim_start_matches("//!")
            .trim_start_matches("/**")
            .trim_start_matches("/*")
            .trim_end_matches("*/");
        line = line.trim_start_matches('*').trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

// ---------------------------------------------------------------------------
// Declaration emission
// ---------------------------------------------------------------------------

fn emit_declarations(tu: &mut TuIndexer<'_>, table: &DeclTable) {
    for record in &table.records {
        if record.is_forward {
            tu.save_forward_declaration(
                record.file,
                record.range,
                &record.symbol,
                &record.display_name,
                record.doc.clone(),
                record.kind.syntax(),
            );
            continue;
        }
        let relationships = record
            .bases
            .iter()
            .filter_map(|base| {
                let path: Vec<String> = base.split("::").map(str::to_string).collect();
                table
                    .resolve(&record.scope_names, &path)
                    .map(|base_record| Relationship {
                        symbol: base_record.symbol.clone(),
                        is_implementation: true,
                        ..Default::default()
                    })
            })
            .collect();
        tu.save_definition(
            record.file,
            record.range,
            &record.symbol,
            &record.display_name,
            record.doc.clone(),
            relationships,
            record.kind.syntax(),
        );
    }
}

// ---------------------------------------------------------------------------
// Pass 2: reference resolution
// ---------------------------------------------------------------------------

struct RefWalker<'w, 'tu, 'a> {
    tu: &'w mut TuIndexer<'a>,
    table: &'tu DeclTable,
    file: FileId,
    src: &'w str,
}

impl RefWalker<'_, '_, '_> {
    fn walk(&mut self, node: Node<'_>, scope: &mut Vec<String>) {
        match node.kind() {
            "comment" | "preproc_include" | "preproc_def" | "preproc_function_def"
            | "preproc_call" => {}
            "namespace_definition" => {
                let component = node
                    .child_by_field_name("name")
                    .map(|n| text(n, self.src).to_string())
                    .unwrap_or_else(|| "(anonymous)".to_string());
                if let Some(body) = node.child_by_field_name("body") {
                    scope.push(component);
                    self.walk(body, scope);
                    scope.pop();
                }
            }
            "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier" => {
                match node.child_by_field_name("body") {
                    Some(body) => {
                        let component = node
                            .child_by_field_name("name")
                            .map(|n| text(n, self.src).to_string());
                        if let Some(component) = component {
                            scope.push(component);
                        } else {
                            scope.push("(anonymous)".to_string());
                        }
                        let mut cursor = node.walk();
                        for child in node.named_children(&mut cursor) {
                            if child.kind() == "base_class_clause" {
                                self.walk_children(child, scope);
                            }
                        }
                        self.walk(body, scope);
                        scope.pop();
                    }
                    None => {
                        // Elaborated type reference (`struct S x;`), unless
                        // it is the forward-declaration site itself.
                        if let Some(name_node) = node.child_by_field_name("name") {
                            if !is_forward_tag_site(node) {
                                self.save_path_reference(name_node, scope);
                            }
                        }
                    }
                }
            }
            "function_definition" | "field_declaration" | "declaration"
                if function_declarator_of(node).is_some() =>
            {
                let declarator = function_declarator_of(node).expect("checked above");
                let name = declarator_name(declarator, self.src);
                if let Some(type_node) = node.child_by_field_name("type") {
                    self.walk(type_node, scope);
                }
                let leaf_id = name.as_ref().map(|(_, leaf)| leaf.id());
                let mut cursor = declarator.walk();
                for child in declarator.named_children(&mut cursor) {
                    self.walk_skipping(child, leaf_id, scope);
                }
                let mut pushed = 0;
                if let Some((scope_ext, leaf)) = &name {
                    for component in scope_ext {
                        scope.push(component.clone());
                        pushed += 1;
                    }
                    scope.push(text(*leaf, self.src).to_string());
                    pushed += 1;
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk(body, scope);
                }
                for _ in 0..pushed {
                    scope.pop();
                }
            }
            "qualified_identifier" => {
                self.walk_qualified(node, scope, true);
            }
            "field_expression" => {
                if let Some(argument) = node.child_by_field_name("argument") {
                    self.walk(argument, scope);
                }
                if let Some(field) = node.child_by_field_name("field") {
                    if field.kind() == "field_identifier" {
                        if let Some(record) = self.table.resolve_member(text(field, self.src)) {
                            let symbol = record.symbol.clone();
                            let syntax = record.kind.syntax();
                            self.tu
                                .save_reference(self.file, range_of(field), &symbol, syntax);
                        }
                    } else {
                        self.walk(field, scope);
                    }
                }
            }
            "template_type" => {
                if let Some(name) = node.child_by_field_name("name") {
                    self.save_path_reference(name, scope);
                }
                if let Some(arguments) = node.child_by_field_name("arguments") {
                    self.walk_children(arguments, scope);
                }
            }
            "identifier" | "type_identifier" | "field_identifier" | "namespace_identifier" => {
                if self.is_declaration_name(node) || self.in_preproc(node) {
                    return;
                }
                self.save_path_reference(node, scope);
            }
            _ => self.walk_children(node, scope),
        }
    }

    fn walk_children(&mut self, node: Node<'_>, scope: &mut Vec<String>) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child, scope);
        }
    }

    fn walk_skipping(&mut self, node: Node<'_>, skip_id: Option<usize>, scope: &mut Vec<String>) {
        if Some(node.id()) == skip_id {
            return;
        }
        if node.kind() == "qualified_identifier" {
            // Out-of-line declarator: emit the scope components, skip the
            // leaf (it is the definition name).
            self.walk_qualified(node, scope, false);
            return;
        }
        self.walk(node, scope);
    }

    /// Walk `a::b::c`: every resolvable component gets its own reference
    /// occurrence.
    fn walk_qualified(&mut self, node: Node<'_>, scope: &mut Vec<String>, emit_leaf: bool) {
        let mut path: Vec<String> = Vec::new();
        let mut current = node;
        loop {
            if let Some(scope_node) = current.child_by_field_name("scope") {
                path.push(text(scope_node, self.src).to_string());
                self.save_resolved(&path, scope, scope_node);
            }
            let Some(name) = current.child_by_field_name("name") else {
                return;
            };
            if name.kind() == "qualified_identifier" {
                current = name;
                continue;
            }
            if name.kind() == "template_type" {
                if emit_leaf {
                    if let Some(inner) = name.child_by_field_name("name") {
                        path.push(text(inner, self.src).to_string());
                        self.save_resolved(&path, scope, inner);
                    }
                }
                if let Some(arguments) = name.child_by_field_name("arguments") {
                    self.walk_children(arguments, scope);
                }
                return;
            }
            if emit_leaf {
                path.push(text(name, self.src).to_string());
                self.save_resolved(&path, scope, name);
            }
            return;
        }
    }

    fn save_path_reference(&mut self, node: Node<'_>, scope: &[String]) {
        let path = vec![text(node, self.src).to_string()];
        self.save_resolved(&path, scope, node);
    }

    fn save_resolved(&mut self, path: &[String], scope: &[String], node: Node<'_>) {
        let record = self.table.resolve(scope, path).or_else(|| {
            if path.len() == 1 {
                self.table.resolve_enum_member(&path[0])
            } else {
                None
            }
        });
        if let Some(record) = record {
            let symbol = record.symbol.clone();
            let syntax = record.kind.syntax();
            self.tu
                .save_reference(self.file, range_of(node), &symbol, syntax);
        }
    }

    fn in_preproc(&self, node: Node<'_>) -> bool {
        node.parent()
            .is_some_and(|parent| parent.kind().starts_with("preproc"))
    }

    /// True when `node` is the name being declared, whose occurrence the
    /// collection pass already emitted.
    fn is_declaration_name(&self, node: Node<'_>) -> bool {
        let Some(parent) = node.parent() else {
            return false;
        };
        match parent.kind() {
            "namespace_definition" | "alias_declaration" | "enumerator" => {
                parent.child_by_field_name("name") == Some(node)
            }
            kind if is_tag_specifier(kind) => {
                parent.child_by_field_name("body").is_some()
                    && parent.child_by_field_name("name") == Some(node)
            }
            "function_declarator"
            | "init_declarator"
            | "array_declarator"
            | "parameter_declaration"
            | "pointer_declarator"
            | "reference_declarator"
            | "declaration" => parent.child_by_field_name("declarator") == Some(node),
            "field_declaration" | "type_definition" => {
                parent.child_by_field_name("declarator") == Some(node)
            }
            "type_parameter_declaration" => true,
            _ => false,
        }
    }
}
