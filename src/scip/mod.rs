//! SCIP record shapes and the merge builders.
//!
//! The record layout mirrors the SCIP schema (documents, occurrences,
//! symbol information, relationships); shards and the final index are
//! serialized with serde as self-describing records.

pub mod builders;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub use builders::{
    DocumentBuilder, IndexBuilder, OccurrenceExt, RelationshipExt, SymbolInformationBuilder,
    SymbolName, SymbolToInfoMap, compare_occurrences,
};

bitflags! {
    /// Role bits attached to an occurrence.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SymbolRole: i32 {
        const DEFINITION = 0x1;
        const IMPORT = 0x2;
        const WRITE_ACCESS = 0x4;
        const READ_ACCESS = 0x8;
        const GENERATED = 0x10;
        const TEST = 0x20;
        const FORWARD_DEFINITION = 0x40;
    }
}

/// Syntax kind values carried on occurrences.
pub mod syntax_kind {
    pub const UNSPECIFIED: i32 = 0;
    pub const IDENTIFIER_NAMESPACE: i32 = 1;
    pub const IDENTIFIER_TYPE: i32 = 2;
    pub const IDENTIFIER_FUNCTION: i32 = 3;
    pub const IDENTIFIER_FIELD: i32 = 4;
    pub const IDENTIFIER_CONSTANT: i32 = 5;
    pub const IDENTIFIER_MACRO: i32 = 6;
    pub const IDENTIFIER_TYPE_PARAMETER: i32 = 7;
    pub const IDENTIFIER_FILE: i32 = 8;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub severity: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Occurrence {
    /// SCIP range encoding: `[line, start, end]` or `[line, start, line, end]`,
    /// 0-based, end-exclusive.
    pub range: Vec<i32>,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub symbol_roles: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub override_documentation: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub syntax_kind: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl Occurrence {
    pub fn is_definition(&self) -> bool {
        SymbolRole::from_bits_truncate(self.symbol_roles).contains(SymbolRole::DEFINITION)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_definition: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_reference: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_type_definition: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_implementation: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInformation {
    /// Symbol name in the SCIP symbol grammar. Left empty inside builder
    /// maps keyed by the name; set on the wire.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documentation: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
    pub relative_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub occurrences: Vec<Occurrence>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<SymbolInformation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: i32,
    pub tool_info: ToolInfo,
    /// Project root as a `file://` URI.
    pub project_root: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Document>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_symbols: Vec<SymbolInformation>,
}

impl Metadata {
    pub fn for_tool(project_root: &crate::types::RootPath, arguments: Vec<String>) -> Self {
        Self {
            version: 1,
            tool_info: ToolInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                arguments,
            },
            project_root: format!("file://{}", project_root.as_absolute()),
        }
    }
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

/// Read an index shard back from disk during the merge phase.
pub fn read_index(path: &std::path::Path) -> crate::error::IndexResult<Index> {
    let text = std::fs::read_to_string(path).map_err(|source| crate::error::IndexError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| crate::error::IndexError::ShardDecode {
        path: path.to_path_buf(),
        source,
    })
}

/// Write an index (shard or final) to disk.
pub fn write_index(path: &std::path::Path, index: &Index) -> crate::error::IndexResult<()> {
    let text = serde_json::to_string(index).expect("index serializes");
    std::fs::write(path, text).map_err(|source| crate::error::IndexError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}
