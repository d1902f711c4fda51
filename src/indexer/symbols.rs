//! SCIP symbol string formatting.
//!
//! Symbols follow the SCIP grammar `scheme manager package version
//! descriptors`; this indexer emits the `cxx . . . ` prefix and builds the
//! descriptor chain from scope nesting. Formatting is deterministic per
//! declaration identity: the same qualified declaration always produces the
//! same string, in every TU.

use crate::types::StableFileId;

/// One component of a symbol's descriptor chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// `name/`
    Namespace(String),
    /// `name#`
    Type(String),
    /// `name().`
    Method(String),
    /// `name.`
    Term(String),
    /// `[name]`
    TypeParameter(String),
    /// `name:`
    Meta(String),
    /// `name!`
    Macro(String),
}

impl Descriptor {
    fn append_to(&self, out: &mut String) {
        match self {
            Descriptor::Namespace(name) => {
                push_escaped(out, name);
                out.push('/');
            }
            Descriptor::Type(name) => {
                push_escaped(out, name);
                out.push('#');
            }
            Descriptor::Method(name) => {
                push_escaped(out, name);
                out.push_str("().");
            }
            Descriptor::Term(name) => {
                push_escaped(out, name);
                out.push('.');
            }
            Descriptor::TypeParameter(name) => {
                out.push('[');
                push_escaped(out, name);
                out.push(']');
            }
            Descriptor::Meta(name) => {
                push_escaped(out, name);
                out.push(':');
            }
            Descriptor::Macro(name) => {
                push_escaped(out, name);
                out.push('!');
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Descriptor::Namespace(name)
            | Descriptor::Type(name)
            | Descriptor::Method(name)
            | Descriptor::Term(name)
            | Descriptor::TypeParameter(name)
            | Descriptor::Meta(name)
            | Descriptor::Macro(name) => name,
        }
    }
}

fn is_simple_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '$'))
}

fn push_escaped(out: &mut String, name: &str) {
    if is_simple_identifier(name) {
        out.push_str(name);
    } else {
        out.push('`');
        for c in name.chars() {
            if c == '`' {
                out.push('`');
            }
            out.push(c);
        }
        out.push('`');
    }
}

/// Formats SCIP symbol names for this indexer's package.
#[derive(Debug, Clone, Default)]
pub struct SymbolFormatter;

impl SymbolFormatter {
    const PREFIX: &'static str = "cxx . . . ";

    pub fn format(&self, descriptors: &[Descriptor]) -> String {
        let mut out = String::from(Self::PREFIX);
        for descriptor in descriptors {
            descriptor.append_to(&mut out);
        }
        out
    }

    /// Synthetic symbol standing for a whole file; the target of
    /// go-to-definition on `#include` lines.
    pub fn file_symbol(&self, stable: &StableFileId) -> String {
        self.format(&[Descriptor::Meta(stable.display_path())])
    }

    /// Symbol for a macro definition. File-based macros are disambiguated
    /// by their definition site; command-line and builtin macros by name
    /// alone.
    pub fn macro_symbol(&self, name: &str, site: Option<(&StableFileId, u32, u32)>) -> String {
        match site {
            Some((stable, line, col)) => self.format(&[Descriptor::Macro(format!(
                "{}:{}:{}#{}",
                stable.display_path(),
                line,
                col,
                name
            ))]),
            None => self.format(&[Descriptor::Macro(name.to_string())]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AbsolutePath, RootPath};
    use std::path::Path;

    #[test]
    fn test_simple_descriptor_chain() {
        let formatter = SymbolFormatter;
        let symbol = formatter.format(&[
            Descriptor::Namespace("ns".to_string()),
            Descriptor::Type("S".to_string()),
            Descriptor::Method("get".to_string()),
        ]);
        assert_eq!(symbol, "cxx . . . ns/S#get().");
    }

    #[test]
    fn test_non_identifier_names_are_escaped() {
        let formatter = SymbolFormatter;
        let symbol = formatter.format(&[Descriptor::Type("operator==".to_string())]);
        assert_eq!(symbol, "cxx . . . `operator==`#");
    }

    #[test]
    fn test_file_symbol_uses_stable_path() {
        let root = RootPath::new(AbsolutePath::new(Path::new("/proj")).unwrap());
        let stable = StableFileId::from_absolute(
            &root,
            &AbsolutePath::new(Path::new("/proj/src/a.cpp")).unwrap(),
        );
        let formatter = SymbolFormatter;
        assert_eq!(formatter.file_symbol(&stable), "cxx . . . `src/a.cpp`:");
    }

    #[test]
    fn test_macro_symbols_disambiguate_by_site() {
        let root = RootPath::new(AbsolutePath::new(Path::new("/proj")).unwrap());
        let stable = StableFileId::from_absolute(
            &root,
            &AbsolutePath::new(Path::new("/proj/h.h")).unwrap(),
        );
        let formatter = SymbolFormatter;
        let file_based = formatter.macro_symbol("X", Some((&stable, 3, 9)));
        let cli = formatter.macro_symbol("X", None);
        assert_eq!(file_based, "cxx . . . `h.h:3:9#X`!");
        assert_eq!(cli, "cxx . . . X!");
        assert_ne!(file_based, cli);
    }

    #[test]
    fn test_formatting_is_deterministic() {
        let formatter = SymbolFormatter;
        let descriptors = [
            Descriptor::Namespace("a".to_string()),
            Descriptor::Term("x".to_string()),
        ];
        assert_eq!(formatter.format(&descriptors), formatter.format(&descriptors));
    }
}
