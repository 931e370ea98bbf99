//! Per-location symbol records.

use crate::model::Location;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Semantic kind of a symbol record. Reference kinds mark usage sites; the
/// rest mark declarations or definitions (the `definition` flag on
/// [`SymbolInfo`] distinguishes those two).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SymbolKind {
    #[default]
    Invalid,
    Namespace,
    Class,
    Struct,
    Union,
    Enum,
    EnumConstant,
    Typedef,
    Function,
    Method,
    Constructor,
    Destructor,
    Field,
    Variable,
    Parameter,
    Macro,
    TypeRef,
    MemberRef,
    CallExpr,
    UsrRef,
}

impl SymbolKind {
    /// Usage-site kinds; these are filtered out of name lookups.
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            SymbolKind::TypeRef | SymbolKind::MemberRef | SymbolKind::CallExpr | SymbolKind::UsrRef
        )
    }

    pub fn is_function_like(self) -> bool {
        matches!(
            self,
            SymbolKind::Function
                | SymbolKind::Method
                | SymbolKind::Constructor
                | SymbolKind::Destructor
        )
    }

    /// Rank used both for choosing the best target of a location and for the
    /// default query sort. Higher ranks sort first.
    pub fn rank(self) -> u32 {
        match self {
            SymbolKind::Function
            | SymbolKind::Method
            | SymbolKind::Constructor
            | SymbolKind::Destructor => 3,
            SymbolKind::Namespace
            | SymbolKind::Class
            | SymbolKind::Struct
            | SymbolKind::Union
            | SymbolKind::Enum
            | SymbolKind::Typedef => 2,
            SymbolKind::EnumConstant
            | SymbolKind::Field
            | SymbolKind::Variable
            | SymbolKind::Parameter
            | SymbolKind::Macro => 1,
            _ => 0,
        }
    }
}

/// One row of the `symbols` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol_length: u16,
    /// Fully qualified name.
    pub symbol_name: String,
    pub kind: SymbolKind,
    pub symbol_type: String,
    pub enum_value: Option<i64>,
    pub targets: BTreeSet<Location>,
    pub references: BTreeSet<Location>,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub definition: bool,
}

impl SymbolInfo {
    pub fn is_null(&self) -> bool {
        self.kind == SymbolKind::Invalid && self.symbol_length == 0
    }

    pub fn is_reference(&self) -> bool {
        self.kind.is_reference()
    }

    /// Merge `other` into `self`. Set-valued fields are united; the scalar
    /// fields follow whichever record carries a definition, falling back to
    /// the longer symbol length when neither or both do.
    pub fn unite(&mut self, other: &SymbolInfo) {
        let other_wins = match (self.definition, other.definition) {
            (false, true) => true,
            (true, false) => false,
            _ => other.symbol_length > self.symbol_length,
        };

        if other_wins {
            self.symbol_length = other.symbol_length;
            self.symbol_name = other.symbol_name.clone();
            self.kind = other.kind;
            self.symbol_type = other.symbol_type.clone();
            self.enum_value = other.enum_value;
            self.start_line = other.start_line;
            self.start_column = other.start_column;
            self.end_line = other.end_line;
            self.end_column = other.end_column;
            self.definition = other.definition;
        }

        self.targets.extend(other.targets.iter().copied());
        self.references.extend(other.references.iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(name: &str, kind: SymbolKind, definition: bool, length: u16) -> SymbolInfo {
        SymbolInfo {
            symbol_length: length,
            symbol_name: name.to_string(),
            kind,
            definition,
            ..Default::default()
        }
    }

    #[test]
    fn test_unite_prefers_definition() {
        let mut decl = symbol("foo", SymbolKind::Function, false, 3);
        decl.references.insert(Location::new(1, 2, 3));

        let mut def = symbol("foo(int)", SymbolKind::Function, true, 8);
        def.targets.insert(Location::new(2, 1, 1));

        decl.unite(&def);

        assert!(decl.definition);
        assert_eq!(decl.symbol_name, "foo(int)");
        // Accumulated edges from both records survive the merge.
        assert!(decl.references.contains(&Location::new(1, 2, 3)));
        assert!(decl.targets.contains(&Location::new(2, 1, 1)));
    }

    #[test]
    fn test_unite_keeps_existing_definition() {
        let mut def = symbol("foo(int)", SymbolKind::Function, true, 8);
        let decl = symbol("foo", SymbolKind::Function, false, 3);

        def.unite(&decl);

        assert!(def.definition);
        assert_eq!(def.symbol_name, "foo(int)");
    }

    #[test]
    fn test_unite_ties_break_on_length() {
        let mut short = symbol("ns::a", SymbolKind::Variable, false, 1);
        let long = symbol("ns::alpha", SymbolKind::Variable, false, 5);

        short.unite(&long);
        assert_eq!(short.symbol_name, "ns::alpha");
    }

    #[test]
    fn test_reference_kinds() {
        assert!(SymbolKind::CallExpr.is_reference());
        assert!(SymbolKind::TypeRef.is_reference());
        assert!(!SymbolKind::Function.is_reference());
        assert!(SymbolKind::Method.is_function_like());
    }
}
