// registry.rs — Statement support table and built-in type singletons
//
// The injected capability surface: keyword → expected argument shape, plus
// the fixed built-in type definitions shared by reference across every
// build. Constructed once at process start and passed explicitly into each
// build; never a global static.
//
// Preconditions: none.
// Postconditions: the registry is read-only after construction.
// Failure modes: none (lookups return Option).
// Side effects: none.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::typeres::RangeSet;

// ── Argument shapes ─────────────────────────────────────────────────────────

/// Expected argument shape for a keyword, used by the StatementDefinition
/// phase to parse raw arguments into cached values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArgumentKind {
    /// A plain identifier (module names, prefixes, feature names).
    Identifier,
    /// A possibly-prefixed reference to a named definition.
    Reference,
    /// A schema node path (augment/deviation targets, refine paths).
    SchemaPath,
    /// Free-form text (descriptions, URIs, patterns, dates).
    Text,
    Integer,
    Boolean,
    /// One of the deviate disposition literals.
    Deviate,
}

/// Statement support entry for one keyword.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatementDef {
    pub keyword: &'static str,
    pub argument: ArgumentKind,
}

// ── Built-in types ──────────────────────────────────────────────────────────

/// A resolved type definition. Built-ins are registry-owned singletons
/// shared by reference wherever used; derived types chain to their parent
/// through `base`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<Arc<TypeSpec>>,
    /// Numeric value bounds, if the type is range-restricted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeSet>,
    /// String/binary length bounds, if length-restricted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<RangeSet>,
    /// Pattern restrictions, accumulated (never replaced) along derivation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
}

impl TypeSpec {
    fn builtin_int(name: &str, min: i128, max: i128) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            base: None,
            range: Some(RangeSet::single(min, max)),
            length: None,
            patterns: Vec::new(),
        })
    }

    fn builtin_plain(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            base: None,
            range: None,
            length: None,
            patterns: Vec::new(),
        })
    }

    fn builtin_string() -> Arc<Self> {
        Arc::new(Self {
            name: "string".to_owned(),
            base: None,
            range: None,
            length: Some(RangeSet::single(0, u64::MAX as i128)),
            patterns: Vec::new(),
        })
    }

    /// Effective numeric range: own restriction, or the nearest ancestor's.
    pub fn effective_range(&self) -> Option<&RangeSet> {
        match (&self.range, &self.base) {
            (Some(r), _) => Some(r),
            (None, Some(base)) => base.effective_range(),
            (None, None) => None,
        }
    }

    /// Effective length bounds: own restriction, or the nearest ancestor's.
    pub fn effective_length(&self) -> Option<&RangeSet> {
        match (&self.length, &self.base) {
            (Some(l), _) => Some(l),
            (None, Some(base)) => base.effective_length(),
            (None, None) => None,
        }
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// The statement support table plus built-in type singletons. One instance
/// serves any number of concurrent builds; all state is immutable.
#[derive(Debug)]
pub struct Registry {
    statements: BTreeMap<&'static str, StatementDef>,
    builtin_types: BTreeMap<&'static str, Arc<TypeSpec>>,
}

/// The full keyword table: (keyword, argument shape).
const STATEMENTS: &[(&str, ArgumentKind)] = &[
    ("module", ArgumentKind::Identifier),
    ("submodule", ArgumentKind::Identifier),
    ("namespace", ArgumentKind::Text),
    ("prefix", ArgumentKind::Identifier),
    ("revision", ArgumentKind::Text),
    ("revision-date", ArgumentKind::Text),
    ("import", ArgumentKind::Identifier),
    ("include", ArgumentKind::Identifier),
    ("belongs-to", ArgumentKind::Identifier),
    ("organization", ArgumentKind::Text),
    ("contact", ArgumentKind::Text),
    ("description", ArgumentKind::Text),
    ("reference", ArgumentKind::Text),
    ("units", ArgumentKind::Text),
    ("status", ArgumentKind::Identifier),
    ("container", ArgumentKind::Identifier),
    ("leaf", ArgumentKind::Identifier),
    ("leaf-list", ArgumentKind::Identifier),
    ("list", ArgumentKind::Identifier),
    ("key", ArgumentKind::Text),
    ("choice", ArgumentKind::Identifier),
    ("case", ArgumentKind::Identifier),
    ("anyxml", ArgumentKind::Identifier),
    ("grouping", ArgumentKind::Identifier),
    ("uses", ArgumentKind::Reference),
    ("refine", ArgumentKind::SchemaPath),
    ("augment", ArgumentKind::SchemaPath),
    ("when", ArgumentKind::Text),
    ("feature", ArgumentKind::Identifier),
    ("if-feature", ArgumentKind::Reference),
    ("identity", ArgumentKind::Identifier),
    ("base", ArgumentKind::Reference),
    ("typedef", ArgumentKind::Identifier),
    ("type", ArgumentKind::Reference),
    ("range", ArgumentKind::Text),
    ("length", ArgumentKind::Text),
    ("pattern", ArgumentKind::Text),
    ("path", ArgumentKind::Text),
    ("default", ArgumentKind::Text),
    ("presence", ArgumentKind::Text),
    ("config", ArgumentKind::Boolean),
    ("mandatory", ArgumentKind::Boolean),
    ("min-elements", ArgumentKind::Integer),
    ("max-elements", ArgumentKind::Text),
    ("deviation", ArgumentKind::SchemaPath),
    ("deviate", ArgumentKind::Deviate),
    ("extension", ArgumentKind::Identifier),
    ("argument", ArgumentKind::Identifier),
];

impl Registry {
    /// Build the registry with the standard keyword table and built-in
    /// type singletons.
    pub fn with_builtins() -> Self {
        let statements = STATEMENTS
            .iter()
            .map(|&(keyword, argument)| (keyword, StatementDef { keyword, argument }))
            .collect();

        let mut builtin_types = BTreeMap::new();
        let ints: &[(&str, i128, i128)] = &[
            ("int8", i8::MIN as i128, i8::MAX as i128),
            ("int16", i16::MIN as i128, i16::MAX as i128),
            ("int32", i32::MIN as i128, i32::MAX as i128),
            ("int64", i64::MIN as i128, i64::MAX as i128),
            ("uint8", 0, u8::MAX as i128),
            ("uint16", 0, u16::MAX as i128),
            ("uint32", 0, u32::MAX as i128),
            ("uint64", 0, u64::MAX as i128),
        ];
        for &(name, min, max) in ints {
            builtin_types.insert(name, TypeSpec::builtin_int(name, min, max));
        }
        builtin_types.insert("string", TypeSpec::builtin_string());
        for name in ["boolean", "empty", "binary", "identityref", "leafref"] {
            builtin_types.insert(name, TypeSpec::builtin_plain(name));
        }

        Self {
            statements,
            builtin_types,
        }
    }

    /// Look up the support entry for a keyword.
    pub fn lookup(&self, keyword: &str) -> Option<&StatementDef> {
        self.statements.get(keyword)
    }

    /// Look up a built-in type singleton. Repeated lookups return the same
    /// shared instance, never a copy.
    pub fn builtin_type(&self, name: &str) -> Option<Arc<TypeSpec>> {
        self.builtin_types.get(name).cloned()
    }

    /// Whether an unrecognized keyword is tolerated as an opaque extension
    /// statement. Prefixed keywords belong to an extension namespace and
    /// pass through; bare unknown keywords are rejected.
    pub fn tolerates_unknown(&self, keyword: &str) -> bool {
        keyword.contains(':')
    }

    /// Canonical compact JSON of the capability table, for fingerprinting.
    /// BTreeMap ordering makes the output stable across processes.
    pub fn canonical_json(&self) -> String {
        #[derive(Serialize)]
        struct Canon<'a> {
            statements: Vec<&'a StatementDef>,
            builtin_types: Vec<&'a str>,
        }
        let canon = Canon {
            statements: self.statements.values().collect(),
            builtin_types: self.builtin_types.keys().copied().collect(),
        };
        serde_json::to_string(&canon).expect("registry canonical form is serializable")
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
