// decl.rs — Declaration tree and name primitives
//
// The immutable input shape: keyword + raw argument + ordered substatements,
// positioned with a source module name and line. Produced by an external
// lexical front end and consumed here as a serde-deserialized forest.
//
// Preconditions: none (types only).
// Postconditions: declarations are never mutated after construction.
// Failure modes: argument parse helpers return `BuildError` (Source kind).
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

// ── Source position ─────────────────────────────────────────────────────────

/// Source position of a declaration: module name plus line number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub module: String,
    pub line: u32,
}

impl SourceRef {
    pub fn new(module: impl Into<String>, line: u32) -> Self {
        Self {
            module: module.into(),
            line,
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.line)
    }
}

// ── Declaration node ────────────────────────────────────────────────────────

/// One parsed statement: keyword, raw argument, ordered substatements.
/// Immutable once constructed; the context tree shares these via `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub keyword: String,
    #[serde(default)]
    pub argument: Option<String>,
    #[serde(default)]
    pub substatements: Vec<Declaration>,
    pub source: SourceRef,
}

impl Declaration {
    pub fn new(keyword: impl Into<String>, argument: Option<&str>, source: SourceRef) -> Self {
        Self {
            keyword: keyword.into(),
            argument: argument.map(str::to_owned),
            substatements: Vec::new(),
            source,
        }
    }

    /// Builder-style child attachment, used heavily by tests.
    pub fn with(mut self, child: Declaration) -> Self {
        self.substatements.push(child);
        self
    }

    /// First substatement with the given keyword, if any.
    pub fn find_first(&self, keyword: &str) -> Option<&Declaration> {
        self.substatements.iter().find(|s| s.keyword == keyword)
    }

    /// Raw argument of the first substatement with the given keyword.
    pub fn arg_of(&self, keyword: &str) -> Option<&str> {
        self.find_first(keyword).and_then(|s| s.argument.as_deref())
    }
}

// ── Qualified names ─────────────────────────────────────────────────────────

/// A fully resolved qualified name: owning module name + local name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    pub module: String,
    pub name: String,
}

impl QName {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.name)
    }
}

/// A possibly-prefixed reference as written in source (`pfx:name` or `name`).
/// The prefix resolves to a module identity during SourceLinkage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawRef {
    pub prefix: Option<String>,
    pub name: String,
}

impl RawRef {
    pub fn parse(text: &str, at: &SourceRef) -> Result<Self, BuildError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(BuildError::source("empty name reference", at.clone()));
        }
        match text.split_once(':') {
            Some((prefix, name)) => {
                if prefix.is_empty() || name.is_empty() || name.contains(':') {
                    return Err(BuildError::source(
                        format!("malformed qualified name '{text}'"),
                        at.clone(),
                    ));
                }
                Ok(Self {
                    prefix: Some(prefix.to_owned()),
                    name: name.to_owned(),
                })
            }
            None => Ok(Self {
                prefix: None,
                name: text.to_owned(),
            }),
        }
    }
}

impl fmt::Display for RawRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(p) => write!(f, "{}:{}", p, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

// ── Schema paths ────────────────────────────────────────────────────────────

/// A schema node path: `/a/pfx:b` (absolute) or `a/b` (relative).
/// Segments keep their written prefixes; resolution happens against the
/// referencing module's prefix bindings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaPath {
    pub absolute: bool,
    pub segments: Vec<RawRef>,
}

impl SchemaPath {
    pub fn parse(text: &str, at: &SourceRef) -> Result<Self, BuildError> {
        let text = text.trim();
        let (absolute, rest) = match text.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        if rest.is_empty() {
            return Err(BuildError::source(
                format!("empty schema path '{text}'"),
                at.clone(),
            ));
        }
        let mut segments = Vec::new();
        for seg in rest.split('/') {
            segments.push(RawRef::parse(seg, at)?);
        }
        Ok(Self { absolute, segments })
    }
}

impl fmt::Display for SchemaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "/")?;
        }
        let mut first = true;
        for seg in &self.segments {
            if !first {
                write!(f, "/")?;
            }
            write!(f, "{seg}")?;
            first = false;
        }
        Ok(())
    }
}

/// One segment of a resolved schema path. Prefixed segments carry their
/// resolved module name; unprefixed segments match by local name only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSeg {
    pub module: Option<String>,
    pub name: String,
}

/// A schema path after prefix resolution (prefixes replaced by module
/// names). Produced during the StatementDefinition phase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedPath {
    pub absolute: bool,
    pub segments: Vec<PathSeg>,
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "/")?;
        }
        let mut first = true;
        for seg in &self.segments {
            if !first {
                write!(f, "/")?;
            }
            match &seg.module {
                Some(m) => write!(f, "{}:{}", m, seg.name)?,
                None => write!(f, "{}", seg.name)?,
            }
            first = false;
        }
        Ok(())
    }
}

// ── Parsed argument values ──────────────────────────────────────────────────

/// Deviate dispositions (closed literal set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviateKind {
    NotSupported,
    Add,
    Replace,
    Delete,
}

impl DeviateKind {
    /// Parse a deviate argument literal. The error message prefix is part of
    /// the compatibility contract and must not change.
    pub fn parse(text: &str, at: &SourceRef) -> Result<Self, BuildError> {
        match text {
            "not-supported" => Ok(Self::NotSupported),
            "add" => Ok(Self::Add),
            "replace" => Ok(Self::Replace),
            "delete" => Ok(Self::Delete),
            other => Err(BuildError::source(
                format!("String '{other}' is not valid deviate argument"),
                at.clone(),
            )),
        }
    }
}

impl fmt::Display for DeviateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotSupported => "not-supported",
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// A statement argument after keyword-specific parsing, cached on the
/// statement context once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Free-form text (descriptions, URIs, patterns, revision dates).
    Str(String),
    /// An unqualified identifier (module names, prefixes, keys).
    Ident(String),
    /// A fully resolved reference to a named definition.
    Ref(QName),
    /// A schema node path with prefixes resolved to module names.
    Path(ResolvedPath),
    Int(i64),
    Bool(bool),
    Deviate(DeviateKind),
}

impl Value {
    pub fn as_ref_name(&self) -> Option<&QName> {
        match self {
            Value::Ref(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&ResolvedPath> {
        match self {
            Value::Path(p) => Some(p),
            _ => None,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
