// namespace.rs — Typed, write-once namespace storage
//
// Publishes and looks up definitions during one build: module identities,
// prefix bindings, and qualified-name definition namespaces. A key, once
// bound, is never rebound — a second write to the same key is a fatal
// duplicate-definition failure, never a silent overwrite.
//
// Global namespaces (build-wide) live in one `NamespaceStorage`; local
// namespaces (typedefs/groupings visible through enclosing scopes) use the
// same key/value types but are stored per statement context.

use std::collections::HashMap;
use std::fmt;

use crate::context::CtxId;
use crate::decl::{QName, SourceRef};
use crate::error::BuildError;

// ── Keys and values ─────────────────────────────────────────────────────────

/// The typed namespace families of one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Module/submodule name → source root context.
    Module,
    /// (importing module, prefix) → imported module name.
    Prefix,
    Grouping,
    Typedef,
    Identity,
    Feature,
    Extension,
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Module => "module",
            Self::Prefix => "prefix",
            Self::Grouping => "grouping",
            Self::Typedef => "typedef",
            Self::Identity => "identity",
            Self::Feature => "feature",
            Self::Extension => "extension",
        };
        write!(f, "{s}")
    }
}

/// Namespace key. Module sources key by plain name (one revision of a
/// module per build); definitions key by fully qualified name; prefix
/// bindings key by the binding module's context plus the prefix literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NsKey {
    Name(String),
    Qualified(QName),
    ModulePrefix { module: CtxId, prefix: String },
}

impl fmt::Display for NsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(n) => write!(f, "{n}"),
            Self::Qualified(q) => write!(f, "{q}"),
            Self::ModulePrefix { prefix, .. } => write!(f, "prefix {prefix}"),
        }
    }
}

/// Namespace entry value: a statement context, or a resolved module name
/// (prefix bindings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NsValue {
    Ctx(CtxId),
    ModuleName(String),
}

impl NsValue {
    pub fn as_ctx(&self) -> Option<CtxId> {
        match self {
            Self::Ctx(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_module_name(&self) -> Option<&str> {
        match self {
            Self::ModuleName(n) => Some(n),
            _ => None,
        }
    }
}

// ── Storage ─────────────────────────────────────────────────────────────────

/// One write-once map over all namespace kinds. Scoped to a single build;
/// nothing here is visible to any other build.
#[derive(Debug, Default)]
pub struct NamespaceStorage {
    entries: HashMap<(NamespaceKind, NsKey), NsValue>,
}

impl NamespaceStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: NamespaceKind, key: &NsKey) -> Option<&NsValue> {
        self.entries.get(&(kind, key.clone()))
    }

    pub fn contains(&self, kind: NamespaceKind, key: &NsKey) -> bool {
        self.entries.contains_key(&(kind, key.clone()))
    }

    /// Bind a key. Fails if the key is already bound — the write-once
    /// discipline is what makes sweep order irrelevant to output.
    pub fn put(
        &mut self,
        kind: NamespaceKind,
        key: NsKey,
        value: NsValue,
        at: &SourceRef,
    ) -> Result<(), BuildError> {
        match self.entries.entry((kind, key)) {
            std::collections::hash_map::Entry::Occupied(e) => Err(BuildError::constraint(
                format!("duplicate {} definition '{}'", e.key().0, e.key().1),
                at.clone(),
            )),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(value);
                Ok(())
            }
        }
    }
}

/// Write-once insert into a context-local namespace map. Same discipline as
/// the global storage; free function because local maps live inside the
/// context arena.
pub fn local_put(
    map: &mut HashMap<(NamespaceKind, NsKey), NsValue>,
    kind: NamespaceKind,
    key: NsKey,
    value: NsValue,
    at: &SourceRef,
) -> Result<(), BuildError> {
    match map.entry((kind, key)) {
        std::collections::hash_map::Entry::Occupied(e) => Err(BuildError::constraint(
            format!("duplicate {} definition '{}'", e.key().0, e.key().1),
            at.clone(),
        )),
        std::collections::hash_map::Entry::Vacant(e) => {
            e.insert(value);
            Ok(())
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn at() -> SourceRef {
        SourceRef::new("test", 1)
    }

    #[test]
    fn get_after_put_round_trips() {
        let mut ns = NamespaceStorage::new();
        let key = NsKey::Qualified(QName::new("m", "g"));
        ns.put(NamespaceKind::Grouping, key.clone(), NsValue::Ctx(CtxId(7)), &at())
            .unwrap();
        assert_eq!(
            ns.get(NamespaceKind::Grouping, &key).unwrap().as_ctx(),
            Some(CtxId(7))
        );
    }

    #[test]
    fn second_write_to_same_key_is_fatal() {
        let mut ns = NamespaceStorage::new();
        let key = NsKey::Name("mod-a".to_owned());
        ns.put(NamespaceKind::Module, key.clone(), NsValue::Ctx(CtxId(0)), &at())
            .unwrap();
        let err = ns
            .put(NamespaceKind::Module, key.clone(), NsValue::Ctx(CtxId(1)), &at())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConstraintViolation);
        assert!(err.message.contains("duplicate"));
        // the original binding survives
        assert_eq!(
            ns.get(NamespaceKind::Module, &key).unwrap().as_ctx(),
            Some(CtxId(0))
        );
    }

    #[test]
    fn same_key_in_different_kinds_is_independent() {
        let mut ns = NamespaceStorage::new();
        let key = NsKey::Qualified(QName::new("m", "x"));
        ns.put(NamespaceKind::Grouping, key.clone(), NsValue::Ctx(CtxId(1)), &at())
            .unwrap();
        ns.put(NamespaceKind::Typedef, key.clone(), NsValue::Ctx(CtxId(2)), &at())
            .unwrap();
        assert!(ns.contains(NamespaceKind::Grouping, &key));
        assert!(ns.contains(NamespaceKind::Typedef, &key));
    }
}
