// context.rs — Statement context tree
//
// The mutable working structure mirroring the declaration forest: one
// context per statement (plus contexts synthesized by grouping expansion),
// held in an index-addressed arena so parents can be referenced without
// ownership cycles. Holds per-context phase state, local namespace
// contributions, and the parsed-argument cache.
//
// Preconditions: declarations come from `decl::Declaration` (immutable).
// Postconditions: contexts become read-only once materialization consumes
//   the tree.
// Failure modes: unknown bare keywords, duplicate local definitions.
// Side effects: none beyond the owned arena.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::decl::{Declaration, PathSeg, ResolvedPath, SourceRef, Value};
use crate::deviation::DeviationRecord;
use crate::error::BuildError;
use crate::namespace::{local_put, NamespaceKind, NamespaceStorage, NsKey, NsValue};
use crate::phase::Phase;
use crate::registry::{Registry, TypeSpec};

// ── Identifiers ─────────────────────────────────────────────────────────────

/// Stable arena index of one statement context. Allocation order is source
/// order for the initial forest; expansion-created contexts follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CtxId(pub u32);

// ── Context node ────────────────────────────────────────────────────────────

/// One statement context. `parent` is a back reference (the arena owns all
/// nodes); `children` is the owning order.
#[derive(Debug)]
pub struct StatementContext {
    pub decl: Arc<Declaration>,
    pub parent: Option<CtxId>,
    pub children: Vec<CtxId>,
    pub phase: Phase,
    /// Effective owning module name. Submodule statements carry their
    /// belongs-to module; expansion copies carry the using module.
    pub module_name: String,
    /// Local namespace contributions (typedefs/groupings visible outward).
    pub local_ns: HashMap<(NamespaceKind, NsKey), NsValue>,
    /// Parsed argument, cached once the StatementDefinition phase runs.
    pub value: Option<Value>,
    /// For expansion copies: the context this one was copied from. Local
    /// lookups fall through to the origin's scope (substitution scope).
    pub copy_origin: Option<CtxId>,
    /// Set by deviation not-supported removal and by uses replacement.
    /// Deleted contexts stay in the arena but leave the tree.
    pub deleted: bool,
}

impl StatementContext {
    pub fn keyword(&self) -> &str {
        &self.decl.keyword
    }

    pub fn argument(&self) -> Option<&str> {
        self.decl.argument.as_deref()
    }

    pub fn source(&self) -> &SourceRef {
        &self.decl.source
    }
}

/// Keywords that form the resolved schema tree (path resolution targets).
pub fn is_schema_node(keyword: &str) -> bool {
    matches!(
        keyword,
        "container" | "leaf" | "leaf-list" | "list" | "choice" | "case" | "anyxml"
    )
}

// ── Build context ───────────────────────────────────────────────────────────

/// All mutable state of one build: the context arena, the global namespace
/// storage, and resolution side tables. Nothing here is shared between
/// builds; concurrent builds each own an independent instance.
pub struct BuildCtx<'a> {
    pub registry: &'a Registry,
    nodes: Vec<StatementContext>,
    pub global: NamespaceStorage,
    pub roots: Vec<CtxId>,
    /// Resolved effective type per typedef / per leaf type statement.
    pub type_specs: HashMap<CtxId, Arc<TypeSpec>>,
    /// Identity context → resolved base identity context.
    pub identity_bases: HashMap<CtxId, CtxId>,
    /// Deviations applied during the EffectiveModel phase.
    pub applied_deviations: Vec<DeviationRecord>,
    /// Augments already consumed by the grouping-internal pre-step; their
    /// scheduled actions become no-ops.
    pub handled_augments: HashSet<CtxId>,
    /// Features the build supports; None means all features supported.
    pub supported_features: Option<HashSet<String>>,
    /// Modules whose deviations apply; None means all.
    pub deviation_modules: Option<HashSet<String>>,
}

impl<'a> BuildCtx<'a> {
    pub fn new(
        registry: &'a Registry,
        supported_features: Option<HashSet<String>>,
        deviation_modules: Option<HashSet<String>>,
    ) -> Self {
        Self {
            registry,
            nodes: Vec::new(),
            global: NamespaceStorage::new(),
            roots: Vec::new(),
            type_specs: HashMap::new(),
            identity_bases: HashMap::new(),
            applied_deviations: Vec::new(),
            handled_augments: HashSet::new(),
            supported_features,
            deviation_modules,
        }
    }

    // ── Arena access ───────────────────────────────────────────────────────

    pub fn node(&self, id: CtxId) -> &StatementContext {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: CtxId) -> &mut StatementContext {
        &mut self.nodes[id.0 as usize]
    }

    pub fn keyword(&self, id: CtxId) -> &str {
        self.node(id).keyword()
    }

    pub fn argument(&self, id: CtxId) -> Option<&str> {
        self.node(id).argument()
    }

    pub fn source(&self, id: CtxId) -> &SourceRef {
        self.node(id).source()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All context ids, in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = CtxId> {
        (0..self.nodes.len() as u32).map(CtxId)
    }

    /// All live (non-deleted) children, in order.
    pub fn live_children(&self, id: CtxId) -> Vec<CtxId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(|&c| !self.node(c).deleted)
            .collect()
    }

    /// First live child with the given keyword.
    pub fn find_child(&self, id: CtxId, keyword: &str) -> Option<CtxId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .find(|&c| !self.node(c).deleted && self.keyword(c) == keyword)
    }

    /// The root context of the tree containing `id`.
    pub fn root_of(&self, id: CtxId) -> CtxId {
        let mut cur = id;
        while let Some(p) = self.node(cur).parent {
            cur = p;
        }
        cur
    }

    pub fn module_name_of(&self, id: CtxId) -> &str {
        &self.node(id).module_name
    }

    // ── Tree construction ──────────────────────────────────────────────────

    /// Build the context tree for one source root (module or submodule),
    /// one context per declaration. Validates every keyword against the
    /// registry; bare unknown keywords are fatal, prefixed unknowns pass
    /// through as opaque extension statements.
    pub fn add_root(&mut self, decl: Declaration) -> Result<CtxId, BuildError> {
        let module_name = match decl.keyword.as_str() {
            "module" => decl
                .argument
                .clone()
                .ok_or_else(|| BuildError::source("module requires a name", decl.source.clone()))?,
            "submodule" => decl
                .arg_of("belongs-to")
                .map(str::to_owned)
                .ok_or_else(|| {
                    BuildError::source(
                        "submodule requires a belongs-to statement",
                        decl.source.clone(),
                    )
                })?,
            other => {
                return Err(BuildError::source(
                    format!("expected module or submodule at source root, found '{other}'"),
                    decl.source.clone(),
                ))
            }
        };
        let root = self.create_from_decl(Arc::new(decl), None, &module_name)?;
        self.roots.push(root);
        Ok(root)
    }

    fn create_from_decl(
        &mut self,
        decl: Arc<Declaration>,
        parent: Option<CtxId>,
        module_name: &str,
    ) -> Result<CtxId, BuildError> {
        if self.registry.lookup(&decl.keyword).is_none()
            && !self.registry.tolerates_unknown(&decl.keyword)
        {
            return Err(BuildError::source(
                format!("unknown statement keyword '{}'", decl.keyword),
                decl.source.clone(),
            ));
        }
        let id = self.push_node(StatementContext {
            decl: decl.clone(),
            parent,
            children: Vec::new(),
            phase: Phase::SourceLinkage,
            module_name: module_name.to_owned(),
            local_ns: HashMap::new(),
            value: None,
            copy_origin: None,
            deleted: false,
        });
        for sub in &decl.substatements {
            // substatement Arc shares the parent's allocation indirectly;
            // clone the node since Declaration substatements are inline
            let child = self.create_from_decl(Arc::new(sub.clone()), Some(id), module_name)?;
            self.node_mut(id).children.push(child);
        }
        Ok(id)
    }

    fn push_node(&mut self, node: StatementContext) -> CtxId {
        let id = CtxId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Copy one context (not its children) under a new parent, as part of
    /// grouping expansion. The copy keeps the source's parsed value, adopts
    /// the using module's name, and records its origin for substitution-
    /// scope lookups. The copy joins the parent's current phase.
    pub fn copy_node(&mut self, src: CtxId, parent: CtxId, module_name: &str) -> CtxId {
        let phase = self.node(parent).phase;
        let node = StatementContext {
            decl: self.node(src).decl.clone(),
            parent: Some(parent),
            children: Vec::new(),
            phase,
            module_name: module_name.to_owned(),
            local_ns: HashMap::new(),
            value: self.node(src).value.clone(),
            copy_origin: Some(src),
            deleted: false,
        };
        let id = self.push_node(node);
        self.node_mut(parent).children.push(id);
        id
    }

    /// Remove a subtree from the tree (deviation not-supported, consumed
    /// uses statements). Contexts stay in the arena, marked deleted, so
    /// anything spliced into the subtree cascades out with it.
    pub fn remove_subtree(&mut self, id: CtxId) {
        self.node_mut(id).deleted = true;
        let children = self.node(id).children.clone();
        for c in children {
            self.remove_subtree(c);
        }
    }

    /// Advance every context to the given phase (called once per phase
    /// closure by the scheduler).
    pub fn advance_all(&mut self, phase: Phase) {
        for node in &mut self.nodes {
            node.phase = phase;
        }
    }

    // ── Namespaces ─────────────────────────────────────────────────────────

    /// Publish into a context's local namespace (write-once).
    pub fn local_publish(
        &mut self,
        at: CtxId,
        kind: NamespaceKind,
        key: NsKey,
        value: NsValue,
    ) -> Result<(), BuildError> {
        let src = self.node(at).source().clone();
        let node = self.node_mut(at);
        local_put(&mut node.local_ns, kind, key, value, &src)
    }

    /// Walk the local scope chain outward from `start`, following the
    /// substitution scope of expansion copies, then fall back to the global
    /// namespace.
    pub fn lookup(&self, start: CtxId, kind: NamespaceKind, key: &NsKey) -> Option<NsValue> {
        if let Some(v) = self.lookup_local(start, kind, key) {
            return Some(v);
        }
        self.global.get(kind, key).cloned()
    }

    fn lookup_local(&self, start: CtxId, kind: NamespaceKind, key: &NsKey) -> Option<NsValue> {
        let mut cur = Some(start);
        while let Some(id) = cur {
            let node = self.node(id);
            if let Some(v) = node.local_ns.get(&(kind, key.clone())) {
                return Some(v.clone());
            }
            if let Some(origin) = node.copy_origin {
                if let Some(v) = self.lookup_local(origin, kind, key) {
                    return Some(v);
                }
            }
            cur = node.parent;
        }
        None
    }

    /// Resolve a prefix to a module name, from the scope of `from`.
    /// Bindings are established during SourceLinkage; copies consult their
    /// origin module's bindings.
    pub fn resolve_prefix(&self, from: CtxId, prefix: &str) -> Option<String> {
        let mut at = from;
        loop {
            let root = self.root_of(at);
            let key = NsKey::ModulePrefix {
                module: root,
                prefix: prefix.to_owned(),
            };
            if let Some(v) = self.global.get(NamespaceKind::Prefix, &key) {
                return v.as_module_name().map(str::to_owned);
            }
            // fall through to the origin scope for expansion copies
            match self.origin_of(at) {
                Some(origin) => at = origin,
                None => return None,
            }
        }
    }

    fn origin_of(&self, id: CtxId) -> Option<CtxId> {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if let Some(origin) = self.node(c).copy_origin {
                return Some(origin);
            }
            cur = self.node(c).parent;
        }
        None
    }

    // ── Schema path resolution ──────────────────────────────────────────────

    /// Resolve a schema path to a context. Absolute paths start at the
    /// target module's root; relative paths start at `base`. Returns None
    /// while the target's shape has not yet stabilized — callers retry via
    /// the scheduler until their phase deadline.
    pub fn find_schema_node(&self, base: CtxId, path: &ResolvedPath) -> Option<CtxId> {
        let mut cur = if path.absolute {
            let module = path.segments.first()?.module.as_deref();
            let name = module.unwrap_or_else(|| self.module_name_of(base));
            self.global
                .get(NamespaceKind::Module, &NsKey::Name(name.to_owned()))?
                .as_ctx()?
        } else {
            base
        };
        for seg in &path.segments {
            cur = self.match_child(cur, seg)?;
        }
        Some(cur)
    }

    fn match_child(&self, parent: CtxId, seg: &PathSeg) -> Option<CtxId> {
        self.node(parent).children.iter().copied().find(|&c| {
            let node = self.node(c);
            !node.deleted
                && is_schema_node(node.keyword())
                && node.argument() == Some(seg.name.as_str())
                && seg
                    .module
                    .as_deref()
                    .map_or(true, |m| m == node.module_name)
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
