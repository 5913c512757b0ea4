// effective.rs — Effective model materialization
//
// Consumes a finished build context and produces the immutable effective
// model: one module per source module (submodule bodies folded into their
// owning module), definition and linkage statements lifted out of the body
// into dedicated tables, conditional nodes pruned against the supported
// feature set, and every type statement carrying its resolved spec.
//
// Preconditions: all four phases closed on the build context.
// Postconditions: the model is deeply immutable; equal inputs produce
//   equal models; unrestricted built-in types keep singleton identity.
// Failure modes: none (structural errors already failed the build).
// Side effects: none.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::context::{BuildCtx, CtxId};
use crate::decl::SourceRef;
use crate::deviation::DeviationRecord;
use crate::error::BuildError;
use crate::registry::TypeSpec;

/// Statements absorbed into module metadata or definition tables; they do
/// not appear in the effective body.
const NON_BODY: &[&str] = &[
    "namespace",
    "prefix",
    "revision",
    "revision-date",
    "import",
    "include",
    "belongs-to",
    "organization",
    "contact",
    "grouping",
    "typedef",
    "uses",
    "refine",
    "augment",
    "deviation",
    "deviate",
    "feature",
    "identity",
    "extension",
];

// ── Model types ─────────────────────────────────────────────────────────────

/// One effective statement node. Children are shared immutably; a `type`
/// statement carries its resolved spec.
#[derive(Debug, PartialEq, Serialize)]
pub struct EffectiveStatement {
    pub keyword: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_spec: Option<Arc<TypeSpec>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Arc<EffectiveStatement>>,
    #[serde(skip)]
    pub source: SourceRef,
}

/// An identity definition with its resolved base, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveIdentity {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
}

/// One module of the effective model, with submodule contributions folded
/// in and applied deviations recorded on the deviating module.
#[derive(Debug, PartialEq, Serialize)]
pub struct EffectiveModule {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub typedefs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<EffectiveIdentity>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deviations: Vec<DeviationRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<Arc<EffectiveStatement>>,
}

/// The immutable result of a successful build.
#[derive(Debug, PartialEq, Serialize)]
pub struct EffectiveModel {
    pub modules: Vec<Arc<EffectiveModule>>,
}

impl EffectiveModel {
    /// Find a module by name. With a revision the match is exact; without
    /// one the latest revision wins when several are present.
    pub fn find_module(&self, name: &str, revision: Option<&str>) -> Option<&Arc<EffectiveModule>> {
        let mut candidates: Vec<&Arc<EffectiveModule>> =
            self.modules.iter().filter(|m| m.name == name).collect();
        match revision {
            Some(rev) => candidates
                .into_iter()
                .find(|m| m.revision.as_deref() == Some(rev)),
            None => {
                candidates.sort_by(|a, b| a.revision.cmp(&b.revision));
                candidates.pop()
            }
        }
    }

    /// Walk a module's effective body by node names.
    pub fn find_schema_node(
        &self,
        module: &str,
        path: &[&str],
    ) -> Option<&Arc<EffectiveStatement>> {
        let module = self.find_module(module, None)?;
        let mut level = &module.body;
        let mut found = None;
        for name in path {
            let hit = level
                .iter()
                .find(|s| s.argument.as_deref() == Some(*name))?;
            level = &hit.children;
            found = Some(hit);
        }
        found
    }
}

// ── Materialization ─────────────────────────────────────────────────────────

/// Materialize the effective model from a finished build.
pub fn materialize(build: &BuildCtx) -> Result<EffectiveModel, BuildError> {
    let mut modules = Vec::new();
    for &root in &build.roots {
        if build.keyword(root) != "module" || build.node(root).deleted {
            continue;
        }
        let name = build.argument(root).unwrap_or_default().to_owned();

        let mut typedefs = Vec::new();
        let mut features = Vec::new();
        let mut identities = Vec::new();
        let mut body = Vec::new();
        collect_module(build, root, &mut typedefs, &mut features, &mut identities, &mut body);
        // submodule bodies fold into the owning module
        for &sub in &build.roots {
            if build.keyword(sub) == "submodule"
                && !build.node(sub).deleted
                && build.module_name_of(sub) == name
            {
                collect_module(build, sub, &mut typedefs, &mut features, &mut identities, &mut body);
            }
        }

        let deviations = build
            .applied_deviations
            .iter()
            .filter(|d| d.module == name)
            .cloned()
            .collect();

        modules.push(Arc::new(EffectiveModule {
            namespace: child_arg(build, root, "namespace"),
            prefix: child_arg(build, root, "prefix"),
            revision: latest_revision(build, root),
            name,
            typedefs,
            features,
            identities,
            deviations,
            body,
        }));
    }
    debug!(modules = modules.len(), "materialized effective model");
    Ok(EffectiveModel { modules })
}

fn collect_module(
    build: &BuildCtx,
    root: CtxId,
    typedefs: &mut Vec<String>,
    features: &mut Vec<String>,
    identities: &mut Vec<EffectiveIdentity>,
    body: &mut Vec<Arc<EffectiveStatement>>,
) {
    for child in build.live_children(root) {
        match build.keyword(child) {
            "typedef" => {
                if let Some(n) = build.argument(child) {
                    typedefs.push(n.to_owned());
                }
            }
            "feature" => {
                if let Some(n) = build.argument(child) {
                    features.push(n.to_owned());
                }
            }
            "identity" => {
                if let Some(n) = build.argument(child) {
                    identities.push(EffectiveIdentity {
                        name: n.to_owned(),
                        base: build
                            .identity_bases
                            .get(&child)
                            .and_then(|&b| build.argument(b))
                            .map(str::to_owned),
                    });
                }
            }
            kw if NON_BODY.contains(&kw) => {}
            _ => {
                if let Some(stmt) = materialize_stmt(build, child) {
                    body.push(stmt);
                }
            }
        }
    }
}

/// Materialize one context subtree, pruning nodes whose if-feature gate is
/// not in the supported set. Returns None for pruned nodes.
fn materialize_stmt(build: &BuildCtx, id: CtxId) -> Option<Arc<EffectiveStatement>> {
    if !feature_enabled(build, id) {
        return None;
    }
    let mut children = Vec::new();
    for child in build.live_children(id) {
        let kw = build.keyword(child);
        if NON_BODY.contains(&kw) {
            continue;
        }
        if let Some(stmt) = materialize_stmt(build, child) {
            children.push(stmt);
        }
    }
    let type_spec = if build.keyword(id) == "type" {
        build.type_specs.get(&id).cloned()
    } else {
        None
    };
    Some(Arc::new(EffectiveStatement {
        keyword: build.keyword(id).to_owned(),
        argument: build.argument(id).map(str::to_owned),
        type_spec,
        children,
        source: build.source(id).clone(),
    }))
}

/// Whether every if-feature gate on `id` names a supported feature. With no
/// configured feature set, everything is supported.
fn feature_enabled(build: &BuildCtx, id: CtxId) -> bool {
    let Some(supported) = &build.supported_features else {
        return true;
    };
    build
        .live_children(id)
        .into_iter()
        .filter(|&c| build.keyword(c) == "if-feature")
        .all(|c| {
            build
                .argument(c)
                .map(|arg| arg.rsplit(':').next().unwrap_or(arg))
                .is_some_and(|name| supported.contains(name))
        })
}

fn child_arg(build: &BuildCtx, root: CtxId, keyword: &str) -> Option<String> {
    build
        .find_child(root, keyword)
        .and_then(|c| build.argument(c))
        .map(str::to_owned)
}

/// The lexically greatest revision date of the module, if any.
fn latest_revision(build: &BuildCtx, root: CtxId) -> Option<String> {
    build
        .live_children(root)
        .into_iter()
        .filter(|&c| build.keyword(c) == "revision")
        .filter_map(|c| build.argument(c).map(str::to_owned))
        .max()
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::{Declaration, SourceRef};
    use crate::linkage::{define_statement, register_source};
    use crate::registry::Registry;
    use crate::typeres::derive_type_action;
    use std::collections::HashSet;

    fn at(line: u32) -> SourceRef {
        SourceRef::new("m", line)
    }

    fn define_all(build: &mut BuildCtx, id: CtxId) {
        define_statement(build, id).unwrap();
        for c in build.live_children(id) {
            define_all(build, c);
        }
    }

    fn sample_module() -> Declaration {
        Declaration::new("module", Some("m"), at(1))
            .with(Declaration::new("prefix", Some("m"), at(2)))
            .with(Declaration::new("namespace", Some("urn:m"), at(3)))
            .with(Declaration::new("revision", Some("2024-01-01"), at(4)))
            .with(Declaration::new("revision", Some("2023-06-01"), at(5)))
            .with(Declaration::new("feature", Some("extras"), at(6)))
            .with(
                Declaration::new("container", Some("top"), at(7))
                    .with(
                        Declaration::new("leaf", Some("x"), at(8))
                            .with(Declaration::new("type", Some("int8"), at(9))),
                    )
                    .with(
                        Declaration::new("leaf", Some("opt"), at(10))
                            .with(Declaration::new("if-feature", Some("extras"), at(11)))
                            .with(Declaration::new("type", Some("string"), at(12))),
                    ),
            )
    }

    fn built(features: Option<HashSet<String>>) -> EffectiveModel {
        let registry = Registry::with_builtins();
        let mut build = BuildCtx::new(&registry, features, None);
        let root = build.add_root(sample_module()).unwrap();
        register_source(&mut build, root).unwrap();
        define_all(&mut build, root);
        let top = build.find_child(root, "container").unwrap();
        for leaf in build.live_children(top) {
            if let Some(ty) = build.find_child(leaf, "type") {
                derive_type_action(&mut build, ty).unwrap();
            }
        }
        materialize(&build).unwrap()
    }

    #[test]
    fn header_and_latest_revision_are_captured() {
        let model = built(None);
        let m = model.find_module("m", None).unwrap();
        assert_eq!(m.namespace.as_deref(), Some("urn:m"));
        assert_eq!(m.prefix.as_deref(), Some("m"));
        assert_eq!(m.revision.as_deref(), Some("2024-01-01"));
        assert_eq!(m.features, vec!["extras"]);
    }

    #[test]
    fn body_excludes_definition_statements() {
        let model = built(None);
        let m = model.find_module("m", None).unwrap();
        assert_eq!(m.body.len(), 1);
        assert_eq!(m.body[0].keyword, "container");
    }

    #[test]
    fn type_statement_carries_the_resolved_spec() {
        let model = built(None);
        let leaf = model.find_schema_node("m", &["top", "x"]).unwrap();
        let ty = &leaf.children[0];
        assert_eq!(ty.keyword, "type");
        let spec = ty.type_spec.as_ref().unwrap();
        let registry = Registry::with_builtins();
        assert_eq!(
            spec.as_ref(),
            registry.builtin_type("int8").unwrap().as_ref()
        );
    }

    #[test]
    fn unsupported_feature_prunes_the_gated_node() {
        let model = built(Some(HashSet::new()));
        let top = model.find_schema_node("m", &["top"]).unwrap();
        let names: Vec<_> = top
            .children
            .iter()
            .filter_map(|c| c.argument.as_deref())
            .collect();
        assert!(names.contains(&"x"));
        assert!(!names.contains(&"opt"));
    }

    #[test]
    fn supported_feature_keeps_the_gated_node() {
        let mut features = HashSet::new();
        features.insert("extras".to_owned());
        let model = built(Some(features));
        assert!(model.find_schema_node("m", &["top", "opt"]).is_some());
    }

    #[test]
    fn identical_inputs_produce_equal_models() {
        assert_eq!(built(None), built(None));
    }
}
