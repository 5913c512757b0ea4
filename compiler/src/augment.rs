// augment.rs — Augmentation appliers
//
// Splices an augmentation's child definitions into a resolved target node.
// Schema-tree augments are scheduled actions whose target-path prerequisite
// retries each sweep until grouping expansion has stabilized the target's
// shape. Augments whose target is a grouping definition run in a pre-step
// before any use-site expansion, so every copy already includes them —
// grouping-internal augmentations always resolve before use-site ones.
//
// Preconditions: StatementDefinition values cached; for scheduled augments
//   the target path resolved (reactor prerequisite).
// Postconditions: spliced nodes carry any `when` / `if-feature` predicate
//   of the augmentation, stored unevaluated.
// Failure modes: Reference (grouping-internal target path dead ends).
// Side effects: context arena growth; spawned inference actions.

use tracing::debug;

use crate::context::{BuildCtx, CtxId};
use crate::decl::{QName, ResolvedPath};
use crate::error::BuildError;
use crate::grouping::copy_tree;
use crate::namespace::{NamespaceKind, NsKey};
use crate::reactor::InferenceAction;

/// Augment children that describe the augmentation itself rather than
/// content to splice.
const NOT_SPLICED: &[&str] = &["when", "if-feature", "description", "reference", "status"];

// ── Scheduled schema-tree augments ──────────────────────────────────────────

/// Apply one scheduled augmentation to its schema-tree target.
pub fn apply_augment(
    build: &mut BuildCtx,
    augment: CtxId,
    spawned: &mut Vec<InferenceAction>,
) -> Result<(), BuildError> {
    if build.handled_augments.contains(&augment) || build.node(augment).deleted {
        return Ok(());
    }
    let src = build.source(augment).clone();
    let path = build
        .node(augment)
        .value
        .as_ref()
        .and_then(|v| v.as_path())
        .cloned()
        .ok_or_else(|| BuildError::source("augment requires a target path", src.clone()))?;
    let base = build.root_of(augment);
    let target = build
        .find_schema_node(base, &path)
        .ok_or_else(|| BuildError::reference(format!("augment target '{path}' not found"), src))?;

    splice_augment(build, augment, target, spawned)?;
    build.handled_augments.insert(augment);
    Ok(())
}

/// Copy an augmentation's content under `target`, attaching the
/// augmentation's conditional predicates to each spliced node.
pub fn splice_augment(
    build: &mut BuildCtx,
    augment: CtxId,
    target: CtxId,
    spawned: &mut Vec<InferenceAction>,
) -> Result<(), BuildError> {
    let module = build.module_name_of(augment).to_owned();
    let predicates: Vec<CtxId> = build
        .live_children(augment)
        .into_iter()
        .filter(|&c| matches!(build.keyword(c), "when" | "if-feature"))
        .collect();

    let mut new_nodes = Vec::new();
    for child in build.live_children(augment) {
        if NOT_SPLICED.contains(&build.keyword(child)) {
            continue;
        }
        let mut stack = Vec::new();
        let copy = copy_tree(build, child, target, &module, &mut stack, spawned)?;
        new_nodes.push(copy);
    }

    // conditional-applicability predicates ride along, uninterpreted
    for node in &new_nodes {
        for &pred in &predicates {
            let mut stack = Vec::new();
            copy_tree(build, pred, *node, &module, &mut stack, spawned)?;
        }
    }
    debug!(count = new_nodes.len(), "spliced augmentation content");
    Ok(())
}

// ── Grouping-internal augments (pre-expansion step) ─────────────────────────

/// Apply every augmentation whose target path points inside a grouping to
/// the grouping's canonical definition, before any use-site expansion.
/// Returns the actions spawned for the spliced contexts.
pub fn apply_grouping_augments(build: &mut BuildCtx) -> Result<Vec<InferenceAction>, BuildError> {
    let mut spawned = Vec::new();
    let candidates: Vec<CtxId> = build
        .ids()
        .filter(|&id| {
            build.keyword(id) == "augment"
                && !build.node(id).deleted
                && build
                    .node(id)
                    .parent
                    .map_or(false, |p| build.node(p).parent.is_none())
        })
        .collect();

    for augment in candidates {
        let Some(path) = build
            .node(augment)
            .value
            .as_ref()
            .and_then(|v| v.as_path())
            .cloned()
        else {
            continue;
        };
        let Some(first) = path.segments.first() else {
            continue;
        };
        let module = first
            .module
            .clone()
            .unwrap_or_else(|| build.module_name_of(augment).to_owned());
        let qname = QName::new(module, first.name.clone());
        let Some(grouping) = build
            .lookup(augment, NamespaceKind::Grouping, &NsKey::Qualified(qname.clone()))
            .and_then(|v| v.as_ctx())
        else {
            continue; // a schema-tree augment; its scheduled action handles it
        };

        let rest = ResolvedPath {
            absolute: false,
            segments: path.segments[1..].to_vec(),
        };
        let target = if rest.segments.is_empty() {
            grouping
        } else {
            build.find_schema_node(grouping, &rest).ok_or_else(|| {
                BuildError::reference(
                    format!("augment target '{path}' not found inside grouping '{qname}'"),
                    build.source(augment).clone(),
                )
            })?
        };
        splice_augment(build, augment, target, &mut spawned)?;
        build.handled_augments.insert(augment);
    }
    Ok(spawned)
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::{Declaration, SourceRef};
    use crate::linkage::{define_statement, register_source};
    use crate::registry::Registry;

    fn at(line: u32) -> SourceRef {
        SourceRef::new("m", line)
    }

    fn prepared<'a>(registry: &'a Registry, decl: Declaration) -> (BuildCtx<'a>, CtxId) {
        let mut build = BuildCtx::new(registry, None, None);
        let root = build.add_root(decl).unwrap();
        register_source(&mut build, root).unwrap();
        define_all(&mut build, root);
        (build, root)
    }

    fn define_all(build: &mut BuildCtx, id: CtxId) {
        define_statement(build, id).unwrap();
        for c in build.live_children(id) {
            define_all(build, c);
        }
    }

    #[test]
    fn augment_splices_children_into_target() {
        let registry = Registry::with_builtins();
        let decl = Declaration::new("module", Some("m"), at(1))
            .with(Declaration::new("prefix", Some("m"), at(2)))
            .with(Declaration::new("container", Some("top"), at(3)))
            .with(
                Declaration::new("augment", Some("/m:top"), at(4))
                    .with(Declaration::new("leaf", Some("extra"), at(5))),
            );
        let (mut build, root) = prepared(&registry, decl);
        // module must be registered for absolute path resolution
        let augment = build.find_child(root, "augment").unwrap();
        let mut spawned = Vec::new();
        apply_augment(&mut build, augment, &mut spawned).unwrap();

        let top = build.find_child(root, "container").unwrap();
        let leaf = build.find_child(top, "leaf").unwrap();
        assert_eq!(build.argument(leaf), Some("extra"));
    }

    #[test]
    fn augment_when_predicate_rides_on_spliced_nodes() {
        let registry = Registry::with_builtins();
        let decl = Declaration::new("module", Some("m"), at(1))
            .with(Declaration::new("prefix", Some("m"), at(2)))
            .with(Declaration::new("container", Some("top"), at(3)))
            .with(
                Declaration::new("augment", Some("/m:top"), at(4))
                    .with(Declaration::new("when", Some("../enabled = 'true'"), at(5)))
                    .with(Declaration::new("leaf", Some("extra"), at(6))),
            );
        let (mut build, root) = prepared(&registry, decl);
        let augment = build.find_child(root, "augment").unwrap();
        let mut spawned = Vec::new();
        apply_augment(&mut build, augment, &mut spawned).unwrap();

        let top = build.find_child(root, "container").unwrap();
        let leaf = build.find_child(top, "leaf").unwrap();
        let when = build.find_child(leaf, "when").unwrap();
        assert_eq!(build.argument(when), Some("../enabled = 'true'"));
    }

    #[test]
    fn grouping_target_augment_lands_before_expansion() {
        let registry = Registry::with_builtins();
        let decl = Declaration::new("module", Some("m"), at(1))
            .with(Declaration::new("prefix", Some("m"), at(2)))
            .with(
                Declaration::new("grouping", Some("g"), at(3))
                    .with(Declaration::new("leaf", Some("a"), at(4))),
            )
            .with(
                Declaration::new("augment", Some("/m:g"), at(5))
                    .with(Declaration::new("leaf", Some("added"), at(6))),
            );
        let (mut build, root) = prepared(&registry, decl);
        apply_grouping_augments(&mut build).unwrap();

        let grouping = build.find_child(root, "grouping").unwrap();
        let leaves: Vec<_> = build
            .live_children(grouping)
            .into_iter()
            .filter(|&c| build.keyword(c) == "leaf")
            .collect();
        assert_eq!(leaves.len(), 2);
        let augment = build.find_child(root, "augment").unwrap();
        assert!(build.handled_augments.contains(&augment));
    }
}
