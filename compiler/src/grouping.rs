// grouping.rs — Uses expansion and refine overrides
//
// Expands a referenced grouping's body into each use site as a deep,
// independent copy. Nested uses inside the copied body re-expand
// recursively at copy time; a grouping that reaches itself through any
// chain of uses is detected by path tracking and fails the build instead
// of recursing unboundedly. Refine overrides then replace the targeted
// property set on nodes inside the fresh copy only.
//
// Preconditions: the uses reference resolved (reactor prerequisite);
//   StatementDefinition values are cached on all source contexts.
// Postconditions: copies carry the using module's name, record their
//   origin for substitution-scope lookups, and join the current phase.
// Failure modes: cyclic grouping reference, unresolved nested grouping,
//   refine target absent from the copy.
// Side effects: context arena growth; spawned inference actions.

use tracing::debug;

use crate::augment::splice_augment;
use crate::context::{BuildCtx, CtxId};
use crate::decl::QName;
use crate::error::BuildError;
use crate::namespace::{NamespaceKind, NsKey, NsValue};
use crate::reactor::{register_copy, InferenceAction};

/// Grouping-body children that never enter the copy: documentation of the
/// grouping itself, and local definitions (reachable from copies through
/// the substitution scope instead).
const NOT_COPIED: &[&str] = &["description", "reference", "status", "typedef", "grouping"];

/// Refine may replace exactly these properties on its target.
const REFINABLE: &[&str] = &[
    "description",
    "reference",
    "default",
    "mandatory",
    "config",
    "presence",
    "units",
    "min-elements",
    "max-elements",
    "if-feature",
];

// ── Uses expansion ──────────────────────────────────────────────────────────

/// Expand one scheduled `uses` statement: copy the grouping body into the
/// use site, re-expanding nested uses, then apply refines and use-site
/// augments to the copy.
pub fn expand_uses(
    build: &mut BuildCtx,
    uses: CtxId,
    spawned: &mut Vec<InferenceAction>,
) -> Result<(), BuildError> {
    if build.node(uses).deleted {
        return Ok(()); // the subtree holding this uses was deviated away
    }
    let parent = build
        .node(uses)
        .parent
        .expect("uses statements always have an enclosing statement");
    let module = build.module_name_of(uses).to_owned();
    let before = build.node(parent).children.len();

    let mut stack = Vec::new();
    expand_at(build, uses, parent, &module, &mut stack, spawned)?;

    // keep child order: move the fresh copies to the uses position
    let pos = build
        .node(parent)
        .children
        .iter()
        .position(|&c| c == uses)
        .expect("uses is a child of its parent");
    let tail = build.node_mut(parent).children.split_off(before);
    let node = build.node_mut(parent);
    for (offset, id) in tail.into_iter().enumerate() {
        node.children.insert(pos + 1 + offset, id);
    }
    build.remove_subtree(uses);
    Ok(())
}

/// Expand the grouping referenced by `src_uses` into `target_parent`.
/// `src_uses` may be the scheduled statement itself or a uses found inside
/// a body being copied; resolution always runs in the source's scope.
fn expand_at(
    build: &mut BuildCtx,
    src_uses: CtxId,
    target_parent: CtxId,
    module: &str,
    stack: &mut Vec<QName>,
    spawned: &mut Vec<InferenceAction>,
) -> Result<(), BuildError> {
    let src = build.source(src_uses).clone();
    let qname = build
        .node(src_uses)
        .value
        .as_ref()
        .and_then(|v| v.as_ref_name())
        .cloned()
        .ok_or_else(|| {
            BuildError::source("uses statement has no resolved reference", src.clone())
        })?;

    let grouping = build
        .lookup(src_uses, NamespaceKind::Grouping, &NsKey::Qualified(qname.clone()))
        .and_then(|v| v.as_ctx())
        .ok_or_else(|| {
            BuildError::reference(format!("grouping '{qname}' not found"), src.clone())
        })?;

    if stack.contains(&qname) {
        let chain = stack
            .iter()
            .map(QName::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");
        return Err(BuildError::constraint(
            format!("cyclic grouping reference: {chain} -> {qname}"),
            src,
        ));
    }
    stack.push(qname);
    debug!(grouping = %stack.last().expect("just pushed"), "expanding grouping");

    for child in build.live_children(grouping) {
        let keyword = build.keyword(child).to_owned();
        if NOT_COPIED.contains(&keyword.as_str()) {
            continue;
        }
        if keyword == "uses" {
            expand_at(build, child, target_parent, module, stack, spawned)?;
        } else {
            copy_tree(build, child, target_parent, module, stack, spawned)?;
        }
    }
    stack.pop();

    // refine overrides and use-site augments apply to this copy only
    for sub in build.live_children(src_uses) {
        match build.keyword(sub) {
            "refine" => apply_refine(build, sub, target_parent, module, spawned)?,
            "augment" => apply_uses_augment(build, sub, target_parent, spawned)?,
            _ => {}
        }
    }
    Ok(())
}

/// Apply a use-site augment: resolve its relative target path inside the
/// fresh copy, then splice the augment's content into that node. A target
/// absent from the copy is fatal.
fn apply_uses_augment(
    build: &mut BuildCtx,
    augment: CtxId,
    base: CtxId,
    spawned: &mut Vec<InferenceAction>,
) -> Result<(), BuildError> {
    let src = build.source(augment).clone();
    let path = build
        .node(augment)
        .value
        .as_ref()
        .and_then(|v| v.as_path())
        .cloned()
        .ok_or_else(|| BuildError::source("augment requires a target path", src.clone()))?;
    let target = build.find_schema_node(base, &path).ok_or_else(|| {
        BuildError::reference(
            format!("augment target '{path}' not found in expanded grouping"),
            src,
        )
    })?;
    splice_augment(build, augment, target, spawned)
}

/// Deep-copy a context subtree under a new parent. Nested uses re-expand
/// in place instead of being copied. Every copy registers its inference
/// actions here, exactly once.
pub fn copy_tree(
    build: &mut BuildCtx,
    src: CtxId,
    parent: CtxId,
    module: &str,
    stack: &mut Vec<QName>,
    spawned: &mut Vec<InferenceAction>,
) -> Result<CtxId, BuildError> {
    let id = build.copy_node(src, parent, module);
    register_copy(build, id, spawned);
    for child in build.live_children(src) {
        if build.keyword(child) == "uses" {
            expand_at(build, child, id, module, stack, spawned)?;
        } else {
            copy_tree(build, child, id, module, stack, spawned)?;
        }
    }
    Ok(id)
}

// ── Refine ──────────────────────────────────────────────────────────────────

/// Apply one refine: resolve its relative path inside the fresh copy and
/// replace only the targeted properties. A target absent from the copy is
/// fatal.
fn apply_refine(
    build: &mut BuildCtx,
    refine: CtxId,
    base: CtxId,
    module: &str,
    spawned: &mut Vec<InferenceAction>,
) -> Result<(), BuildError> {
    let src = build.source(refine).clone();
    let path = build
        .node(refine)
        .value
        .as_ref()
        .and_then(|v| v.as_path())
        .cloned()
        .ok_or_else(|| BuildError::source("refine requires a target path", src.clone()))?;

    let target = build.find_schema_node(base, &path).ok_or_else(|| {
        BuildError::reference(
            format!("refine target '{path}' not found in expanded grouping"),
            src.clone(),
        )
    })?;

    for prop in build.live_children(refine) {
        let keyword = build.keyword(prop).to_owned();
        if !REFINABLE.contains(&keyword.as_str()) {
            return Err(BuildError::source(
                format!("'{keyword}' cannot be refined"),
                build.source(prop).clone(),
            ));
        }
        if let Some(existing) = build.find_child(target, &keyword) {
            build.remove_subtree(existing);
        }
        let mut stack = Vec::new();
        copy_tree(build, prop, target, module, &mut stack, spawned)?;
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
