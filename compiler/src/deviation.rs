// deviation.rs — Deviation appliers
//
// Applies a module's targeted overrides to another definition: either
// "not-supported" (remove the whole target subtree, cascading everything
// spliced into it) or atomic add/replace/delete property edits.
// "not-supported" is mutually exclusive with any other deviate on the same
// target. Scheduled in the EffectiveModel phase so the target's shape is
// final when the edit lands.
//
// Preconditions: the target path resolved (reactor prerequisite); deviate
//   arguments parsed during StatementDefinition (an unrecognized literal
//   already failed there).
// Postconditions: applied deviations are recorded per module for the
//   effective model.
// Failure modes: ConstraintViolation (conflicting dispositions, property
//   edit precondition not met), Source (deviation without deviates).
// Side effects: subtree removal, property replacement, record keeping,
//   spawned inference actions for spliced property subtrees.

use serde::Serialize;
use tracing::debug;

use crate::context::{BuildCtx, CtxId};
use crate::decl::{DeviateKind, SourceRef, Value};
use crate::error::BuildError;
use crate::grouping::copy_tree;
use crate::reactor::InferenceAction;

/// One applied deviation, recorded on the deviating module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviationRecord {
    pub module: String,
    pub target: String,
    pub dispositions: Vec<DeviateKind>,
    pub source: SourceRef,
}

/// Apply one scheduled deviation to its resolved target. Actions for
/// spliced property subtrees go through `spawned` so they resolve in the
/// current sweep.
pub fn apply_deviation(
    build: &mut BuildCtx,
    deviation: CtxId,
    spawned: &mut Vec<InferenceAction>,
) -> Result<(), BuildError> {
    if build.node(deviation).deleted {
        return Ok(());
    }
    let src = build.source(deviation).clone();
    let path = build
        .node(deviation)
        .value
        .as_ref()
        .and_then(|v| v.as_path())
        .cloned()
        .ok_or_else(|| BuildError::source("deviation requires a target path", src.clone()))?;
    let base = build.root_of(deviation);
    let target = build.find_schema_node(base, &path).ok_or_else(|| {
        BuildError::reference(format!("deviation target '{path}' not found"), src.clone())
    })?;

    let deviates: Vec<(CtxId, DeviateKind)> = build
        .live_children(deviation)
        .into_iter()
        .filter(|&c| build.keyword(c) == "deviate")
        .filter_map(|c| match build.node(c).value {
            Some(Value::Deviate(kind)) => Some((c, kind)),
            _ => None,
        })
        .collect();
    if deviates.is_empty() {
        return Err(BuildError::source(
            "deviation requires at least one deviate statement",
            src,
        ));
    }

    let has_not_supported = deviates
        .iter()
        .any(|&(_, k)| k == DeviateKind::NotSupported);
    if has_not_supported && deviates.len() > 1 {
        return Err(BuildError::constraint(
            format!("deviation '{path}' combines not-supported with other deviates"),
            src,
        ));
    }

    if has_not_supported {
        // cascades over everything placed into the target: augmentations,
        // expanded groupings, the lot
        build.remove_subtree(target);
    } else {
        for &(deviate, kind) in &deviates {
            apply_property_edits(build, deviate, kind, target, spawned)?;
        }
    }

    let record = DeviationRecord {
        module: build.module_name_of(deviation).to_owned(),
        target: path.to_string(),
        dispositions: deviates.iter().map(|&(_, k)| k).collect(),
        source: build.source(deviation).clone(),
    };
    debug!(target = %record.target, "applied deviation");
    build.applied_deviations.push(record);
    Ok(())
}

/// Apply one deviate's property edits. Each edit is atomic: it fails if
/// the property's current presence/value does not match the edit's
/// expectation, leaving the error to abort the whole build.
fn apply_property_edits(
    build: &mut BuildCtx,
    deviate: CtxId,
    kind: DeviateKind,
    target: CtxId,
    spawned: &mut Vec<InferenceAction>,
) -> Result<(), BuildError> {
    let module = build.module_name_of(deviate).to_owned();
    for prop in build.live_children(deviate) {
        let keyword = build.keyword(prop).to_owned();
        let prop_src = build.source(prop).clone();
        let existing = build.find_child(target, &keyword);
        match kind {
            DeviateKind::Add => {
                if existing.is_some() {
                    return Err(BuildError::constraint(
                        format!("cannot add '{keyword}': property already present on target"),
                        prop_src,
                    ));
                }
                splice_property(build, prop, target, &module, spawned)?;
            }
            DeviateKind::Replace => {
                let Some(old) = existing else {
                    return Err(BuildError::constraint(
                        format!("cannot replace '{keyword}': property not present on target"),
                        prop_src,
                    ));
                };
                build.remove_subtree(old);
                splice_property(build, prop, target, &module, spawned)?;
            }
            DeviateKind::Delete => {
                let matches = existing
                    .filter(|&old| build.argument(old) == build.argument(prop));
                let Some(old) = matches else {
                    return Err(BuildError::constraint(
                        format!(
                            "cannot delete '{keyword}': property value does not match target"
                        ),
                        prop_src,
                    ));
                };
                build.remove_subtree(old);
            }
            DeviateKind::NotSupported => unreachable!("filtered out by the caller"),
        }
    }
    Ok(())
}

fn splice_property(
    build: &mut BuildCtx,
    prop: CtxId,
    target: CtxId,
    module: &str,
    spawned: &mut Vec<InferenceAction>,
) -> Result<(), BuildError> {
    let mut stack = Vec::new();
    copy_tree(build, prop, target, module, &mut stack, spawned)?;
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
