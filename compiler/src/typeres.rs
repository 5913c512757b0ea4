// typeres.rs — Type derivation and identity linking
//
// Resolves every `type` statement to an effective TypeSpec: built-in names
// map to the registry singletons, typedef references resolve through their
// chain on demand with memoization. Restrictions may only narrow what the
// base allows; widening is fatal. Identity `base` links are recorded here
// and the finished graph is checked for cycles after FullDeclaration.
//
// Preconditions: StatementDefinition parsed type arguments; typedef
//   references resolvable (reactor prerequisite).
// Postconditions: build.type_specs holds one Arc per resolved type
//   statement; unrestricted built-in usages share the registry singleton.
// Failure modes: Reference (unknown typedef/identity), ConstraintViolation
//   (cyclic typedef chain, widening restriction, cyclic identity graph),
//   Source (malformed range/length text).
// Side effects: memoization tables on the build context.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use crate::context::{BuildCtx, CtxId};
use crate::error::BuildError;
use crate::namespace::{NamespaceKind, NsKey};
use crate::registry::TypeSpec;

// ── Range sets ──────────────────────────────────────────────────────────────

/// A set of disjoint closed integer intervals, ascending. Used for both
/// numeric ranges and string/binary length bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeSet {
    intervals: Vec<(i128, i128)>,
}

impl RangeSet {
    /// A single closed interval.
    pub fn single(min: i128, max: i128) -> Self {
        Self {
            intervals: vec![(min, max)],
        }
    }

    pub fn min(&self) -> i128 {
        self.intervals[0].0
    }

    pub fn max(&self) -> i128 {
        self.intervals[self.intervals.len() - 1].1
    }

    pub fn intervals(&self) -> &[(i128, i128)] {
        &self.intervals
    }

    /// Parse restriction text like `"1..10 | 20..30"` or `"min..0 | 42"`.
    /// `min`/`max` resolve against the parent's effective bounds.
    pub fn parse(text: &str, parent: Option<&RangeSet>) -> Result<Self, String> {
        let mut intervals = Vec::new();
        for part in text.split('|') {
            let part = part.trim();
            if part.is_empty() {
                return Err(format!("empty range part in '{text}'"));
            }
            let (lo, hi) = match part.split_once("..") {
                Some((lo, hi)) => (
                    parse_bound(lo.trim(), parent)?,
                    parse_bound(hi.trim(), parent)?,
                ),
                None => {
                    let v = parse_bound(part, parent)?;
                    (v, v)
                }
            };
            if lo > hi {
                return Err(format!("inverted interval '{part}'"));
            }
            if let Some(&(_, prev_hi)) = intervals.last() {
                if lo <= prev_hi {
                    return Err(format!("overlapping or unordered interval '{part}'"));
                }
            }
            intervals.push((lo, hi));
        }
        Ok(Self { intervals })
    }

    /// Whether every value of `self` is allowed by `other`.
    pub fn is_subset_of(&self, other: &RangeSet) -> bool {
        self.intervals.iter().all(|&(lo, hi)| {
            other
                .intervals
                .iter()
                .any(|&(plo, phi)| plo <= lo && hi <= phi)
        })
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (lo, hi)) in self.intervals.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            if lo == hi {
                write!(f, "{lo}")?;
            } else {
                write!(f, "{lo}..{hi}")?;
            }
        }
        Ok(())
    }
}

fn parse_bound(text: &str, parent: Option<&RangeSet>) -> Result<i128, String> {
    match text {
        "min" => parent
            .map(RangeSet::min)
            .ok_or_else(|| "'min' has no base bound to resolve against".to_owned()),
        "max" => parent
            .map(RangeSet::max)
            .ok_or_else(|| "'max' has no base bound to resolve against".to_owned()),
        _ => text
            .parse::<i128>()
            .map_err(|_| format!("invalid bound '{text}'")),
    }
}

// ── Type derivation ─────────────────────────────────────────────────────────

/// Resolve one scheduled `type` statement and memoize the result.
pub fn derive_type_action(build: &mut BuildCtx, ty: CtxId) -> Result<(), BuildError> {
    if build.node(ty).deleted || build.type_specs.contains_key(&ty) {
        return Ok(());
    }
    let mut stack = Vec::new();
    resolve_type(build, ty, &mut stack)?;
    Ok(())
}

/// Resolve a `type` statement to its effective spec, following typedef
/// chains on demand. `stack` carries the typedef contexts currently being
/// resolved, for cycle detection.
fn resolve_type(
    build: &mut BuildCtx,
    ty: CtxId,
    stack: &mut Vec<CtxId>,
) -> Result<Arc<TypeSpec>, BuildError> {
    if let Some(spec) = build.type_specs.get(&ty) {
        return Ok(spec.clone());
    }
    let src = build.source(ty).clone();
    let raw = build
        .argument(ty)
        .ok_or_else(|| BuildError::source("type requires a name argument", src.clone()))?
        .to_owned();

    let builtin = if raw.contains(':') {
        None
    } else {
        build.registry.builtin_type(&raw)
    };
    let base = if let Some(builtin) = builtin {
        builtin
    } else {
        let qname = build
            .node(ty)
            .value
            .as_ref()
            .and_then(|v| v.as_ref_name())
            .cloned()
            .ok_or_else(|| {
                BuildError::reference(format!("type '{raw}' is not a known type"), src.clone())
            })?;
        let typedef = build
            .lookup(ty, NamespaceKind::Typedef, &NsKey::Qualified(qname.clone()))
            .and_then(|v| v.as_ctx())
            .ok_or_else(|| {
                BuildError::reference(format!("typedef '{qname}' not found"), src.clone())
            })?;
        resolve_typedef(build, typedef, stack)?
    };

    let spec = restrict(build, ty, &raw, base)?;
    build.type_specs.insert(ty, spec.clone());
    trace!(name = %raw, "derived type");
    Ok(spec)
}

/// Resolve a typedef definition to its effective spec, carrying the
/// typedef's own name. Memoized under the typedef's context.
fn resolve_typedef(
    build: &mut BuildCtx,
    typedef: CtxId,
    stack: &mut Vec<CtxId>,
) -> Result<Arc<TypeSpec>, BuildError> {
    if let Some(spec) = build.type_specs.get(&typedef) {
        return Ok(spec.clone());
    }
    let src = build.source(typedef).clone();
    if stack.contains(&typedef) {
        let chain = stack
            .iter()
            .chain(std::iter::once(&typedef))
            .map(|&t| build.argument(t).unwrap_or("?").to_owned())
            .collect::<Vec<_>>()
            .join(" -> ");
        return Err(BuildError::constraint(
            format!("cyclic typedef chain: {chain}"),
            src,
        ));
    }
    let inner = build
        .find_child(typedef, "type")
        .ok_or_else(|| BuildError::source("typedef requires a type statement", src.clone()))?;
    stack.push(typedef);
    let inner_spec = resolve_type(build, inner, stack);
    stack.pop();
    let inner_spec = inner_spec?;

    let name = build
        .argument(typedef)
        .ok_or_else(|| BuildError::source("typedef requires a name", src))?;
    let spec = if inner_spec.name == name {
        inner_spec
    } else {
        Arc::new(TypeSpec {
            name: name.to_owned(),
            base: Some(inner_spec),
            range: None,
            length: None,
            patterns: Vec::new(),
        })
    };
    build.type_specs.insert(typedef, spec.clone());
    Ok(spec)
}

/// Apply a type statement's own restrictions on top of `base`. Without
/// restrictions the base spec is shared as-is, so unrestricted built-in
/// usages everywhere point at the one registry singleton.
fn restrict(
    build: &mut BuildCtx,
    ty: CtxId,
    name: &str,
    base: Arc<TypeSpec>,
) -> Result<Arc<TypeSpec>, BuildError> {
    let range_stmt = build.find_child(ty, "range");
    let length_stmt = build.find_child(ty, "length");
    let patterns: Vec<String> = build
        .live_children(ty)
        .into_iter()
        .filter(|&c| build.keyword(c) == "pattern")
        .filter_map(|c| build.argument(c).map(str::to_owned))
        .collect();
    if range_stmt.is_none() && length_stmt.is_none() && patterns.is_empty() {
        return Ok(base);
    }

    let range = match range_stmt {
        Some(stmt) => Some(parse_narrowing(
            build,
            stmt,
            base.effective_range(),
            "range",
            name,
        )?),
        None => None,
    };
    let length = match length_stmt {
        Some(stmt) => Some(parse_narrowing(
            build,
            stmt,
            base.effective_length(),
            "length",
            name,
        )?),
        None => None,
    };

    Ok(Arc::new(TypeSpec {
        name: name.to_owned(),
        base: Some(base),
        range,
        length,
        patterns,
    }))
}

fn parse_narrowing(
    build: &BuildCtx,
    stmt: CtxId,
    base_bounds: Option<&RangeSet>,
    what: &str,
    type_name: &str,
) -> Result<RangeSet, BuildError> {
    let src = build.source(stmt).clone();
    let text = build
        .argument(stmt)
        .ok_or_else(|| BuildError::source(format!("{what} requires an argument"), src.clone()))?;
    let Some(base_bounds) = base_bounds else {
        return Err(BuildError::constraint(
            format!("type '{type_name}' does not support {what} restriction"),
            src,
        ));
    };
    let set = RangeSet::parse(text, Some(base_bounds))
        .map_err(|e| BuildError::source(format!("invalid {what} '{text}': {e}"), src.clone()))?;
    if !set.is_subset_of(base_bounds) {
        return Err(BuildError::constraint(
            format!("{what} '{set}' widens the base type's bounds {base_bounds}"),
            src,
        ));
    }
    Ok(set)
}

// ── Identity linking ────────────────────────────────────────────────────────

/// Record one identity's resolved base link.
pub fn link_identity_base(
    build: &mut BuildCtx,
    identity: CtxId,
    base_ref: CtxId,
) -> Result<(), BuildError> {
    if build.node(identity).deleted {
        return Ok(());
    }
    let src = build.source(base_ref).clone();
    let qname = build
        .node(base_ref)
        .value
        .as_ref()
        .and_then(|v| v.as_ref_name())
        .cloned()
        .ok_or_else(|| BuildError::source("base requires an identity reference", src.clone()))?;
    let target = build
        .lookup(base_ref, NamespaceKind::Identity, &NsKey::Qualified(qname.clone()))
        .and_then(|v| v.as_ctx())
        .ok_or_else(|| BuildError::reference(format!("identity '{qname}' not found"), src))?;
    build.identity_bases.insert(identity, target);
    Ok(())
}

/// Walk every recorded base link and reject cycles, reporting the full
/// derivation path. Runs once after the FullDeclaration phase closes.
pub fn check_identity_cycles(build: &BuildCtx) -> Result<(), BuildError> {
    for start in build.identity_bases.keys().copied() {
        let mut path = vec![start];
        let mut cur = start;
        while let Some(&next) = build.identity_bases.get(&cur) {
            if path.contains(&next) {
                path.push(next);
                let chain = path
                    .iter()
                    .map(|&i| build.argument(i).unwrap_or("?").to_owned())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(BuildError::constraint(
                    format!("cyclic identity derivation: {chain}"),
                    build.source(start).clone(),
                ));
            }
            path.push(next);
            cur = next;
        }
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
