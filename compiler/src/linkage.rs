// linkage.rs — Source linkage and statement definition appliers
//
// SourceLinkage phase: publish each source root's identity and resolve
// every import/include into prefix → module bindings. StatementDefinition
// phase: parse each statement's raw argument into its cached value and
// publish named definitions (groupings, typedefs, identities, features,
// extensions) into their namespaces.
//
// Preconditions: context forest built; actions scheduled by the reactor.
// Postconditions: prefix bindings complete before any later phase attempts
//   a prefixed lookup; definition namespaces populated write-once.
// Failure modes: Linkage (unresolved import/include, unknown revision,
//   unbound prefix), Source (malformed arguments), ConstraintViolation
//   (duplicate definitions).
// Side effects: namespace writes, context value caches.

use tracing::debug;

use crate::context::{BuildCtx, CtxId};
use crate::decl::{DeviateKind, PathSeg, QName, RawRef, ResolvedPath, SchemaPath, Value};
use crate::error::BuildError;
use crate::namespace::{NamespaceKind, NsKey, NsValue};
use crate::registry::ArgumentKind;

// ── SourceLinkage actions ───────────────────────────────────────────────────

/// Publish a source root (module or submodule) into the module namespace
/// and bind its own prefix.
pub fn register_source(build: &mut BuildCtx, root: CtxId) -> Result<(), BuildError> {
    let src = build.source(root).clone();
    let name = build
        .argument(root)
        .ok_or_else(|| BuildError::source("source root requires a name", src.clone()))?
        .to_owned();

    build
        .global
        .put(NamespaceKind::Module, NsKey::Name(name.clone()), NsValue::Ctx(root), &src)?;

    // a module binds its own prefix; a submodule binds the prefix declared
    // under belongs-to, pointing at its owning module
    let own_module = build.module_name_of(root).to_owned();
    let prefix = match build.keyword(root) {
        "module" => build
            .find_child(root, "prefix")
            .and_then(|p| build.argument(p).map(str::to_owned)),
        _ => build.find_child(root, "belongs-to").and_then(|bt| {
            build
                .find_child(bt, "prefix")
                .and_then(|p| build.argument(p).map(str::to_owned))
        }),
    };
    if let Some(prefix) = prefix {
        build.global.put(
            NamespaceKind::Prefix,
            NsKey::ModulePrefix {
                module: root,
                prefix,
            },
            NsValue::ModuleName(own_module),
            &src,
        )?;
    }
    debug!(source = %name, "registered source");
    Ok(())
}

/// Bind an import's prefix to the imported module. The reactor only fires
/// this once the imported source is present; revision checking happens
/// here.
pub fn link_import(build: &mut BuildCtx, import: CtxId) -> Result<(), BuildError> {
    let src = build.source(import).clone();
    let imported = build
        .argument(import)
        .ok_or_else(|| BuildError::source("import requires a module name", src.clone()))?
        .to_owned();

    if let Some(want) = build
        .find_child(import, "revision-date")
        .and_then(|r| build.argument(r).map(str::to_owned))
    {
        let target = build
            .global
            .get(NamespaceKind::Module, &NsKey::Name(imported.clone()))
            .and_then(NsValue::as_ctx)
            .expect("prerequisite guarantees the imported module is present");
        let have = build
            .find_child(target, "revision")
            .and_then(|r| build.argument(r).map(str::to_owned));
        if have.as_deref() != Some(want.as_str()) {
            return Err(BuildError::linkage(
                format!("unknown revision '{want}' of module '{imported}'"),
                src,
            ));
        }
    }

    let prefix = build
        .find_child(import, "prefix")
        .and_then(|p| build.argument(p).map(str::to_owned))
        .ok_or_else(|| BuildError::source("import requires a prefix statement", src.clone()))?;

    let root = build.root_of(import);
    build.global.put(
        NamespaceKind::Prefix,
        NsKey::ModulePrefix {
            module: root,
            prefix,
        },
        NsValue::ModuleName(imported),
        &src,
    )
}

/// Verify an include: the included source must be a submodule belonging to
/// the including module.
pub fn link_include(build: &mut BuildCtx, include: CtxId) -> Result<(), BuildError> {
    let src = build.source(include).clone();
    let name = build
        .argument(include)
        .ok_or_else(|| BuildError::source("include requires a submodule name", src.clone()))?
        .to_owned();
    let sub = build
        .global
        .get(NamespaceKind::Module, &NsKey::Name(name.clone()))
        .and_then(NsValue::as_ctx)
        .expect("prerequisite guarantees the included source is present");

    if build.keyword(sub) != "submodule" {
        return Err(BuildError::linkage(
            format!("included source '{name}' is not a submodule"),
            src,
        ));
    }
    let owner = build.module_name_of(include);
    if build.module_name_of(sub) != owner {
        return Err(BuildError::linkage(
            format!(
                "submodule '{name}' belongs to '{}', not '{owner}'",
                build.module_name_of(sub)
            ),
            src,
        ));
    }
    Ok(())
}

// ── StatementDefinition actions ─────────────────────────────────────────────

/// Parse one statement's raw argument into its cached value and publish
/// any definition it makes. Unrecognized extension statements stay opaque.
pub fn define_statement(build: &mut BuildCtx, ctx: CtxId) -> Result<(), BuildError> {
    if build.node(ctx).deleted {
        return Ok(());
    }
    let Some(def) = build.registry.lookup(build.keyword(ctx)) else {
        return Ok(()); // tolerated extension statement, passed through opaquely
    };
    let kind = def.argument;
    let src = build.source(ctx).clone();
    let keyword = build.keyword(ctx).to_owned();

    let raw = match build.argument(ctx) {
        Some(raw) => raw.to_owned(),
        None => {
            return Err(BuildError::source(
                format!("'{keyword}' requires an argument"),
                src,
            ))
        }
    };

    let value = match kind {
        ArgumentKind::Identifier => Value::Ident(raw),
        ArgumentKind::Text => Value::Str(raw),
        ArgumentKind::Reference => {
            let r = RawRef::parse(&raw, &src)?;
            Value::Ref(resolve_ref(build, ctx, &r, &src)?)
        }
        ArgumentKind::SchemaPath => {
            let p = SchemaPath::parse(&raw, &src)?;
            Value::Path(resolve_path(build, ctx, &p, &src)?)
        }
        ArgumentKind::Integer => Value::Int(raw.parse::<i64>().map_err(|_| {
            BuildError::source(format!("invalid integer argument '{raw}'"), src.clone())
        })?),
        ArgumentKind::Boolean => match raw.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            other => {
                return Err(BuildError::source(
                    format!("invalid boolean argument '{other}'"),
                    src,
                ))
            }
        },
        ArgumentKind::Deviate => Value::Deviate(DeviateKind::parse(&raw, &src)?),
    };
    build.node_mut(ctx).value = Some(value);

    publish_definition(build, ctx, &keyword, &src)
}

fn resolve_ref(
    build: &BuildCtx,
    at: CtxId,
    r: &RawRef,
    src: &crate::decl::SourceRef,
) -> Result<QName, BuildError> {
    let module = match &r.prefix {
        Some(prefix) => build.resolve_prefix(at, prefix).ok_or_else(|| {
            BuildError::linkage(
                format!("prefix '{prefix}' is not bound to any module"),
                src.clone(),
            )
        })?,
        None => build.module_name_of(at).to_owned(),
    };
    Ok(QName::new(module, r.name.clone()))
}

fn resolve_path(
    build: &BuildCtx,
    at: CtxId,
    path: &SchemaPath,
    src: &crate::decl::SourceRef,
) -> Result<ResolvedPath, BuildError> {
    let mut segments = Vec::with_capacity(path.segments.len());
    for seg in &path.segments {
        let module = match &seg.prefix {
            Some(prefix) => Some(build.resolve_prefix(at, prefix).ok_or_else(|| {
                BuildError::linkage(
                    format!("prefix '{prefix}' is not bound to any module"),
                    src.clone(),
                )
            })?),
            None => None,
        };
        segments.push(PathSeg {
            module,
            name: seg.name.clone(),
        });
    }
    Ok(ResolvedPath {
        absolute: path.absolute,
        segments,
    })
}

fn publish_definition(
    build: &mut BuildCtx,
    ctx: CtxId,
    keyword: &str,
    src: &crate::decl::SourceRef,
) -> Result<(), BuildError> {
    let name = match build.argument(ctx) {
        Some(n) => n.to_owned(),
        None => return Ok(()),
    };
    let qname = QName::new(build.module_name_of(ctx).to_owned(), name);
    let key = NsKey::Qualified(qname);

    match keyword {
        "grouping" | "typedef" => {
            let ns = if keyword == "grouping" {
                NamespaceKind::Grouping
            } else {
                NamespaceKind::Typedef
            };
            let parent = build
                .node(ctx)
                .parent
                .expect("definitions always have an enclosing statement");
            build.local_publish(parent, ns, key.clone(), NsValue::Ctx(ctx))?;
            // top-level definitions are additionally visible build-wide
            if build.node(parent).parent.is_none() {
                build.global.put(ns, key, NsValue::Ctx(ctx), src)?;
            }
            Ok(())
        }
        "identity" => build
            .global
            .put(NamespaceKind::Identity, key, NsValue::Ctx(ctx), src),
        "feature" => build
            .global
            .put(NamespaceKind::Feature, key, NsValue::Ctx(ctx), src),
        "extension" => build
            .global
            .put(NamespaceKind::Extension, key, NsValue::Ctx(ctx), src),
        _ => Ok(()),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
