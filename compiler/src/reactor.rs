// reactor.rs — Inference actions and the phase fixpoint scheduler
//
// Resolution order is not known in advance: statements reference
// definitions appearing later, in other sources, or behind chains of
// reuse. Each unit of resolution work is an inference action gated on
// namespace prerequisites; the scheduler sweeps all unfired actions to a
// fixpoint per phase. Actions fire exactly once; contexts spawned
// mid-phase contribute their actions to the same phase's sweep; actions
// still blocked at fixpoint fail the whole build.
//
// Preconditions: the context forest is built and actions registered.
// Postconditions: on success every registered action for the phase fired.
// Failure modes: PhaseDeadline (blocked actions), plus any applier error,
//   wrapped with the phase scheduling context.
// Side effects: mutates the build context through appliers.

use tracing::{debug, trace};

use crate::context::{BuildCtx, CtxId};
use crate::decl::QName;
use crate::error::BuildError;
use crate::namespace::{NamespaceKind, NsKey};
use crate::phase::Phase;
use crate::{augment, deviation, grouping, linkage, typeres};

// ── Prerequisites ───────────────────────────────────────────────────────────

/// A gating condition for one inference action. Prerequisites are monotone
/// within a phase: once resolvable, they stay resolvable, which is what
/// makes sweep order irrelevant to the final output.
#[derive(Debug, Clone)]
pub enum Prereq {
    /// A source (module or submodule) with the given name is registered.
    ModulePresent { name: String },
    /// The parsed reference argument of `at` resolves in the given
    /// namespace, local scope chain first, then global.
    RefResolves { at: CtxId, kind: NamespaceKind },
    /// The parsed schema path of `at` resolves to a live node (retried
    /// each sweep until the target's shape stabilizes).
    TargetResolves { at: CtxId, base: CtxId },
}

impl Prereq {
    fn met(&self, build: &BuildCtx) -> bool {
        match self {
            Prereq::ModulePresent { name } => build
                .global
                .contains(NamespaceKind::Module, &NsKey::Name(name.clone())),
            Prereq::RefResolves { at, kind } => match referenced_qname(build, *at) {
                Some(q) => build.lookup(*at, *kind, &NsKey::Qualified(q)).is_some(),
                None => false,
            },
            Prereq::TargetResolves { at, base } => {
                if build.handled_augments.contains(at) {
                    return true;
                }
                match build.node(*at).value.as_ref().and_then(|v| v.as_path()) {
                    Some(path) => build.find_schema_node(*base, path).is_some(),
                    None => false,
                }
            }
        }
    }

    fn describe(&self, build: &BuildCtx) -> String {
        match self {
            Prereq::ModulePresent { name } => format!("module '{name}' is not available"),
            Prereq::RefResolves { at, kind } => {
                let what = referenced_qname(build, *at)
                    .map(|q| q.to_string())
                    .unwrap_or_else(|| {
                        build.argument(*at).unwrap_or("<missing argument>").to_owned()
                    });
                format!("unresolved {kind} reference '{what}'")
            }
            Prereq::TargetResolves { at, .. } => {
                let what = build
                    .node(*at)
                    .value
                    .as_ref()
                    .and_then(|v| v.as_path())
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| {
                        build.argument(*at).unwrap_or("<missing argument>").to_owned()
                    });
                format!("unresolved target path '{what}'")
            }
        }
    }
}

fn referenced_qname(build: &BuildCtx, at: CtxId) -> Option<QName> {
    build
        .node(at)
        .value
        .as_ref()
        .and_then(|v| v.as_ref_name())
        .cloned()
}

// ── Actions ─────────────────────────────────────────────────────────────────

/// The resolution work an action performs when it fires.
#[derive(Debug, Clone)]
pub enum ActionKind {
    /// Publish a source root's identity and prefix bindings.
    RegisterSource { root: CtxId },
    /// Bind an import's prefix once the imported module is present.
    LinkImport { import: CtxId },
    /// Verify an include against the submodule's belongs-to.
    LinkInclude { include: CtxId },
    /// Parse the statement argument and publish any definition it makes.
    Define { ctx: CtxId },
    /// Expand a grouping body into a use site.
    ExpandUses { uses: CtxId },
    /// Splice an augmentation's children into its target.
    ApplyAugment { augment: CtxId },
    /// Apply one deviation's dispositions to its target.
    ApplyDeviation { deviation: CtxId },
    /// Resolve a type statement to its effective type spec.
    DeriveType { ty: CtxId },
    /// Record an identity's resolved base link.
    LinkIdentityBase { identity: CtxId, base_ref: CtxId },
    /// Confirm an if-feature reference resolves (gating only).
    CheckFeatureRef,
}

/// A discrete unit of resolution work: prerequisites plus the mutation to
/// perform. Fires exactly once.
#[derive(Debug)]
pub struct InferenceAction {
    pub phase: Phase,
    pub prereqs: Vec<Prereq>,
    pub kind: ActionKind,
    fired: bool,
}

impl InferenceAction {
    pub fn new(phase: Phase, kind: ActionKind, prereqs: Vec<Prereq>) -> Self {
        Self {
            phase,
            prereqs,
            kind,
            fired: false,
        }
    }
}

// ── Action registration ─────────────────────────────────────────────────────

/// Register the inference actions for a context subtree. `from_phase`
/// filters out work for phases a freshly spawned subtree has already
/// passed (expansion copies carry their source's parsed values).
pub fn register_subtree(
    build: &BuildCtx,
    id: CtxId,
    from_phase: Phase,
    out: &mut Vec<InferenceAction>,
) {
    register_actions(build, id, from_phase, out);
    for child in build.node(id).children.clone() {
        register_subtree(build, child, from_phase, out);
    }
}

/// Register the actions for one freshly created expansion copy. Called by
/// `copy_tree` once per node it creates, so copies are registered exactly
/// once no matter how deeply expansions nest. Copies carry their source's
/// parsed values, so definition work is skipped.
pub fn register_copy(build: &BuildCtx, id: CtxId, out: &mut Vec<InferenceAction>) {
    register_actions(build, id, Phase::FullDeclaration, out);
}

fn register_actions(
    build: &BuildCtx,
    id: CtxId,
    from_phase: Phase,
    out: &mut Vec<InferenceAction>,
) {
    let mut add = |action: InferenceAction| {
        if action.phase >= from_phase {
            out.push(action);
        }
    };

    let node = build.node(id);
    let keyword = node.keyword();
    let is_root = node.parent.is_none();
    let in_grouping = inside_grouping(build, id);

    if is_root {
        add(InferenceAction::new(
            Phase::SourceLinkage,
            ActionKind::RegisterSource { root: id },
            Vec::new(),
        ));
    }

    match keyword {
        "import" => {
            if let Some(name) = node.argument() {
                add(InferenceAction::new(
                    Phase::SourceLinkage,
                    ActionKind::LinkImport { import: id },
                    vec![Prereq::ModulePresent {
                        name: name.to_owned(),
                    }],
                ));
            }
        }
        "include" => {
            if let Some(name) = node.argument() {
                add(InferenceAction::new(
                    Phase::SourceLinkage,
                    ActionKind::LinkInclude { include: id },
                    vec![Prereq::ModulePresent {
                        name: name.to_owned(),
                    }],
                ));
            }
        }
        // uses inside a grouping body expands at copy time, not here
        "uses" if !in_grouping => {
            add(InferenceAction::new(
                Phase::FullDeclaration,
                ActionKind::ExpandUses { uses: id },
                vec![Prereq::RefResolves {
                    at: id,
                    kind: NamespaceKind::Grouping,
                }],
            ));
        }
        "augment" if !in_grouping && parent_is_root(build, id) => {
            add(InferenceAction::new(
                Phase::FullDeclaration,
                ActionKind::ApplyAugment { augment: id },
                vec![Prereq::TargetResolves {
                    at: id,
                    base: build.root_of(id),
                }],
            ));
        }
        "deviation" => {
            let module = build.module_name_of(id);
            let applies = build
                .deviation_modules
                .as_ref()
                .map_or(true, |set| set.contains(module));
            if applies {
                add(InferenceAction::new(
                    Phase::EffectiveModel,
                    ActionKind::ApplyDeviation { deviation: id },
                    vec![Prereq::TargetResolves {
                        at: id,
                        base: build.root_of(id),
                    }],
                ));
            }
        }
        "type" if !in_grouping => {
            let raw = node.argument().unwrap_or_default();
            let prereqs = if !raw.contains(':') && build.registry.builtin_type(raw).is_some() {
                Vec::new()
            } else {
                vec![Prereq::RefResolves {
                    at: id,
                    kind: NamespaceKind::Typedef,
                }]
            };
            add(InferenceAction::new(
                Phase::FullDeclaration,
                ActionKind::DeriveType { ty: id },
                prereqs,
            ));
        }
        "base" => {
            if let Some(parent) = node.parent {
                if build.keyword(parent) == "identity" {
                    add(InferenceAction::new(
                        Phase::FullDeclaration,
                        ActionKind::LinkIdentityBase {
                            identity: parent,
                            base_ref: id,
                        },
                        vec![Prereq::RefResolves {
                            at: id,
                            kind: NamespaceKind::Identity,
                        }],
                    ));
                }
            }
        }
        "if-feature" if !in_grouping => {
            add(InferenceAction::new(
                Phase::FullDeclaration,
                ActionKind::CheckFeatureRef,
                vec![Prereq::RefResolves {
                    at: id,
                    kind: NamespaceKind::Feature,
                }],
            ));
        }
        _ => {}
    }

    // every context parses its argument and publishes its definitions
    add(InferenceAction::new(
        Phase::StatementDefinition,
        ActionKind::Define { ctx: id },
        Vec::new(),
    ));
}

fn inside_grouping(build: &BuildCtx, id: CtxId) -> bool {
    let mut cur = build.node(id).parent;
    while let Some(p) = cur {
        if build.keyword(p) == "grouping" {
            return true;
        }
        cur = build.node(p).parent;
    }
    false
}

fn parent_is_root(build: &BuildCtx, id: CtxId) -> bool {
    build
        .node(id)
        .parent
        .map_or(false, |p| build.node(p).parent.is_none())
}

// ── Scheduler ───────────────────────────────────────────────────────────────

/// The phase scheduler: drives each phase to fixpoint over the registered
/// action set.
#[derive(Default)]
pub struct Reactor {
    actions: Vec<InferenceAction>,
}

impl Reactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, actions: Vec<InferenceAction>) {
        self.actions.extend(actions);
    }

    pub fn pending(&self) -> usize {
        self.actions.iter().filter(|a| !a.fired).count()
    }

    /// Sweep all unfired actions up to and including `phase` until a pass
    /// fires nothing new, then fail if anything remains blocked. Actions
    /// registered mid-sweep (expansion spawning contexts) join the same
    /// loop, including work tagged for an already-closed phase: a copy
    /// spliced late still resolves before the current phase ends.
    pub fn run_phase(&mut self, build: &mut BuildCtx, phase: Phase) -> Result<(), BuildError> {
        loop {
            let mut progressed = false;
            let mut i = 0;
            while i < self.actions.len() {
                let ready = {
                    let a = &self.actions[i];
                    !a.fired && a.phase <= phase && a.prereqs.iter().all(|p| p.met(build))
                };
                if ready {
                    self.actions[i].fired = true;
                    let kind = self.actions[i].kind.clone();
                    trace!(?kind, phase = phase.name(), "firing inference action");
                    let mut spawned = Vec::new();
                    dispatch(build, kind, &mut spawned)
                        .map_err(|e| BuildError::in_reactor(phase, e))?;
                    self.actions.extend(spawned);
                    progressed = true;
                }
                i += 1;
            }
            if !progressed {
                break;
            }
        }

        let blocked: Vec<&InferenceAction> = self
            .actions
            .iter()
            .filter(|a| !a.fired && a.phase <= phase)
            .collect();
        if blocked.is_empty() {
            debug!(phase = phase.name(), "phase fixpoint reached");
            return Ok(());
        }

        // representative cause: the first blocked action's unmet prerequisite
        let representative = blocked
            .first()
            .expect("blocked set is non-empty")
            .blocking_error(build, phase);
        let summary = blocked
            .iter()
            .map(|a| a.describe_blocked(build))
            .collect::<Vec<_>>()
            .join("; ");
        Err(BuildError {
            kind: crate::error::ErrorKind::PhaseDeadline,
            phase: Some(phase),
            source_ref: representative.source_ref.clone(),
            message: format!(
                "{} inference action(s) remained blocked at {} fixpoint: {}",
                blocked.len(),
                phase.name(),
                summary
            ),
            cause: Some(Box::new(representative)),
        })
    }
}

impl InferenceAction {
    fn blocked_at(&self, build: &BuildCtx) -> Option<CtxId> {
        match self.kind {
            ActionKind::RegisterSource { root } => Some(root),
            ActionKind::LinkImport { import } => Some(import),
            ActionKind::LinkInclude { include } => Some(include),
            ActionKind::Define { ctx } => Some(ctx),
            ActionKind::ExpandUses { uses } => Some(uses),
            ActionKind::ApplyAugment { augment } => Some(augment),
            ActionKind::ApplyDeviation { deviation } => Some(deviation),
            ActionKind::DeriveType { ty } => Some(ty),
            ActionKind::LinkIdentityBase { base_ref, .. } => Some(base_ref),
            ActionKind::CheckFeatureRef => {
                let _ = build;
                None
            }
        }
    }

    fn describe_blocked(&self, build: &BuildCtx) -> String {
        self.prereqs
            .iter()
            .filter(|p| !p.met(build))
            .map(|p| p.describe(build))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Build the representative failure for a blocked action: Linkage in
    /// SourceLinkage, Reference in later phases.
    fn blocking_error(&self, build: &BuildCtx, phase: Phase) -> BuildError {
        let message = self.describe_blocked(build);
        let mut err = if phase == Phase::SourceLinkage {
            BuildError::new(crate::error::ErrorKind::Linkage, message)
        } else {
            BuildError::new(crate::error::ErrorKind::Reference, message)
        };
        if let Some(at) = self.blocked_at(build) {
            err = err.at(build.source(at).clone());
        }
        err.in_phase(phase)
    }
}

fn dispatch(
    build: &mut BuildCtx,
    kind: ActionKind,
    spawned: &mut Vec<InferenceAction>,
) -> Result<(), BuildError> {
    match kind {
        ActionKind::RegisterSource { root } => linkage::register_source(build, root),
        ActionKind::LinkImport { import } => linkage::link_import(build, import),
        ActionKind::LinkInclude { include } => linkage::link_include(build, include),
        ActionKind::Define { ctx } => linkage::define_statement(build, ctx),
        ActionKind::ExpandUses { uses } => grouping::expand_uses(build, uses, spawned),
        ActionKind::ApplyAugment { augment } => augment::apply_augment(build, augment, spawned),
        ActionKind::ApplyDeviation { deviation } => {
            deviation::apply_deviation(build, deviation, spawned)
        }
        ActionKind::DeriveType { ty } => typeres::derive_type_action(build, ty),
        ActionKind::LinkIdentityBase { identity, base_ref } => {
            typeres::link_identity_base(build, identity, base_ref)
        }
        ActionKind::CheckFeatureRef => Ok(()),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
