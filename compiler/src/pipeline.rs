// pipeline.rs — Build orchestration
//
// Drives one build end to end: context trees from the declaration forest,
// action registration, the four resolution phases in order, and final
// materialization. Also computes provenance metadata for cache-key use.
//
// Preconditions: the registry outlives the build; the forest holds module
//   and submodule roots only.
// Postconditions: on success every phase reached fixpoint and the returned
//   model is immutable; on failure the first error aborted the build.
// Failure modes: any phase error, including phase-deadline reports for
//   actions still blocked at fixpoint.
// Side effects: tracing spans per phase.

use std::collections::HashSet;

use tracing::{debug, info_span};

use crate::augment;
use crate::context::BuildCtx;
use crate::decl::Declaration;
use crate::effective::{materialize, EffectiveModel};
use crate::error::BuildError;
use crate::phase::{Phase, ALL_PHASES};
use crate::reactor::{register_subtree, Reactor};
use crate::registry::Registry;
use crate::typeres;

// ── Build request ───────────────────────────────────────────────────────────

/// One build's inputs: the declaration forest plus feature and deviation
/// configuration. `None` feature set means every feature is supported;
/// `None` deviation set means deviations from every module apply.
#[derive(Debug, Default)]
pub struct BuildRequest {
    pub forest: Vec<Declaration>,
    pub supported_features: Option<HashSet<String>>,
    pub deviation_modules: Option<HashSet<String>>,
}

impl BuildRequest {
    pub fn new(forest: Vec<Declaration>) -> Self {
        Self {
            forest,
            supported_features: None,
            deviation_modules: None,
        }
    }
}

// ── Provenance ──────────────────────────────────────────────────────────────

/// Input fingerprints for one build, stable across runs with equal
/// inputs. Feeds `--emit build-info` and downstream cache keys.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub registry_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn source_hash_hex(&self) -> String {
        hex(&self.source_hash)
    }

    pub fn registry_fingerprint_hex(&self) -> String {
        hex(&self.registry_fingerprint)
    }

    /// JSON output for `--emit build-info`.
    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "source_hash": self.source_hash_hex(),
            "registry_fingerprint": self.registry_fingerprint_hex(),
            "compiler_version": self.compiler_version,
        });
        let mut out = serde_json::to_string_pretty(&value)
            .expect("provenance json is serializable");
        out.push('\n');
        out
    }
}

fn hex(bytes: &[u8; 32]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Fingerprint the raw input text and the registry. The registry hash
/// covers `Registry::canonical_json()` (compact, no whitespace), so it is
/// independent of display formatting.
pub fn compute_provenance(source: &str, registry: &Registry) -> Provenance {
    Provenance {
        source_hash: sha256(source.as_bytes()),
        registry_fingerprint: sha256(registry.canonical_json().as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Build runner ────────────────────────────────────────────────────────────

/// Run one build: every phase to fixpoint, in order, then materialize.
///
/// Grouping-internal augmentations apply in a pre-step when the
/// FullDeclaration phase opens, before any use-site expansion fires.
/// Identity base links are cycle-checked once that phase closes.
pub fn build(registry: &Registry, request: BuildRequest) -> Result<EffectiveModel, BuildError> {
    let mut build = BuildCtx::new(
        registry,
        request.supported_features,
        request.deviation_modules,
    );

    let mut roots = Vec::new();
    for decl in request.forest {
        roots.push(build.add_root(decl)?);
    }

    let mut reactor = Reactor::new();
    let mut actions = Vec::new();
    for &root in &roots {
        register_subtree(&build, root, Phase::SourceLinkage, &mut actions);
    }
    reactor.extend(actions);
    debug!(
        roots = roots.len(),
        contexts = build.len(),
        actions = reactor.pending(),
        "build registered"
    );

    for phase in ALL_PHASES {
        let span = info_span!("phase", name = phase.name());
        let _guard = span.enter();
        build.advance_all(phase);

        if phase == Phase::FullDeclaration {
            let spawned = augment::apply_grouping_augments(&mut build)
                .map_err(|e| BuildError::in_reactor(phase, e))?;
            reactor.extend(spawned);
        }

        reactor.run_phase(&mut build, phase)?;

        if phase == Phase::FullDeclaration {
            typeres::check_identity_cycles(&build)
                .map_err(|e| BuildError::in_reactor(phase, e))?;
        }
    }

    materialize(&build)
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::SourceRef;
    use crate::error::ErrorKind;

    fn at(module: &str, line: u32) -> SourceRef {
        SourceRef::new(module, line)
    }

    fn simple_module() -> Declaration {
        Declaration::new("module", Some("m"), at("m", 1))
            .with(Declaration::new("prefix", Some("m"), at("m", 2)))
            .with(Declaration::new("namespace", Some("urn:m"), at("m", 3)))
            .with(
                Declaration::new("container", Some("top"), at("m", 4)).with(
                    Declaration::new("leaf", Some("x"), at("m", 5))
                        .with(Declaration::new("type", Some("int8"), at("m", 6))),
                ),
            )
    }

    #[test]
    fn full_build_produces_a_model() {
        let registry = Registry::with_builtins();
        let model = build(&registry, BuildRequest::new(vec![simple_module()])).unwrap();
        let leaf = model.find_schema_node("m", &["top", "x"]).unwrap();
        assert_eq!(leaf.keyword, "leaf");
    }

    #[test]
    fn phase_errors_carry_the_underlying_cause() {
        let registry = Registry::with_builtins();
        let bad = Declaration::new("module", Some("m"), at("m", 1))
            .with(Declaration::new("prefix", Some("m"), at("m", 2)))
            .with(
                Declaration::new("deviation", Some("/m:top"), at("m", 3)).with(
                    Declaration::new("deviate", Some("not_supported"), at("m", 4)),
                ),
            );
        let err = build(&registry, BuildRequest::new(vec![bad])).unwrap_err();
        let cause = err.root_cause();
        assert!(cause
            .message
            .starts_with("String 'not_supported' is not valid deviate argument"));
    }

    #[test]
    fn missing_import_deadlocks_source_linkage() {
        let registry = Registry::with_builtins();
        let dangling = Declaration::new("module", Some("m"), at("m", 1))
            .with(Declaration::new("prefix", Some("m"), at("m", 2)))
            .with(
                Declaration::new("import", Some("absent"), at("m", 3))
                    .with(Declaration::new("prefix", Some("a"), at("m", 4))),
            );
        let err = build(&registry, BuildRequest::new(vec![dangling])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PhaseDeadline);
        assert_eq!(err.phase, Some(Phase::SourceLinkage));
        assert_eq!(err.cause().unwrap().kind, ErrorKind::Linkage);
    }

    #[test]
    fn provenance_is_stable_for_equal_inputs() {
        let registry = Registry::with_builtins();
        let a = compute_provenance("{\"forest\":[]}", &registry);
        let b = compute_provenance("{\"forest\":[]}", &registry);
        assert_eq!(a.source_hash, b.source_hash);
        assert_eq!(a.registry_fingerprint, b.registry_fingerprint);
        assert_eq!(a.source_hash_hex().len(), 64);
    }
}
