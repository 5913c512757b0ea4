// Integration tests for the full build pipeline.
//
// Each scenario drives a declaration forest through every phase via
// `pipeline::build` and checks the shape of the effective model, or the
// error the build fails with.

use std::collections::HashSet;
use std::sync::Arc;

use smc::decl::{Declaration, SourceRef};
use smc::error::ErrorKind;
use smc::phase::Phase;
use smc::pipeline::{build, BuildRequest};
use smc::registry::Registry;

// ── Test helpers ────────────────────────────────────────────────────────────

fn at(module: &str, line: u32) -> SourceRef {
    SourceRef::new(module, line)
}

fn stmt(keyword: &str, argument: &str, src: SourceRef) -> Declaration {
    Declaration::new(keyword, Some(argument), src)
}

fn module_header(name: &str, prefix: &str) -> Declaration {
    stmt("module", name, at(name, 1))
        .with(stmt("prefix", prefix, at(name, 2)))
        .with(stmt("namespace", &format!("urn:{name}"), at(name, 3)))
}

// ── Import linkage ──────────────────────────────────────────────────────────

#[test]
fn import_makes_remote_groupings_usable() {
    let registry = Registry::with_builtins();
    let lib = module_header("lib", "l").with(
        stmt("grouping", "endpoint", at("lib", 4))
            .with(stmt("leaf", "host", at("lib", 5)).with(stmt("type", "string", at("lib", 6))))
            .with(stmt("leaf", "port", at("lib", 7)).with(stmt("type", "uint16", at("lib", 8)))),
    );
    let app = module_header("app", "a")
        .with(
            stmt("import", "lib", at("app", 4)).with(stmt("prefix", "l", at("app", 5))),
        )
        .with(stmt("container", "server", at("app", 6)).with(stmt("uses", "l:endpoint", at("app", 7))));

    let model = build(&registry, BuildRequest::new(vec![lib, app])).unwrap();
    let host = model.find_schema_node("app", &["server", "host"]).unwrap();
    assert_eq!(host.keyword, "leaf");
    assert!(model.find_schema_node("app", &["server", "port"]).is_some());
}

#[test]
fn import_with_wrong_revision_fails_linkage() {
    let registry = Registry::with_builtins();
    let lib = module_header("lib", "l").with(stmt("revision", "2024-01-01", at("lib", 4)));
    let app = module_header("app", "a").with(
        stmt("import", "lib", at("app", 4))
            .with(stmt("prefix", "l", at("app", 5)))
            .with(stmt("revision-date", "2020-05-05", at("app", 6))),
    );
    let err = build(&registry, BuildRequest::new(vec![lib, app])).unwrap_err();
    assert_eq!(err.root_cause().kind, ErrorKind::Linkage);
    assert!(err.root_cause().message.contains("2020-05-05"));
}

#[test]
fn missing_import_reports_a_source_linkage_deadline() {
    let registry = Registry::with_builtins();
    let app = module_header("app", "a")
        .with(stmt("import", "nowhere", at("app", 4)).with(stmt("prefix", "n", at("app", 5))));
    let err = build(&registry, BuildRequest::new(vec![app])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::PhaseDeadline);
    assert_eq!(err.phase, Some(Phase::SourceLinkage));
}

// ── Grouping expansion ──────────────────────────────────────────────────────

#[test]
fn two_uses_of_one_grouping_are_independent() {
    let registry = Registry::with_builtins();
    let m = module_header("m", "m")
        .with(
            stmt("grouping", "addr", at("m", 4))
                .with(stmt("leaf", "ip", at("m", 5)).with(stmt("type", "string", at("m", 6)))),
        )
        .with(
            stmt("container", "north", at("m", 7)).with(
                stmt("uses", "addr", at("m", 8)).with(
                    stmt("refine", "ip", at("m", 9))
                        .with(stmt("default", "10.0.0.1", at("m", 10))),
                ),
            ),
        )
        .with(stmt("container", "south", at("m", 11)).with(stmt("uses", "addr", at("m", 12))));

    let model = build(&registry, BuildRequest::new(vec![m])).unwrap();
    let north_ip = model.find_schema_node("m", &["north", "ip"]).unwrap();
    let south_ip = model.find_schema_node("m", &["south", "ip"]).unwrap();

    let default_of = |leaf: &Arc<smc::effective::EffectiveStatement>| {
        leaf.children
            .iter()
            .find(|c| c.keyword == "default")
            .and_then(|c| c.argument.clone())
    };
    assert_eq!(default_of(north_ip), Some("10.0.0.1".to_owned()));
    assert_eq!(default_of(south_ip), None);
}

#[test]
fn nested_uses_expand_recursively() {
    let registry = Registry::with_builtins();
    let m = module_header("m", "m")
        .with(
            stmt("grouping", "inner", at("m", 4))
                .with(stmt("leaf", "deep", at("m", 5)).with(stmt("type", "string", at("m", 6)))),
        )
        .with(stmt("grouping", "outer", at("m", 7)).with(stmt("uses", "inner", at("m", 8))))
        .with(stmt("container", "c", at("m", 9)).with(stmt("uses", "outer", at("m", 10))));
    let model = build(&registry, BuildRequest::new(vec![m])).unwrap();
    assert!(model.find_schema_node("m", &["c", "deep"]).is_some());
}

#[test]
fn cyclic_grouping_reference_is_fatal() {
    let registry = Registry::with_builtins();
    let m = module_header("m", "m")
        .with(stmt("grouping", "a", at("m", 4)).with(stmt("uses", "b", at("m", 5))))
        .with(stmt("grouping", "b", at("m", 6)).with(stmt("uses", "a", at("m", 7))))
        .with(stmt("container", "c", at("m", 8)).with(stmt("uses", "a", at("m", 9))));
    let err = build(&registry, BuildRequest::new(vec![m])).unwrap_err();
    assert_eq!(err.root_cause().kind, ErrorKind::ConstraintViolation);
    assert!(err.root_cause().message.contains("cyclic grouping reference"));
}

#[test]
fn refine_of_absent_target_is_fatal() {
    let registry = Registry::with_builtins();
    let m = module_header("m", "m")
        .with(
            stmt("grouping", "g", at("m", 4))
                .with(stmt("leaf", "x", at("m", 5)).with(stmt("type", "string", at("m", 6)))),
        )
        .with(
            stmt("container", "c", at("m", 7)).with(
                stmt("uses", "g", at("m", 8)).with(
                    stmt("refine", "missing", at("m", 9))
                        .with(stmt("default", "1", at("m", 10))),
                ),
            ),
        );
    let err = build(&registry, BuildRequest::new(vec![m])).unwrap_err();
    assert_eq!(err.root_cause().kind, ErrorKind::Reference);
}

// ── Augmentation ────────────────────────────────────────────────────────────

#[test]
fn augment_adds_nodes_with_their_condition() {
    let registry = Registry::with_builtins();
    let base = module_header("base", "b")
        .with(stmt("container", "sys", at("base", 4)));
    let ext = module_header("ext", "e")
        .with(stmt("import", "base", at("ext", 4)).with(stmt("prefix", "b", at("ext", 5))))
        .with(
            stmt("augment", "/b:sys", at("ext", 6))
                .with(stmt("when", "b:sys/enabled", at("ext", 7)))
                .with(stmt("leaf", "extra", at("ext", 8)).with(stmt("type", "string", at("ext", 9)))),
        );
    let model = build(&registry, BuildRequest::new(vec![base, ext])).unwrap();
    let extra = model.find_schema_node("base", &["sys", "extra"]).unwrap();
    assert!(extra.children.iter().any(|c| c.keyword == "when"));
}

#[test]
fn augment_into_grouping_reaches_every_use_site() {
    let registry = Registry::with_builtins();
    let m = module_header("m", "m")
        .with(
            stmt("grouping", "g", at("m", 4))
                .with(stmt("leaf", "a", at("m", 5)).with(stmt("type", "string", at("m", 6)))),
        )
        .with(
            stmt("augment", "/m:g", at("m", 7))
                .with(stmt("leaf", "b", at("m", 8)).with(stmt("type", "string", at("m", 9)))),
        )
        .with(stmt("container", "one", at("m", 10)).with(stmt("uses", "g", at("m", 11))))
        .with(stmt("container", "two", at("m", 12)).with(stmt("uses", "g", at("m", 13))));
    let model = build(&registry, BuildRequest::new(vec![m])).unwrap();
    assert!(model.find_schema_node("m", &["one", "b"]).is_some());
    assert!(model.find_schema_node("m", &["two", "b"]).is_some());
}

#[test]
fn uses_site_augment_reaches_into_the_expanded_copy() {
    let registry = Registry::with_builtins();
    let m = module_header("m", "m")
        .with(
            stmt("grouping", "g", at("m", 4))
                .with(stmt("container", "inner", at("m", 5))),
        )
        .with(stmt("container", "c", at("m", 6)).with(
            stmt("uses", "g", at("m", 7)).with(
                stmt("augment", "inner", at("m", 8))
                    .with(stmt("leaf", "b", at("m", 9)).with(stmt("type", "string", at("m", 10)))),
            ),
        ));
    let model = build(&registry, BuildRequest::new(vec![m])).unwrap();
    assert!(model.find_schema_node("m", &["c", "inner", "b"]).is_some());
    // the augmented leaf lives under its target, not beside the copy
    assert!(model.find_schema_node("m", &["c", "b"]).is_none());
}

#[test]
fn augment_with_dead_target_reports_a_deadline() {
    let registry = Registry::with_builtins();
    let m = module_header("m", "m").with(
        stmt("augment", "/m:ghost", at("m", 4))
            .with(stmt("leaf", "x", at("m", 5)).with(stmt("type", "string", at("m", 6)))),
    );
    let err = build(&registry, BuildRequest::new(vec![m])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::PhaseDeadline);
    assert_eq!(err.phase, Some(Phase::FullDeclaration));
}

// ── Deviations ──────────────────────────────────────────────────────────────

fn deviation_forest() -> Vec<Declaration> {
    let base = module_header("base", "b").with(
        stmt("container", "sys", at("base", 4))
            .with(
                stmt("leaf", "mtu", at("base", 5))
                    .with(stmt("type", "int32", at("base", 6)))
                    .with(stmt("default", "1500", at("base", 7))),
            )
            .with(stmt("leaf", "legacy", at("base", 8)).with(stmt("type", "string", at("base", 9)))),
    );
    let dev = module_header("dev", "d")
        .with(stmt("import", "base", at("dev", 4)).with(stmt("prefix", "b", at("dev", 5))))
        .with(
            stmt("deviation", "/b:sys/b:mtu", at("dev", 6)).with(
                stmt("deviate", "add", at("dev", 7)).with(stmt("units", "bytes", at("dev", 8))),
            ),
        )
        .with(
            stmt("deviation", "/b:sys/b:mtu", at("dev", 9)).with(
                stmt("deviate", "replace", at("dev", 10))
                    .with(stmt("default", "9000", at("dev", 11))),
            ),
        )
        .with(
            stmt("deviation", "/b:sys/b:mtu", at("dev", 12)).with(
                stmt("deviate", "delete", at("dev", 13))
                    .with(stmt("units", "bytes", at("dev", 14))),
            ),
        )
        .with(
            stmt("deviation", "/b:sys/b:legacy", at("dev", 15))
                .with(stmt("deviate", "not-supported", at("dev", 16))),
        );
    vec![base, dev]
}

#[test]
fn applied_deviations_are_recorded_on_the_deviating_module() {
    let registry = Registry::with_builtins();
    let model = build(&registry, BuildRequest::new(deviation_forest())).unwrap();
    let dev = model.find_module("dev", None).unwrap();
    assert_eq!(dev.deviations.len(), 4);
    assert!(dev.deviations.iter().all(|d| d.module == "dev"));
}

#[test]
fn deviations_edit_and_remove_their_targets() {
    let registry = Registry::with_builtins();
    let model = build(&registry, BuildRequest::new(deviation_forest())).unwrap();
    assert!(model.find_schema_node("base", &["sys", "legacy"]).is_none());
    let mtu = model.find_schema_node("base", &["sys", "mtu"]).unwrap();
    let default = mtu
        .children
        .iter()
        .find(|c| c.keyword == "default")
        .and_then(|c| c.argument.as_deref());
    assert_eq!(default, Some("9000"));
    assert!(!mtu.children.iter().any(|c| c.keyword == "units"));
}

#[test]
fn deviate_replaced_type_resolves_through_its_typedef() {
    let registry = Registry::with_builtins();
    let m = module_header("m", "m")
        .with(
            stmt("typedef", "small", at("m", 4)).with(
                stmt("type", "int8", at("m", 5)).with(stmt("range", "0..10", at("m", 6))),
            ),
        )
        .with(
            stmt("container", "top", at("m", 7))
                .with(stmt("leaf", "x", at("m", 8)).with(stmt("type", "int8", at("m", 9)))),
        )
        .with(
            stmt("deviation", "/m:top/m:x", at("m", 10)).with(
                stmt("deviate", "replace", at("m", 11))
                    .with(stmt("type", "small", at("m", 12))),
            ),
        );
    let model = build(&registry, BuildRequest::new(vec![m])).unwrap();
    let leaf = model.find_schema_node("m", &["top", "x"]).unwrap();
    let ty = leaf.children.iter().find(|c| c.keyword == "type").unwrap();
    let spec = ty.type_spec.as_ref().unwrap();
    assert_eq!(spec.name, "small");
    assert_eq!(spec.effective_range().unwrap().intervals(), &[(0, 10)]);
}

#[test]
fn deviation_module_filter_skips_other_modules() {
    let registry = Registry::with_builtins();
    let mut request = BuildRequest::new(deviation_forest());
    request.deviation_modules = Some(HashSet::from(["other".to_owned()]));
    let model = build(&registry, request).unwrap();
    assert!(model.find_schema_node("base", &["sys", "legacy"]).is_some());
    assert_eq!(model.find_module("dev", None).unwrap().deviations.len(), 0);
}

#[test]
fn invalid_deviate_literal_surfaces_through_the_build_error_chain() {
    let registry = Registry::with_builtins();
    let bad = module_header("m", "m").with(
        stmt("deviation", "/m:x", at("m", 4))
            .with(stmt("deviate", "not_supported", at("m", 5))),
    );
    let err = build(&registry, BuildRequest::new(vec![bad])).unwrap_err();
    assert!(err
        .root_cause()
        .message
        .starts_with("String 'not_supported' is not valid deviate argument"));
}

// ── Types and identities ────────────────────────────────────────────────────

#[test]
fn typedef_narrowing_flows_into_the_model() {
    let registry = Registry::with_builtins();
    let m = module_header("m", "m")
        .with(
            stmt("typedef", "percent", at("m", 4)).with(
                stmt("type", "uint8", at("m", 5)).with(stmt("range", "0..100", at("m", 6))),
            ),
        )
        .with(stmt("leaf", "load", at("m", 7)).with(stmt("type", "percent", at("m", 8))));
    let model = build(&registry, BuildRequest::new(vec![m])).unwrap();
    let module = model.find_module("m", None).unwrap();
    assert_eq!(module.typedefs, vec!["percent"]);
    let leaf = model.find_schema_node("m", &["load"]).unwrap();
    let spec = leaf.children[0].type_spec.as_ref().unwrap();
    assert_eq!(spec.effective_range().unwrap().intervals(), &[(0, 100)]);
}

#[test]
fn unrestricted_builtin_types_share_the_registry_singleton() {
    let registry = Registry::with_builtins();
    let m = module_header("m", "m")
        .with(stmt("leaf", "a", at("m", 4)).with(stmt("type", "int8", at("m", 5))))
        .with(stmt("leaf", "b", at("m", 6)).with(stmt("type", "int8", at("m", 7))));
    let model = build(&registry, BuildRequest::new(vec![m])).unwrap();
    let spec_a = model.find_schema_node("m", &["a"]).unwrap().children[0]
        .type_spec
        .clone()
        .unwrap();
    let spec_b = model.find_schema_node("m", &["b"]).unwrap().children[0]
        .type_spec
        .clone()
        .unwrap();
    assert!(Arc::ptr_eq(&spec_a, &spec_b));
    assert!(Arc::ptr_eq(&spec_a, &registry.builtin_type("int8").unwrap()));
}

#[test]
fn cross_module_identity_hierarchy_links() {
    let registry = Registry::with_builtins();
    let base = module_header("base", "b").with(stmt("identity", "transport", at("base", 4)));
    let ext = module_header("ext", "e")
        .with(stmt("import", "base", at("ext", 4)).with(stmt("prefix", "b", at("ext", 5))))
        .with(
            stmt("identity", "tcp", at("ext", 6)).with(stmt("base", "b:transport", at("ext", 7))),
        );
    let model = build(&registry, BuildRequest::new(vec![base, ext])).unwrap();
    let ext_mod = model.find_module("ext", None).unwrap();
    let tcp = ext_mod.identities.iter().find(|i| i.name == "tcp").unwrap();
    assert_eq!(tcp.base.as_deref(), Some("transport"));
}

// ── Features ────────────────────────────────────────────────────────────────

#[test]
fn unsupported_features_prune_conditional_nodes() {
    let registry = Registry::with_builtins();
    let m = module_header("m", "m")
        .with(stmt("feature", "fancy", at("m", 4)))
        .with(
            stmt("container", "c", at("m", 5))
                .with(
                    stmt("leaf", "plain", at("m", 6)).with(stmt("type", "string", at("m", 7))),
                )
                .with(
                    stmt("leaf", "gated", at("m", 8))
                        .with(stmt("if-feature", "fancy", at("m", 9)))
                        .with(stmt("type", "string", at("m", 10))),
                ),
        );
    let mut request = BuildRequest::new(vec![m.clone()]);
    request.supported_features = Some(HashSet::new());
    let model = build(&registry, request).unwrap();
    assert!(model.find_schema_node("m", &["c", "plain"]).is_some());
    assert!(model.find_schema_node("m", &["c", "gated"]).is_none());

    let mut request = BuildRequest::new(vec![m]);
    request.supported_features = Some(HashSet::from(["fancy".to_owned()]));
    let model = build(&registry, request).unwrap();
    assert!(model.find_schema_node("m", &["c", "gated"]).is_some());
}

#[test]
fn unknown_feature_reference_reports_a_deadline() {
    let registry = Registry::with_builtins();
    let m = module_header("m", "m").with(
        stmt("container", "c", at("m", 4)).with(stmt("if-feature", "ghost", at("m", 5))),
    );
    let err = build(&registry, BuildRequest::new(vec![m])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::PhaseDeadline);
    assert_eq!(err.cause().unwrap().kind, ErrorKind::Reference);
}

// ── Submodules and determinism ──────────────────────────────────────────────

#[test]
fn submodule_body_folds_into_the_owning_module() {
    let registry = Registry::with_builtins();
    let main = module_header("m", "m").with(stmt("include", "m-sub", at("m", 4)));
    let sub = stmt("submodule", "m-sub", at("m-sub", 1))
        .with(stmt("belongs-to", "m", at("m-sub", 2)).with(stmt("prefix", "m", at("m-sub", 3))))
        .with(stmt("container", "extra", at("m-sub", 4)));
    let model = build(&registry, BuildRequest::new(vec![main, sub])).unwrap();
    assert!(model.find_schema_node("m", &["extra"]).is_some());
}

#[test]
fn repeated_builds_of_equal_inputs_are_equal() {
    let registry = Registry::with_builtins();
    let a = build(&registry, BuildRequest::new(deviation_forest())).unwrap();
    let b = build(&registry, BuildRequest::new(deviation_forest())).unwrap();
    assert_eq!(a, b);
}
