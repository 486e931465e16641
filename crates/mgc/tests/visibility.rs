use serde_json::json;

use mgc::compile;
use mgc::moduleset;

// Each test drives the full pipeline over a small module set and compares
// the rendered diagnostics against the expected errors, the same way the
// enforcement rules are exercised end to end in production.

fn check(modules: serde_json::Value) -> Vec<String> {
    let bytes = serde_json::to_vec(&json!({
        "schema_version": "mgc.moduleset@0.1.0",
        "targets": ["arm64", "x86_64"],
        "modules": modules,
    }))
    .expect("encode module set");
    let set = moduleset::parse_module_set(&bytes).expect("parse module set");
    let report = compile::check_module_set(&set).expect("run pipeline");
    report.diagnostics.iter().map(|d| d.to_string()).collect()
}

fn assert_errors(got: &[String], expected: &[&str]) {
    for e in expected {
        assert!(
            got.iter().any(|g| g.contains(e)),
            "missing error containing {e:?}, got: {got:#?}"
        );
    }
    assert_eq!(
        got.len(),
        expected.len(),
        "expected {} error(s), got: {got:#?}",
        expected.len()
    );
}

#[test]
fn empty_visibility_list_is_an_error() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample", "visibility": []},
    ]));
    assert_errors(
        &errs,
        &[r#"module "libexample": visibility: must contain at least one visibility rule"#],
    );
}

#[test]
fn empty_rule_is_an_error() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample", "visibility": [""]},
    ]));
    assert_errors(
        &errs,
        &[r#"invalid visibility pattern "" must match //<package>:<module>, //<package> or :<module>"#],
    );
}

#[test]
fn unqualified_rule_is_an_error() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample", "visibility": ["target"]},
    ]));
    assert_errors(&errs, &[r#"invalid visibility pattern "target""#]);
}

#[test]
fn bare_slashes_and_colons_are_errors() {
    for rule in ["//", ":", "//:"] {
        let errs = check(json!([
            {"type": "library", "package": "top", "name": "libexample", "visibility": [rule]},
        ]));
        let expected = format!("invalid visibility pattern {rule:?}");
        assert_errors(&errs, &[expected.as_str()]);
    }
}

#[test]
fn unknown_visibility_sentinel_is_an_error() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//visibility:unknown"]},
    ]));
    assert_errors(
        &errs,
        &[r#"unrecognized visibility rule "//visibility:unknown""#],
    );
}

#[test]
fn sentinels_mixed_with_other_rules_are_errors() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//visibility:public", "//namespace"]},
        {"type": "library", "package": "top", "name": "libother",
         "visibility": ["//visibility:private", "//namespace"]},
    ]));
    assert_errors(
        &errs,
        &[
            r#"module "libexample": visibility: cannot mix "//visibility:public" with any other visibility rules"#,
            r#"module "libother": visibility: cannot mix "//visibility:private" with any other visibility rules"#,
        ],
    );
}

#[test]
fn legacy_public_must_not_be_used() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//visibility:legacy_public"]},
    ]));
    assert_errors(
        &errs,
        &[r#"module "libexample": visibility: //visibility:legacy_public must not be used"#],
    );
}

#[test]
fn public_is_visible_everywhere() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//visibility:public"]},
        {"type": "library", "package": "top", "name": "libsamepackage", "deps": ["libexample"]},
        {"type": "library", "package": "top/nested", "name": "libnested", "deps": ["libexample"]},
        {"type": "library", "package": "other", "name": "libother", "deps": ["libexample"]},
    ]));
    assert_errors(&errs, &[]);
}

#[test]
fn private_is_visible_to_own_package_only() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//visibility:private"]},
        {"type": "library", "package": "top", "name": "libsamepackage", "deps": ["libexample"]},
        {"type": "library", "package": "top/nested", "name": "libnested", "deps": ["libexample"]},
        {"type": "library", "package": "other", "name": "libother", "deps": ["libexample"]},
    ]));
    assert_errors(
        &errs,
        &[
            r#"module "libnested" variant "common": depends on //top:libexample which is not visible to this module"#,
            r#"module "libother" variant "common": depends on //top:libexample which is not visible to this module"#,
        ],
    );
}

#[test]
fn pkg_sentinel_is_visible_to_own_package_only() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample", "visibility": [":__pkg__"]},
        {"type": "library", "package": "top", "name": "libsamepackage", "deps": ["libexample"]},
        {"type": "library", "package": "top/nested", "name": "libnested", "deps": ["libexample"]},
        {"type": "library", "package": "other", "name": "libother", "deps": ["libexample"]},
    ]));
    assert_errors(
        &errs,
        &[
            r#"module "libnested" variant "common": depends on //top:libexample which is not visible to this module"#,
            r#"module "libother" variant "common": depends on //top:libexample which is not visible to this module"#,
        ],
    );
}

#[test]
fn package_rule_does_not_reach_subpackages_or_peers() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//top/nested"]},
        {"type": "library", "package": "top", "name": "libsamepackage", "deps": ["libexample"]},
        {"type": "library", "package": "top/nested", "name": "libnested", "deps": ["libexample"]},
        {"type": "library", "package": "top/nested/again", "name": "libnestedagain",
         "deps": ["libexample"]},
        {"type": "library", "package": "peak", "name": "libother", "deps": ["libexample"]},
    ]));
    assert_errors(
        &errs,
        &[
            r#"module "libnestedagain" variant "common": depends on //top:libexample which is not visible to this module"#,
            r#"module "libother" variant "common": depends on //top:libexample which is not visible to this module"#,
        ],
    );
}

#[test]
fn subpackages_sentinel_covers_own_tree_only() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": [":__subpackages__"]},
        {"type": "library", "package": "top", "name": "libsamepackage", "deps": ["libexample"]},
        {"type": "library", "package": "top/nested", "name": "libnested", "deps": ["libexample"]},
        {"type": "library", "package": "peak/other", "name": "libother", "deps": ["libexample"]},
    ]));
    assert_errors(
        &errs,
        &[r#"module "libother" variant "common": depends on //top:libexample which is not visible to this module"#],
    );
}

#[test]
fn qualified_subpackages_rule_covers_named_tree_only() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//top/nested:__subpackages__", "//other"]},
        {"type": "library", "package": "top", "name": "libsamepackage", "deps": ["libexample"]},
        {"type": "library", "package": "top/nested", "name": "libnested", "deps": ["libexample"]},
        {"type": "library", "package": "top/other", "name": "libother", "deps": ["libexample"]},
    ]));
    assert_errors(
        &errs,
        &[r#"module "libother" variant "common": depends on //top:libexample which is not visible to this module"#],
    );
}

#[test]
fn union_of_package_and_subpackages_rules() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//top/nested", "//peak:__subpackages__"]},
        {"type": "library", "package": "top", "name": "libsamepackage", "deps": ["libexample"]},
        {"type": "library", "package": "top/nested", "name": "libnested", "deps": ["libexample"]},
        {"type": "library", "package": "peak/other", "name": "libother", "deps": ["libexample"]},
    ]));
    assert_errors(&errs, &[]);
}

#[test]
fn vendor_tree_is_only_targetable_from_outside_via_subpackages() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//vendor:__subpackages__"]},
        {"type": "library", "package": "top", "name": "libsamepackage",
         "visibility": ["//vendor/apps/AcmeSettings"]},
        {"type": "library", "package": "vendor", "name": "libvendorexample",
         "deps": ["libexample"], "visibility": ["//vendor/nested"]},
        {"type": "library", "package": "vendor/nested", "name": "libvendornested",
         "deps": ["libexample", "libvendorexample"]},
    ]));
    assert_errors(
        &errs,
        &[r#"module "libsamepackage": visibility: "//vendor/apps/AcmeSettings" is not allowed. Packages outside //vendor cannot make themselves visible to specific targets within //vendor, they can only use //vendor:__subpackages__."#],
    );
}

#[test]
fn vendor_subpackages_rule_admits_dependents_across_the_tree() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//vendor:__subpackages__"]},
        {"type": "library", "package": "vendor", "name": "libvendor", "deps": ["libexample"]},
        {"type": "library", "package": "vendor/apps/Foo", "name": "libvendorapp",
         "deps": ["libexample"]},
    ]));
    assert_errors(&errs, &[]);
}

// Defaults propagation.

#[test]
fn visibility_is_the_union_of_defaults_and_own_rules() {
    let errs = check(json!([
        {"type": "defaults", "package": "top", "name": "libexample_defaults",
         "visibility": ["//other"]},
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//top/nested"], "defaults": ["libexample_defaults"]},
        {"type": "library", "package": "top", "name": "libsamepackage", "deps": ["libexample"]},
        {"type": "library", "package": "top/nested", "name": "libnested", "deps": ["libexample"]},
        {"type": "library", "package": "other", "name": "libother", "deps": ["libexample"]},
        {"type": "library", "package": "outsider", "name": "liboutsider", "deps": ["libexample"]},
    ]));
    assert_errors(
        &errs,
        &[r#"module "liboutsider" variant "common": depends on //top:libexample which is not visible to this module"#],
    );
}

#[test]
fn visibility_is_the_union_of_multiple_defaults() {
    let errs = check(json!([
        {"type": "defaults", "package": "top", "name": "libexample_defaults_1",
         "visibility": ["//other"]},
        {"type": "defaults", "package": "top", "name": "libexample_defaults_2",
         "visibility": ["//top/nested"]},
        {"type": "library", "package": "top", "name": "libexample",
         "defaults": ["libexample_defaults_1", "libexample_defaults_2"]},
        {"type": "library", "package": "top", "name": "libsamepackage", "deps": ["libexample"]},
        {"type": "library", "package": "top/nested", "name": "libnested", "deps": ["libexample"]},
        {"type": "library", "package": "other", "name": "libother", "deps": ["libexample"]},
        {"type": "library", "package": "outsider", "name": "liboutsider", "deps": ["libexample"]},
    ]));
    assert_errors(
        &errs,
        &[r#"module "liboutsider" variant "common": depends on //top:libexample which is not visible to this module"#],
    );
}

#[test]
fn public_mixed_with_other_rules_in_one_defaults_module_is_an_error() {
    let errs = check(json!([
        {"type": "defaults", "package": "top", "name": "libexample_defaults",
         "visibility": ["//visibility:public", "//namespace"]},
        {"type": "library", "package": "top", "name": "libexample",
         "defaults": ["libexample_defaults"]},
    ]));
    assert_errors(
        &errs,
        &[r#"module "libexample_defaults": visibility: cannot mix "//visibility:public" with any other visibility rules"#],
    );
}

#[test]
fn own_public_may_override_inherited_rules() {
    let errs = check(json!([
        {"type": "defaults", "package": "top", "name": "libexample_defaults",
         "visibility": ["//namespace"]},
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//visibility:public"], "defaults": ["libexample_defaults"]},
        {"type": "library", "package": "outsider", "name": "liboutsider", "deps": ["libexample"]},
    ]));
    assert_errors(&errs, &[]);
}

#[test]
fn public_and_other_rules_from_independent_defaults_are_allowed() {
    let errs = check(json!([
        {"type": "defaults", "package": "top", "name": "libexample_defaults_1",
         "visibility": ["//namespace"]},
        {"type": "defaults", "package": "top", "name": "libexample_defaults_2",
         "visibility": ["//visibility:public"]},
        {"type": "library", "package": "top", "name": "libexample",
         "defaults": ["libexample_defaults_1", "libexample_defaults_2"]},
        {"type": "library", "package": "outsider", "name": "liboutsider", "deps": ["libexample"]},
    ]));
    assert_errors(&errs, &[]);

    let errs = check(json!([
        {"type": "defaults", "package": "top", "name": "libexample_defaults_1",
         "visibility": ["//visibility:public"]},
        {"type": "defaults", "package": "top", "name": "libexample_defaults_2",
         "visibility": ["//namespace"]},
        {"type": "library", "package": "top", "name": "libexample",
         "defaults": ["libexample_defaults_1", "libexample_defaults_2"]},
        {"type": "library", "package": "outsider", "name": "liboutsider", "deps": ["libexample"]},
    ]));
    assert_errors(&errs, &[]);
}

#[test]
fn private_inherited_from_defaults_restricts_to_own_package() {
    let errs = check(json!([
        {"type": "defaults", "package": "top", "name": "libexample_defaults",
         "visibility": ["//visibility:private"]},
        {"type": "library", "package": "top", "name": "libexample",
         "defaults": ["libexample_defaults"]},
        {"type": "library", "package": "top", "name": "libsamepackage", "deps": ["libexample"]},
        {"type": "library", "package": "top/nested", "name": "libnested", "deps": ["libexample"]},
        {"type": "library", "package": "other", "name": "libother", "deps": ["libexample"]},
    ]));
    assert_errors(
        &errs,
        &[
            r#"module "libnested" variant "common": depends on //top:libexample which is not visible to this module"#,
            r#"module "libother" variant "common": depends on //top:libexample which is not visible to this module"#,
        ],
    );
}

#[test]
fn private_mixed_with_other_rules_in_one_defaults_module_is_an_error() {
    let errs = check(json!([
        {"type": "defaults", "package": "top", "name": "libexample_defaults",
         "visibility": ["//visibility:private", "//namespace"]},
        {"type": "library", "package": "top", "name": "libexample",
         "defaults": ["libexample_defaults"]},
    ]));
    assert_errors(
        &errs,
        &[r#"module "libexample_defaults": visibility: cannot mix "//visibility:private" with any other visibility rules"#],
    );
}

#[test]
fn own_private_cannot_be_rescued_by_inherited_rules() {
    let errs = check(json!([
        {"type": "defaults", "package": "top", "name": "libexample_defaults",
         "visibility": ["//namespace"]},
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//visibility:private"], "defaults": ["libexample_defaults"]},
    ]));
    assert_errors(
        &errs,
        &[r#"module "libexample": visibility: cannot mix "//visibility:private" with any other visibility rules"#],
    );
}

#[test]
fn inherited_private_mixed_with_own_rules_is_an_error() {
    let errs = check(json!([
        {"type": "defaults", "package": "top", "name": "libexample_defaults",
         "visibility": ["//visibility:private"]},
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//namespace"], "defaults": ["libexample_defaults"]},
    ]));
    assert_errors(
        &errs,
        &[r#"module "libexample": visibility: cannot mix "//visibility:private" with any other visibility rules"#],
    );
}

#[test]
fn private_repeated_across_defaults_is_not_a_mix() {
    let errs = check(json!([
        {"type": "defaults", "package": "top", "name": "libexample_defaults_1",
         "visibility": ["//visibility:private"]},
        {"type": "defaults", "package": "top", "name": "libexample_defaults_2",
         "visibility": ["//visibility:private"]},
        {"type": "library", "package": "top", "name": "libexample",
         "visibility": ["//visibility:private"],
         "defaults": ["libexample_defaults_1", "libexample_defaults_2"]},
        {"type": "library", "package": "outsider", "name": "liboutsider", "deps": ["libexample"]},
    ]));
    assert_errors(
        &errs,
        &[r#"module "liboutsider" variant "common": depends on //top:libexample which is not visible to this module"#],
    );
}

#[test]
fn undeclared_visibility_is_implicitly_public() {
    let errs = check(json!([
        {"type": "library", "package": "top", "name": "libexample"},
        {"type": "library", "package": "far/away", "name": "libother", "deps": ["libexample"]},
    ]));
    assert_errors(&errs, &[]);
}
