use std::fmt;

use crate::mutator::{BottomUpCtx, ModuleCtx, RegisterMutatorsContext, TopDownCtx};
use crate::name::{is_ancestor, QualifiedModuleName};

// Enforces visibility rules between modules.
//
// Three stage process:
// * The checker validates the raw rule lists before defaults expansion, so
//   that mixing //visibility:<sentinel> with other rules in a single declared
//   list is caught on the module that wrote it.
// * The gatherer runs after defaults expansion, parses the flattened lists
//   into rules and stores them in the run's lookup table keyed by qualified
//   module name.
// * The enforcer runs after dependency resolution and walks every direct
//   dependency edge. A dependency in the same package is always visible. A
//   dependency with no table entry is implicitly public. Otherwise the
//   dependency's rule must match the depending module.

/// One atomic visibility rule. A rule is associated with a module and
/// determines which other modules may depend on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisibilityRule {
    /// `//visibility:public` - matches everything.
    Public,
    /// `//visibility:private` - matches nothing. Same-package deps are
    /// short-circuited by the enforcer before rules are consulted, which is
    /// the only reason a private module is usable at all.
    Private,
    /// `//<pkg>:__pkg__` - matches modules in exactly that package.
    Package(String),
    /// `//<pkg>:__subpackages__` - matches modules in that package or any
    /// package below it.
    Subpackages(String),
}

impl VisibilityRule {
    pub fn matches(&self, m: &QualifiedModuleName) -> bool {
        match self {
            VisibilityRule::Public => true,
            VisibilityRule::Private => false,
            VisibilityRule::Package(pkg) => m.package == *pkg,
            VisibilityRule::Subpackages(prefix) => is_ancestor(prefix, &m.package),
        }
    }
}

impl fmt::Display for VisibilityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisibilityRule::Public => write!(f, "//visibility:public"),
            VisibilityRule::Private => write!(f, "//visibility:private"),
            VisibilityRule::Package(pkg) => write!(f, "//{pkg}:__pkg__"),
            VisibilityRule::Subpackages(pkg) => write!(f, "//{pkg}:__subpackages__"),
        }
    }
}

/// A module's full visibility specification: the ordered rules parsed from
/// its (defaults-expanded) visibility list. Matches if any element matches.
///
/// The list is empty only if every declared rule was invalid; the checker has
/// already reported those, and an empty composite behaves as if the
/// visibility was `["//visibility:private"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeRule(pub Vec<VisibilityRule>);

impl CompositeRule {
    pub fn matches(&self, m: &QualifiedModuleName) -> bool {
        self.0.iter().any(|r| r.matches(m))
    }
}

impl fmt::Display for CompositeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, r) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{r}")?;
        }
        write!(f, "]")
    }
}

/// Splits a visibility rule expression into its package and name parts.
/// Accepts `//<package>:<name>`, `//<package>` and `:<name>`; an empty
/// package defaults to `current_pkg` and an empty name to `__pkg__`.
/// Returns `None` for anything that does not match that grammar.
fn split_rule(rule: &str, current_pkg: &str) -> Option<(String, String)> {
    if rule.is_empty() {
        return None;
    }
    let (pkg_part, name_part, has_name) = if let Some(rest) = rule.strip_prefix("//") {
        match rest.split_once(':') {
            Some((pkg, name)) => (pkg, name, true),
            None => (rest, "", false),
        }
    } else if let Some(name) = rule.strip_prefix(':') {
        ("", name, true)
    } else {
        return None;
    };

    if rule.starts_with("//") && pkg_part.is_empty() {
        // "//" and "//:name" are both malformed.
        return None;
    }
    if has_name && name_part.is_empty() {
        // ":" and "//pkg:" are both malformed.
        return None;
    }
    if !pkg_part.is_empty() {
        for seg in pkg_part.split('/') {
            if seg.is_empty() || seg.contains(':') {
                return None;
            }
        }
    }
    if name_part.contains('/') || name_part.contains(':') {
        return None;
    }

    let pkg = if pkg_part.is_empty() {
        current_pkg.to_string()
    } else {
        pkg_part.to_string()
    };
    let name = if name_part.is_empty() {
        "__pkg__".to_string()
    } else {
        name_part.to_string()
    };
    Some((pkg, name))
}

fn is_allowed_from_outside_vendor(pkg: &str, name: &str) -> bool {
    if pkg == "vendor" {
        return name == "__subpackages__";
    }
    !is_ancestor("vendor", pkg)
}

/// The rule checker is registered before defaults expansion so that mixing
/// //visibility:<sentinel> with other rules in one declared list is reported
/// against the module that declared it, before inherited rules are merged in.
pub fn register_visibility_rule_checker(ctx: &mut RegisterMutatorsContext) {
    ctx.bottom_up("visibility_rule_checker", visibility_rule_checker)
        .parallel();
}

/// Visibility is not variant-dependent, so gathering runs before the arch
/// phase to avoid processing multiple variants per module. It goes after
/// defaults expansion to see the complete flattened lists.
pub fn register_visibility_rule_gatherer(ctx: &mut RegisterMutatorsContext) {
    ctx.bottom_up("visibility_rule_gatherer", visibility_rule_gatherer)
        .parallel();
}

/// Must be registered after dependencies have been resolved.
pub fn register_visibility_rule_enforcer(ctx: &mut RegisterMutatorsContext) {
    ctx.top_down("visibility_rule_enforcer", visibility_rule_enforcer)
        .parallel();
}

/// Checks the per-module visibility rule lists before defaults expansion.
/// Defaults modules carry a raw rule list of their own and are checked the
/// same way.
fn visibility_rule_checker(ctx: &mut BottomUpCtx) {
    let current_pkg = ctx.module_package();
    if let Some(visibility) = ctx.props().visibility.as_ref() {
        check_rules(ctx, current_pkg, visibility);
    }
}

fn check_rules(ctx: &ModuleCtx, current_pkg: &str, visibility: &[String]) {
    if visibility.is_empty() {
        // An empty list is ambiguous between "no visibility" and "public",
        // so at least one rule is required to make the owner's intent clear.
        ctx.property_error(
            "MGC-VIS-0001",
            "visibility",
            "must contain at least one visibility rule",
        );
        return;
    }

    for v in visibility {
        let Some((pkg, name)) = split_rule(v, current_pkg) else {
            // Invalid rule; keep going rather than aborting so every rule on
            // this module gets checked.
            ctx.property_error(
                "MGC-VIS-0002",
                "visibility",
                format!(
                    "invalid visibility pattern {v:?} must match //<package>:<module>, //<package> or :<module>"
                ),
            );
            continue;
        };

        if pkg == "visibility" {
            match name.as_str() {
                "private" | "public" => {}
                "legacy_public" => {
                    ctx.property_error(
                        "MGC-VIS-0003",
                        "visibility",
                        "//visibility:legacy_public must not be used",
                    );
                    continue;
                }
                _ => {
                    ctx.property_error(
                        "MGC-VIS-0004",
                        "visibility",
                        format!("unrecognized visibility rule {v:?}"),
                    );
                    continue;
                }
            }
            if visibility.len() != 1 {
                ctx.property_error(
                    "MGC-VIS-0005",
                    "visibility",
                    format!("cannot mix {v:?} with any other visibility rules"),
                );
                continue;
            }
        }

        // Packages outside the vendor tree face additional restrictions on
        // what they may say about it.
        if !is_ancestor("vendor", current_pkg) && !is_allowed_from_outside_vendor(&pkg, &name) {
            ctx.property_error(
                "MGC-VIS-0006",
                "visibility",
                format!(
                    "{v:?} is not allowed. Packages outside //vendor cannot make themselves visible to specific targets within //vendor, they can only use //vendor:__subpackages__."
                ),
            );
            continue;
        }
    }
}

/// Gathers the flattened visibility rules after defaults expansion, parses
/// them and stores them in the run's lookup table keyed by qualified module
/// name for retrieval during enforcement.
fn visibility_rule_gatherer(ctx: &mut BottomUpCtx) {
    let qualified = ctx.qualified_name();
    let Some(visibility) = ctx.props().visibility.as_ref() else {
        return;
    };
    let rule = parse_rules(ctx, &qualified.package, visibility);
    ctx.state()
        .visibility_rule_map()
        .write()
        .insert(qualified, rule);
}

/// Maps each well-formed entry to a rule. Entries the checker already
/// rejected are dropped here without another diagnostic; the only new error
/// this stage can produce is a private rule mixed with non-private ones,
/// which defaults merging is exactly the process able to introduce.
fn parse_rules(ctx: &ModuleCtx, current_pkg: &str, visibility: &[String]) -> CompositeRule {
    let mut rules = Vec::with_capacity(visibility.len());
    let mut has_private_rule = false;
    let mut has_non_private_rule = false;
    for v in visibility {
        let Some((pkg, name)) = split_rule(v, current_pkg) else {
            continue;
        };

        let rule = if pkg == "visibility" {
            match name.as_str() {
                "private" => VisibilityRule::Private,
                "public" => VisibilityRule::Public,
                _ => continue,
            }
        } else {
            match name.as_str() {
                "__pkg__" => VisibilityRule::Package(pkg),
                "__subpackages__" => VisibilityRule::Subpackages(pkg),
                _ => continue,
            }
        };

        if rule == VisibilityRule::Private {
            has_private_rule = true;
        } else {
            has_non_private_rule = true;
        }
        rules.push(rule);
    }

    if has_private_rule && has_non_private_rule {
        ctx.property_error(
            "MGC-VIS-0007",
            "visibility",
            "cannot mix \"//visibility:private\" with any other visibility rules",
        );
        return CompositeRule(vec![VisibilityRule::Private]);
    }

    CompositeRule(rules)
}

/// Walks every direct dependency edge, checking that the depending module has
/// access. Runs per concrete variant: an edge exists once per resolved
/// variant and each is checked independently.
fn visibility_rule_enforcer(ctx: &mut TopDownCtx) {
    let qualified = ctx.qualified_name();
    ctx.visit_direct_deps(|ctx, dep| {
        let dep_qualified = dep.qualified_name();

        // Targets are always visible to other targets in their own package.
        if dep_qualified.package == qualified.package {
            return;
        }

        let map = ctx.state().visibility_rule_map().read();
        if let Some(rule) = map.get(&dep_qualified) {
            if !rule.matches(&qualified) {
                ctx.module_error(
                    "MGC-VIS-0010",
                    format!("depends on {dep_qualified} which is not visible to this module"),
                );
            }
        }
    });
}
