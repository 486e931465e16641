use crate::graph::{DepTag, ModuleKind, ModuleProperties};
use crate::mutator::{BottomUpCtx, RegisterMutatorsContext};

// Expands "defaults" references into concrete property values before the
// passes that read them run. Split into two passes: the first adds a
// dependency edge per referenced defaults module, the second (ordered after
// it, so the edges exist) merges the referenced properties bottom-up. The
// bottom-up ordering is what makes chained defaults work: a defaults module
// is fully merged before anything that references it is visited.

pub fn register_defaults_mutators(ctx: &mut RegisterMutatorsContext) {
    ctx.bottom_up("defaults_deps", defaults_deps_mutator).parallel();
    ctx.bottom_up("defaults", defaults_mutator).parallel();
}

fn defaults_deps_mutator(ctx: &mut BottomUpCtx) {
    for name in ctx.props().defaults.clone() {
        ctx.add_dependency(&name, DepTag::Defaults);
    }
}

fn defaults_mutator(ctx: &mut BottomUpCtx) {
    if ctx.props().defaults.is_empty() {
        return;
    }
    let mut merged = ctx.props().clone();
    ctx.visit_direct_deps(|ctx, dep| {
        if dep.tag != DepTag::Defaults {
            return;
        }
        if dep.module.kind != ModuleKind::Defaults {
            ctx.property_error(
                "MGC-DEF-0001",
                "defaults",
                format!("module {:?} is not a defaults module", dep.module.name),
            );
            return;
        }
        merge_defaults(&mut merged, &dep.module.props);
    });
    ctx.set_properties(merged);
}

/// Merges a defaults module's properties into `dst`. List properties keep the
/// module's own entries first with the inherited entries appended; scalar
/// properties are only taken from defaults when the module leaves them unset.
/// The `defaults` list itself is never inherited.
fn merge_defaults(dst: &mut ModuleProperties, src: &ModuleProperties) {
    if let Some(src_visibility) = src.visibility.as_ref() {
        dst.visibility
            .get_or_insert_with(Vec::new)
            .extend(src_visibility.iter().cloned());
    }
    dst.deps.extend(src.deps.iter().cloned());
    dst.srcs.extend(src.srcs.iter().cloned());
    if dst.enabled.is_none() {
        dst.enabled = src.enabled;
    }
    for (target, over) in &src.arch {
        let entry = dst.arch.entry(target.clone()).or_default();
        entry.srcs.extend(over.srcs.iter().cloned());
        entry.deps.extend(over.deps.iter().cloned());
    }
}
