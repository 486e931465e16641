use crate::graph::{ModuleKind, Multilib};
use crate::mutator::{BottomUpCtx, RegisterMutatorsContext, TopDownCtx};

// Architecture-variant expansion: the `arch` pass splits each concrete
// module into per-target variants (or a single `common` variant), and the
// `arch_hooks` pass then applies target-specific property overrides onto the
// variants before dependency resolution sees them.

pub const COMMON_VARIANT: &str = "common";

pub fn register_arch_mutator(ctx: &mut RegisterMutatorsContext) {
    ctx.bottom_up("arch", arch_mutator).parallel();
    ctx.top_down("arch_hooks", arch_hook_mutator).parallel();
}

fn arch_mutator(ctx: &mut BottomUpCtx) {
    // Defaults modules are templates; they are consumed before this phase and
    // never built, so they get no variants.
    if ctx.module_kind() == ModuleKind::Defaults {
        return;
    }
    match ctx.props().multilib {
        Multilib::Common => ctx.create_variations(&[COMMON_VARIANT]),
        Multilib::PerArch => {
            let targets = ctx.state().targets.clone();
            let variants: Vec<&str> = targets.iter().map(String::as_str).collect();
            ctx.create_variations(&variants);
        }
    }
}

fn arch_hook_mutator(ctx: &mut TopDownCtx) {
    if ctx.module_kind() == ModuleKind::Defaults {
        return;
    }
    let Some(variant) = ctx.module_variant() else {
        return;
    };
    let Some(over) = ctx.props().arch.get(variant).cloned() else {
        return;
    };
    let mut props = ctx.props().clone();
    props.srcs.extend(over.srcs);
    props.deps.extend(over.deps);
    ctx.set_properties(props);
}
