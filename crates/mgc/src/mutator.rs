use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tracing::debug;

use crate::diagnostics::{Diagnostic, Phase, Report, Severity};
use crate::graph::{
    DepEdge, DepTag, GraphError, GraphOp, ModuleGraph, ModuleKind, ModuleNode, ModuleProperties,
    NodeId, PatchMode, PropertiesPatch,
};
use crate::name::QualifiedModuleName;
use crate::visibility::CompositeRule;
use crate::{arch, defaults, visibility};

// Phases:
//   run pre-arch mutators
//   run arch mutators
//   run pre-deps mutators
//   run the deps mutator
//   run post-deps mutators
//   hand the resolved graph to downstream consumers

/// Shared state for one compilation run: the diagnostics sink every pass
/// accumulates into, and the visibility lookup table. One per run so
/// concurrent and test runs never share state.
pub struct RunState {
    pub targets: Vec<String>,
    diagnostics: Mutex<Vec<Diagnostic>>,
    visibility_rules: OnceLock<RwLock<HashMap<QualifiedModuleName, CompositeRule>>>,
}

impl RunState {
    pub fn new(targets: Vec<String>) -> Self {
        Self {
            targets,
            diagnostics: Mutex::new(Vec::new()),
            visibility_rules: OnceLock::new(),
        }
    }

    pub fn report_diagnostic(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().push(diagnostic);
    }

    /// The map from qualified module name to visibility rule, lazily created
    /// on first access, written once per module during gathering and
    /// read-only from enforcement onward.
    pub fn visibility_rule_map(&self) -> &RwLock<HashMap<QualifiedModuleName, CompositeRule>> {
        self.visibility_rules
            .get_or_init(|| RwLock::new(HashMap::new()))
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .lock()
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn finish(&self) -> Report {
        Report::ok().with_diagnostics(self.diagnostics.lock().clone())
    }
}

/// View of one direct dependency edge during a mutator visit.
pub struct DepView<'a> {
    pub id: NodeId,
    pub tag: DepTag,
    pub module: &'a ModuleNode,
}

impl DepView<'_> {
    pub fn qualified_name(&self) -> QualifiedModuleName {
        self.module.qualified_name()
    }
}

/// Capabilities common to bottom-up and top-down mutator contexts: identity,
/// dependency iteration, error reporting, rename, and own-module property
/// mutation. Structural mutations are recorded as deferred ops and applied at
/// the pass's next scheduling barrier.
pub struct ModuleCtx<'a> {
    graph: &'a ModuleGraph,
    state: &'a RunState,
    node: NodeId,
    phase: Phase,
    ops: Vec<GraphOp>,
}

impl<'a> ModuleCtx<'a> {
    pub fn module_name(&self) -> &'a str {
        &self.graph.node(self.node).name
    }

    pub fn module_package(&self) -> &'a str {
        &self.graph.node(self.node).package
    }

    pub fn module_variant(&self) -> Option<&'a str> {
        self.graph.node(self.node).variant.as_deref()
    }

    pub fn module_kind(&self) -> ModuleKind {
        self.graph.node(self.node).kind
    }

    pub fn props(&self) -> &'a ModuleProperties {
        &self.graph.node(self.node).props
    }

    pub fn enabled(&self) -> bool {
        self.props().enabled()
    }

    pub fn qualified_name(&self) -> QualifiedModuleName {
        self.graph.node(self.node).qualified_name()
    }

    pub fn state(&self) -> &'a RunState {
        self.state
    }

    pub fn visit_direct_deps<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut ModuleCtx<'a>, DepView<'a>),
    {
        let graph = self.graph;
        let edges: Vec<DepEdge> = graph.node(self.node).deps.clone();
        for edge in edges {
            let view = DepView {
                id: edge.target,
                tag: edge.tag,
                module: graph.node(edge.target),
            };
            f(self, view);
        }
    }

    pub fn rename(&mut self, to: &str) {
        self.ops.push(GraphOp::Rename {
            node: self.node,
            to: to.to_string(),
        });
    }

    pub fn set_properties(&mut self, props: ModuleProperties) {
        self.ops.push(GraphOp::SetProperties {
            node: self.node,
            props: Box::new(props),
        });
    }

    pub fn module_error(&self, code: &str, message: impl Into<String>) {
        let node = self.graph.node(self.node);
        self.state.report_diagnostic(Diagnostic {
            code: code.to_string(),
            severity: Severity::Error,
            phase: self.phase,
            module: node.name.clone(),
            variant: node.variant.clone(),
            property: None,
            message: message.into(),
        });
    }

    pub fn property_error(&self, code: &str, property: &str, message: impl Into<String>) {
        let node = self.graph.node(self.node);
        self.state.report_diagnostic(Diagnostic {
            code: code.to_string(),
            severity: Severity::Error,
            phase: self.phase,
            module: node.name.clone(),
            variant: node.variant.clone(),
            property: Some(property.to_string()),
            message: message.into(),
        });
    }
}

/// Context passed to bottom-up mutators: every transitive dependency of the
/// module has already been visited by this pass.
pub struct BottomUpCtx<'a> {
    base: ModuleCtx<'a>,
}

impl<'a> BottomUpCtx<'a> {
    pub fn add_dependency(&mut self, name: &str, tag: DepTag) {
        self.add_variation_dependency(None, name, tag);
    }

    pub fn add_variation_dependency(&mut self, variation: Option<&str>, name: &str, tag: DepTag) {
        let node = self.base.node;
        self.base.ops.push(GraphOp::AddDependency {
            node,
            name: name.to_string(),
            variation: variation.map(str::to_string),
            tag,
        });
    }

    /// Splits the module into one graph node per named variant; subsequent
    /// passes treat the variants independently.
    pub fn create_variations(&mut self, variants: &[&str]) {
        let node = self.base.node;
        self.base.ops.push(GraphOp::CreateVariations {
            node,
            variants: variants.iter().map(|v| v.to_string()).collect(),
        });
    }

    /// Redirects all dependencies on `name` to the current module.
    pub fn replace_dependencies(&mut self, name: &str) {
        let node = self.base.node;
        self.base.ops.push(GraphOp::ReplaceDependencies {
            node,
            name: name.to_string(),
        });
    }
}

impl<'a> Deref for BottomUpCtx<'a> {
    type Target = ModuleCtx<'a>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DerefMut for BottomUpCtx<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

/// Context passed to top-down mutators: the module is visited before any of
/// its dependencies, enabling property propagation onto dependencies ahead of
/// their own visits by later passes.
pub struct TopDownCtx<'a> {
    base: ModuleCtx<'a>,
}

impl<'a> TopDownCtx<'a> {
    /// Creates a new standalone module in the current module's package from a
    /// module-kind factory plus initial property values.
    pub fn create_module(&mut self, kind: ModuleKind, name: &str, props: ModuleProperties) {
        let package = self.base.module_package().to_string();
        self.base.ops.push(GraphOp::CreateModule {
            package,
            name: name.to_string(),
            kind,
            props,
        });
    }

    pub fn append_dep_properties(&mut self, dep: NodeId, patch: PropertiesPatch) {
        self.base.ops.push(GraphOp::ExtendProperties {
            node: dep,
            mode: PatchMode::Append,
            patch,
        });
    }

    pub fn prepend_dep_properties(&mut self, dep: NodeId, patch: PropertiesPatch) {
        self.base.ops.push(GraphOp::ExtendProperties {
            node: dep,
            mode: PatchMode::Prepend,
            patch,
        });
    }
}

impl<'a> Deref for TopDownCtx<'a> {
    type Target = ModuleCtx<'a>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DerefMut for TopDownCtx<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

type BottomUpMutatorFn = Box<dyn Fn(&mut BottomUpCtx) + Send + Sync>;
type TopDownMutatorFn = Box<dyn Fn(&mut TopDownCtx) + Send + Sync>;

enum MutatorFn {
    BottomUp(BottomUpMutatorFn),
    TopDown(TopDownMutatorFn),
}

/// One named transformation pass. Registered once before the run starts and
/// immutable thereafter.
pub struct Mutator {
    name: String,
    f: MutatorFn,
    parallel: bool,
    phase: Phase,
}

impl Mutator {
    /// Marks the pass as safe to dispatch concurrently across independent
    /// modules. Unmarked passes must be assumed to touch shared state and run
    /// single-threaded.
    pub fn parallel(&mut self) -> &mut Self {
        self.parallel = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Collects mutator registrations for one pipeline build.
pub struct RegisterMutatorsContext {
    mutators: Vec<Mutator>,
    phase: Phase,
}

impl RegisterMutatorsContext {
    pub fn new(phase: Phase) -> Self {
        Self {
            mutators: Vec::new(),
            phase,
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn bottom_up(
        &mut self,
        name: &str,
        f: impl Fn(&mut BottomUpCtx) + Send + Sync + 'static,
    ) -> &mut Mutator {
        let idx = self.mutators.len();
        self.mutators.push(Mutator {
            name: name.to_string(),
            f: MutatorFn::BottomUp(Box::new(f)),
            parallel: false,
            phase: self.phase,
        });
        &mut self.mutators[idx]
    }

    pub fn top_down(
        &mut self,
        name: &str,
        f: impl Fn(&mut TopDownCtx) + Send + Sync + 'static,
    ) -> &mut Mutator {
        let idx = self.mutators.len();
        self.mutators.push(Mutator {
            name: name.to_string(),
            f: MutatorFn::TopDown(Box::new(f)),
            parallel: false,
            phase: self.phase,
        });
        &mut self.mutators[idx]
    }
}

type RegisterMutatorFn = Box<dyn Fn(&mut RegisterMutatorsContext)>;

/// Ordered phase lists for one pipeline. Callers append registrations before
/// `build`; the built mutator list is fixed for the run.
pub struct PipelineBuilder {
    pre_arch: Vec<RegisterMutatorFn>,
    arch: Vec<RegisterMutatorFn>,
    pre_deps: Vec<RegisterMutatorFn>,
    post_deps: Vec<RegisterMutatorFn>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        let mut builder = Self::empty();
        builder
            .pre_arch(visibility::register_visibility_rule_checker)
            .pre_arch(defaults::register_defaults_mutators)
            .pre_arch(visibility::register_visibility_rule_gatherer)
            .arch(arch::register_arch_mutator)
            .post_deps(visibility::register_visibility_rule_enforcer);
        builder
    }
}

impl PipelineBuilder {
    pub fn empty() -> Self {
        Self {
            pre_arch: Vec::new(),
            arch: Vec::new(),
            pre_deps: Vec::new(),
            post_deps: Vec::new(),
        }
    }

    pub fn pre_arch(&mut self, f: impl Fn(&mut RegisterMutatorsContext) + 'static) -> &mut Self {
        self.pre_arch.push(Box::new(f));
        self
    }

    pub fn arch(&mut self, f: impl Fn(&mut RegisterMutatorsContext) + 'static) -> &mut Self {
        self.arch.push(Box::new(f));
        self
    }

    pub fn pre_deps(&mut self, f: impl Fn(&mut RegisterMutatorsContext) + 'static) -> &mut Self {
        self.pre_deps.push(Box::new(f));
        self
    }

    pub fn post_deps(&mut self, f: impl Fn(&mut RegisterMutatorsContext) + 'static) -> &mut Self {
        self.post_deps.push(Box::new(f));
        self
    }

    pub fn build(&self) -> Vec<Mutator> {
        let mut mctx = RegisterMutatorsContext::new(Phase::PreArch);
        for f in &self.pre_arch {
            f(&mut mctx);
        }
        mctx.set_phase(Phase::Arch);
        for f in &self.arch {
            f(&mut mctx);
        }
        mctx.set_phase(Phase::PreDeps);
        for f in &self.pre_deps {
            f(&mut mctx);
        }
        mctx.set_phase(Phase::Deps);
        mctx.bottom_up("deps", deps_mutator).parallel();
        mctx.set_phase(Phase::PostDeps);
        for f in &self.post_deps {
            f(&mut mctx);
        }
        mctx.mutators
    }
}

/// Adds the dependency edges each enabled module declares. Defaults modules
/// are templates, not buildable units, and declare no build edges.
fn deps_mutator(ctx: &mut BottomUpCtx) {
    if ctx.module_kind() == ModuleKind::Defaults {
        return;
    }
    if !ctx.enabled() {
        return;
    }
    for name in ctx.props().deps.clone() {
        ctx.add_dependency(&name, DepTag::Build);
    }
}

/// Runs the passes in order. A pass that records recoverable errors finishes
/// checking the whole graph first, then the run halts before the next pass:
/// later passes would only compound diagnostics from an already-known-bad
/// graph. Fatal errors abort immediately.
pub fn run_pipeline(
    graph: &mut ModuleGraph,
    state: &RunState,
    mutators: &[Mutator],
) -> Result<(), GraphError> {
    for m in mutators {
        debug!(
            mutator = m.name.as_str(),
            phase = ?m.phase,
            parallel = m.parallel,
            "running mutator pass"
        );
        run_mutator(graph, state, m)?;
        if state.has_errors() {
            debug!(
                mutator = m.name.as_str(),
                "halting pipeline after errored pass"
            );
            break;
        }
    }
    Ok(())
}

/// Drives one pass over the graph in topological levels. Within a level, a
/// parallel-marked pass fans out with rayon; deferred ops are applied at the
/// level barrier, so a dependency's mutations are always visible before any
/// module in a later level runs. Sequential passes apply ops after every
/// visit instead.
fn run_mutator(graph: &mut ModuleGraph, state: &RunState, m: &Mutator) -> Result<(), GraphError> {
    let mut levels = graph.levels()?;
    if matches!(m.f, MutatorFn::TopDown(_)) {
        levels.reverse();
    }
    for level in levels {
        if m.parallel {
            let graph_ref: &ModuleGraph = graph;
            let op_lists: Vec<Vec<GraphOp>> = level
                .par_iter()
                .map(|&id| visit(graph_ref, state, m, id))
                .collect();
            let ops: Vec<GraphOp> = op_lists.into_iter().flatten().collect();
            graph.apply_ops(ops, m.phase, state)?;
        } else {
            for &id in &level {
                let ops = visit(graph, state, m, id);
                graph.apply_ops(ops, m.phase, state)?;
            }
        }
    }
    Ok(())
}

fn visit(graph: &ModuleGraph, state: &RunState, m: &Mutator, id: NodeId) -> Vec<GraphOp> {
    let base = ModuleCtx {
        graph,
        state,
        node: id,
        phase: m.phase,
        ops: Vec::new(),
    };
    match &m.f {
        MutatorFn::BottomUp(f) => {
            let mut ctx = BottomUpCtx { base };
            f(&mut ctx);
            ctx.base.ops
        }
        MutatorFn::TopDown(f) => {
            let mut ctx = TopDownCtx { base };
            f(&mut ctx);
            ctx.base.ops
        }
    }
}
