use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostic, Phase, Severity};
use crate::mutator::RunState;
use crate::name::QualifiedModuleName;

/// Unrecoverable failures: the module graph is no longer in a well-defined
/// state, so the run aborts instead of accumulating a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphErrorKind {
    Cycle,
    Rename,
    Variation,
    Internal,
}

#[derive(Debug, Clone)]
pub struct GraphError {
    pub kind: GraphErrorKind,
    pub message: String,
}

impl GraphError {
    pub fn new(kind: GraphErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GraphError {}

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Library,
    Defaults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multilib {
    #[default]
    Common,
    PerArch,
}

/// Property additions applied to one target-architecture variant by the
/// `arch_hooks` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchOverride {
    pub srcs: Vec<String>,
    pub deps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleProperties {
    /// Raw visibility rule strings. `None` means no declaration (implicitly
    /// public); `Some(vec![])` is a declared-but-empty list, which the
    /// checker rejects.
    pub visibility: Option<Vec<String>>,
    pub defaults: Vec<String>,
    pub deps: Vec<String>,
    pub srcs: Vec<String>,
    pub enabled: Option<bool>,
    pub multilib: Multilib,
    pub arch: BTreeMap<String, ArchOverride>,
}

impl ModuleProperties {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DepTag {
    Defaults,
    Build,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepEdge {
    pub target: NodeId,
    pub tag: DepTag,
}

#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub name: String,
    pub package: String,
    pub kind: ModuleKind,
    /// `None` until variant expansion splits the module.
    pub variant: Option<String>,
    pub props: ModuleProperties,
    pub deps: Vec<DepEdge>,
}

impl ModuleNode {
    pub fn qualified_name(&self) -> QualifiedModuleName {
        QualifiedModuleName::new(&self.package, &self.name)
    }
}

/// Mutations recorded by mutator contexts and applied at scheduling barriers,
/// so a parallel pass's closures only ever read shared graph state.
#[derive(Debug, Clone)]
pub enum GraphOp {
    Rename {
        node: NodeId,
        to: String,
    },
    CreateVariations {
        node: NodeId,
        variants: Vec<String>,
    },
    AddDependency {
        node: NodeId,
        name: String,
        variation: Option<String>,
        tag: DepTag,
    },
    ReplaceDependencies {
        node: NodeId,
        name: String,
    },
    CreateModule {
        package: String,
        name: String,
        kind: ModuleKind,
        props: ModuleProperties,
    },
    SetProperties {
        node: NodeId,
        props: Box<ModuleProperties>,
    },
    ExtendProperties {
        node: NodeId,
        mode: PatchMode,
        patch: PropertiesPatch,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    Append,
    Prepend,
}

/// List-property additions a top-down pass pushes onto a dependency.
#[derive(Debug, Clone, Default)]
pub struct PropertiesPatch {
    pub visibility: Vec<String>,
    pub deps: Vec<String>,
    pub srcs: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
    nodes: Vec<ModuleNode>,
    by_name: HashMap<String, Vec<NodeId>>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        package: &str,
        name: &str,
        kind: ModuleKind,
        props: ModuleProperties,
    ) -> Result<NodeId, GraphError> {
        if self.by_name.contains_key(name) {
            return Err(GraphError::new(
                GraphErrorKind::Internal,
                format!("module {name:?} is registered more than once"),
            ));
        }
        let id = self.nodes.len();
        self.nodes.push(ModuleNode {
            name: name.to_string(),
            package: package.to_string(),
            kind,
            variant: None,
            props,
            deps: Vec::new(),
        });
        self.by_name.insert(name.to_string(), vec![id]);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &ModuleNode {
        &self.nodes[id]
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        0..self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &ModuleNode)> {
        self.nodes.iter().enumerate()
    }

    pub fn nodes_named(&self, name: &str) -> &[NodeId] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Groups nodes into topological levels over the current dependency
    /// edges: level 0 has no dependencies, and every node's dependencies sit
    /// in strictly lower levels. A dependency cycle is a fatal error.
    pub(crate) fn levels(&self) -> Result<Vec<Vec<NodeId>>, GraphError> {
        let n = self.nodes.len();
        let mut pending = vec![0usize; n];
        let mut dependents: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        for (id, node) in self.nodes.iter().enumerate() {
            pending[id] = node.deps.len();
            for edge in &node.deps {
                dependents[edge.target].push(id);
            }
        }

        let mut depth = vec![0usize; n];
        let mut queue: VecDeque<NodeId> = (0..n).filter(|&id| pending[id] == 0).collect();
        let mut processed = 0usize;
        while let Some(id) = queue.pop_front() {
            processed += 1;
            for &dependent in &dependents[id] {
                if depth[dependent] < depth[id] + 1 {
                    depth[dependent] = depth[id] + 1;
                }
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if processed != n {
            let mut stuck: Vec<&str> = (0..n)
                .filter(|&id| pending[id] != 0)
                .map(|id| self.nodes[id].name.as_str())
                .collect();
            stuck.sort_unstable();
            stuck.dedup();
            return Err(GraphError::new(
                GraphErrorKind::Cycle,
                format!("dependency cycle involving: {}", stuck.join(", ")),
            ));
        }

        let max_depth = depth.iter().copied().max().unwrap_or(0);
        let mut levels = vec![Vec::new(); if n == 0 { 0 } else { max_depth + 1 }];
        for id in 0..n {
            levels[depth[id]].push(id);
        }
        Ok(levels)
    }

    pub(crate) fn apply_ops(
        &mut self,
        ops: Vec<GraphOp>,
        phase: Phase,
        state: &RunState,
    ) -> Result<(), GraphError> {
        for op in ops {
            self.apply_op(op, phase, state)?;
        }
        Ok(())
    }

    fn apply_op(&mut self, op: GraphOp, phase: Phase, state: &RunState) -> Result<(), GraphError> {
        match op {
            GraphOp::Rename { node, to } => self.rename(node, &to),
            GraphOp::CreateVariations { node, variants } => {
                self.create_variations(node, &variants)
            }
            GraphOp::AddDependency {
                node,
                name,
                variation,
                tag,
            } => {
                self.add_dependency(node, &name, variation.as_deref(), tag, phase, state);
                Ok(())
            }
            GraphOp::ReplaceDependencies { node, name } => self.replace_dependencies(node, &name),
            GraphOp::CreateModule {
                package,
                name,
                kind,
                props,
            } => {
                if self.by_name.contains_key(&name) {
                    return Err(GraphError::new(
                        GraphErrorKind::Internal,
                        format!("create_module: a module named {name:?} already exists"),
                    ));
                }
                let id = self.nodes.len();
                self.nodes.push(ModuleNode {
                    name: name.clone(),
                    package,
                    kind,
                    variant: None,
                    props,
                    deps: Vec::new(),
                });
                self.by_name.insert(name, vec![id]);
                Ok(())
            }
            GraphOp::SetProperties { node, props } => {
                self.nodes[node].props = *props;
                Ok(())
            }
            GraphOp::ExtendProperties { node, mode, patch } => {
                extend_properties(&mut self.nodes[node].props, mode, patch);
                Ok(())
            }
        }
    }

    /// Renames all variants of the module. Renaming onto a name the registry
    /// already resolves is a contract violation.
    fn rename(&mut self, node: NodeId, to: &str) -> Result<(), GraphError> {
        let from = self.nodes[node].name.clone();
        if from == to {
            return Ok(());
        }
        if self.by_name.contains_key(to) {
            return Err(GraphError::new(
                GraphErrorKind::Rename,
                format!("rename {from:?} -> {to:?}: a module named {to:?} already exists"),
            ));
        }
        let ids = match self.by_name.remove(&from) {
            Some(ids) => ids,
            None => {
                return Err(GraphError::new(
                    GraphErrorKind::Internal,
                    format!("rename: module {from:?} is not registered"),
                ))
            }
        };
        for &id in &ids {
            self.nodes[id].name = to.to_string();
        }
        self.by_name.insert(to.to_string(), ids);
        Ok(())
    }

    fn create_variations(&mut self, node: NodeId, variants: &[String]) -> Result<(), GraphError> {
        if variants.is_empty() {
            return Err(GraphError::new(
                GraphErrorKind::Variation,
                format!(
                    "create_variations on {:?} requires at least one variant",
                    self.nodes[node].name
                ),
            ));
        }
        let base = self.nodes[node].clone();
        let variant_name = |new: &str| match &base.variant {
            Some(existing) => format!("{existing}_{new}"),
            None => new.to_string(),
        };

        self.nodes[node].variant = Some(variant_name(&variants[0]));
        for v in &variants[1..] {
            let mut clone = base.clone();
            clone.variant = Some(variant_name(v));
            let id = self.nodes.len();
            self.nodes.push(clone);
            match self.by_name.get_mut(&base.name) {
                Some(ids) => ids.push(id),
                None => {
                    return Err(GraphError::new(
                        GraphErrorKind::Internal,
                        format!("create_variations: module {:?} is not registered", base.name),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Resolves a dependency declared by name against the registry's current
    /// state. Resolution failures are recoverable module errors, not fatal.
    fn add_dependency(
        &mut self,
        node: NodeId,
        name: &str,
        variation: Option<&str>,
        tag: DepTag,
        phase: Phase,
        state: &RunState,
    ) {
        let candidates: Vec<NodeId> = self.nodes_named(name).to_vec();
        if candidates.is_empty() {
            self.dep_error(
                node,
                phase,
                state,
                "MGC-DEP-0001",
                format!("depends on undefined module {name:?}"),
            );
            return;
        }

        let target = match variation {
            Some(v) => match candidates
                .iter()
                .copied()
                .find(|&id| self.nodes[id].variant.as_deref() == Some(v))
            {
                Some(id) => id,
                None => {
                    self.dep_error(
                        node,
                        phase,
                        state,
                        "MGC-DEP-0002",
                        format!("dependency {name:?} has no variant {v:?}"),
                    );
                    return;
                }
            },
            None => {
                if candidates.len() == 1 {
                    candidates[0]
                } else {
                    let own_variant = self.nodes[node].variant.clone();
                    let same_variant = candidates
                        .iter()
                        .copied()
                        .find(|&id| self.nodes[id].variant == own_variant);
                    match same_variant {
                        Some(id) => id,
                        None => {
                            self.dep_error(
                                node,
                                phase,
                                state,
                                "MGC-DEP-0003",
                                format!("dependency {name:?} is ambiguous across variants"),
                            );
                            return;
                        }
                    }
                }
            }
        };
        self.nodes[node].deps.push(DepEdge { target, tag });
    }

    /// Redirects every edge that targets a variant of `name` to `node`
    /// instead. Used by prebuilt-style replacement passes.
    fn replace_dependencies(&mut self, node: NodeId, name: &str) -> Result<(), GraphError> {
        let victims: Vec<NodeId> = self
            .nodes_named(name)
            .iter()
            .copied()
            .filter(|&id| id != node)
            .collect();
        if victims.is_empty() {
            return Err(GraphError::new(
                GraphErrorKind::Internal,
                format!("replace_dependencies: no module named {name:?}"),
            ));
        }
        for n in &mut self.nodes {
            for edge in &mut n.deps {
                if victims.contains(&edge.target) {
                    edge.target = node;
                }
            }
        }
        Ok(())
    }

    fn dep_error(
        &self,
        node: NodeId,
        phase: Phase,
        state: &RunState,
        code: &str,
        message: String,
    ) {
        let n = &self.nodes[node];
        state.report_diagnostic(Diagnostic {
            code: code.to_string(),
            severity: Severity::Error,
            phase,
            module: n.name.clone(),
            variant: n.variant.clone(),
            property: None,
            message,
        });
    }
}

fn extend_properties(props: &mut ModuleProperties, mode: PatchMode, patch: PropertiesPatch) {
    extend_list(&mut props.deps, patch.deps, mode);
    extend_list(&mut props.srcs, patch.srcs, mode);
    if !patch.visibility.is_empty() {
        let dst = props.visibility.get_or_insert_with(Vec::new);
        extend_list(dst, patch.visibility, mode);
    }
}

fn extend_list(dst: &mut Vec<String>, src: Vec<String>, mode: PatchMode) {
    if src.is_empty() {
        return;
    }
    match mode {
        PatchMode::Append => dst.extend(src),
        PatchMode::Prepend => {
            let mut merged = src;
            merged.append(dst);
            *dst = merged;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library(graph: &mut ModuleGraph, package: &str, name: &str) -> NodeId {
        graph
            .register(package, name, ModuleKind::Library, ModuleProperties::default())
            .expect("register")
    }

    #[test]
    fn levels_order_dependencies_first() {
        let mut graph = ModuleGraph::new();
        let a = library(&mut graph, "top", "a");
        let b = library(&mut graph, "top", "b");
        let c = library(&mut graph, "top", "c");
        graph.nodes[a].deps.push(DepEdge {
            target: b,
            tag: DepTag::Build,
        });
        graph.nodes[b].deps.push(DepEdge {
            target: c,
            tag: DepTag::Build,
        });

        let levels = graph.levels().expect("levels");
        assert_eq!(levels, vec![vec![c], vec![b], vec![a]]);
    }

    #[test]
    fn levels_report_cycles_as_fatal() {
        let mut graph = ModuleGraph::new();
        let a = library(&mut graph, "top", "a");
        let b = library(&mut graph, "top", "b");
        graph.nodes[a].deps.push(DepEdge {
            target: b,
            tag: DepTag::Build,
        });
        graph.nodes[b].deps.push(DepEdge {
            target: a,
            tag: DepTag::Build,
        });

        let err = graph.levels().expect_err("cycle");
        assert_eq!(err.kind, GraphErrorKind::Cycle);
        assert!(err.message.contains("a, b"), "message: {}", err.message);
    }

    #[test]
    fn create_variations_splits_in_place_and_appends() {
        let mut graph = ModuleGraph::new();
        let a = library(&mut graph, "top", "a");
        graph
            .create_variations(a, &["arm64".to_string(), "x86_64".to_string()])
            .expect("variations");

        let ids = graph.nodes_named("a").to_vec();
        assert_eq!(ids.len(), 2);
        assert_eq!(graph.node(ids[0]).variant.as_deref(), Some("arm64"));
        assert_eq!(graph.node(ids[1]).variant.as_deref(), Some("x86_64"));
    }

    #[test]
    fn rename_rejects_claimed_names() {
        let mut graph = ModuleGraph::new();
        let a = library(&mut graph, "top", "a");
        library(&mut graph, "top", "b");

        let err = graph.rename(a, "b").expect_err("collision");
        assert_eq!(err.kind, GraphErrorKind::Rename);
    }
}
