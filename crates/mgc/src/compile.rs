use serde::Serialize;
use sha2::{Digest, Sha256};

use mgc_contracts::RESOLVED_GRAPH_SCHEMA_VERSION;

use crate::diagnostics::Report;
use crate::graph::{DepTag, GraphError, ModuleGraph, ModuleKind};
use crate::moduleset::{self, ModuleSet};
use crate::mutator::{run_pipeline, PipelineBuilder, RunState};

/// Runs the full mutator pipeline over a module set and returns the final
/// graph together with the accumulated diagnostics. A `GraphError` means the
/// graph left the well-defined state (cycle, rename collision, ...) and no
/// report is produced.
pub fn run_module_set(
    set: &ModuleSet,
    builder: &PipelineBuilder,
) -> Result<(ModuleGraph, Report), GraphError> {
    let mut graph = moduleset::build_graph(set)?;
    let state = RunState::new(set.targets.clone());
    let mutators = builder.build();
    run_pipeline(&mut graph, &state, &mutators)?;
    Ok((graph, state.finish()))
}

pub fn check_module_set(set: &ModuleSet) -> Result<Report, GraphError> {
    let (_graph, report) = run_module_set(set, &PipelineBuilder::default())?;
    Ok(report)
}

/// Canonical serialized form of a resolved, variant-expanded graph, for
/// downstream build-action generation and change detection.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedGraph {
    pub schema_version: String,
    pub targets: Vec<String>,
    pub modules: Vec<ResolvedModule>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedModule {
    pub name: String,
    pub package: String,
    pub kind: ModuleKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub srcs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<ResolvedDep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedDep {
    pub name: String,
    pub package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub tag: DepTag,
}

pub fn resolved_graph(set: &ModuleSet, graph: &ModuleGraph) -> ResolvedGraph {
    let mut modules: Vec<ResolvedModule> = graph
        .nodes()
        .map(|(_, node)| {
            let mut deps: Vec<ResolvedDep> = node
                .deps
                .iter()
                .map(|edge| {
                    let target = graph.node(edge.target);
                    ResolvedDep {
                        name: target.name.clone(),
                        package: target.package.clone(),
                        variant: target.variant.clone(),
                        tag: edge.tag,
                    }
                })
                .collect();
            deps.sort_by(|a, b| {
                a.package
                    .cmp(&b.package)
                    .then_with(|| a.name.cmp(&b.name))
                    .then_with(|| a.variant.cmp(&b.variant))
            });
            ResolvedModule {
                name: node.name.clone(),
                package: node.package.clone(),
                kind: node.kind,
                variant: node.variant.clone(),
                srcs: node.props.srcs.clone(),
                deps,
            }
        })
        .collect();
    modules.sort_by(|a, b| {
        a.package
            .cmp(&b.package)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.variant.cmp(&b.variant))
    });

    ResolvedGraph {
        schema_version: RESOLVED_GRAPH_SCHEMA_VERSION.to_string(),
        targets: set.targets.clone(),
        modules,
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    let digest = h.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
