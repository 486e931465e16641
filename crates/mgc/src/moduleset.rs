use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use mgc_contracts::MODULE_SET_SCHEMA_VERSION;

use crate::graph::{ArchOverride, GraphError, ModuleGraph, ModuleKind, ModuleProperties, Multilib};
use crate::validate;

/// The declarative input document: one build-configuration compilation's
/// worth of module declarations plus the target architectures to expand
/// per-arch modules over.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleSet {
    pub schema_version: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub modules: Vec<ModuleDecl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleDecl {
    #[serde(rename = "type")]
    pub kind: ModuleKind,
    pub package: String,
    pub name: String,
    #[serde(default)]
    pub visibility: Option<Vec<String>>,
    #[serde(default)]
    pub defaults: Vec<String>,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub srcs: Vec<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub multilib: Multilib,
    #[serde(default)]
    pub arch: BTreeMap<String, ArchOverride>,
}

impl ModuleDecl {
    pub fn properties(&self) -> ModuleProperties {
        ModuleProperties {
            visibility: self.visibility.clone(),
            defaults: self.defaults.clone(),
            deps: self.deps.clone(),
            srcs: self.srcs.clone(),
            enabled: self.enabled,
            multilib: self.multilib,
            arch: self.arch.clone(),
        }
    }
}

pub fn load_module_set(path: &Path) -> Result<ModuleSet> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("read module set: {}", path.display()))?;
    parse_module_set(&bytes).with_context(|| format!("parse module set: {}", path.display()))
}

pub fn parse_module_set(bytes: &[u8]) -> Result<ModuleSet> {
    let set: ModuleSet =
        serde_json::from_slice(bytes).context("module set must be a JSON document")?;
    validate_module_set(&set)?;
    Ok(set)
}

/// Load-time validation covers document shape only: identifier syntax,
/// duplicate names, target references. Cross-module references (deps,
/// defaults, visibility rules) are the pipeline's job and accumulate as
/// diagnostics instead of failing the load.
fn validate_module_set(set: &ModuleSet) -> Result<()> {
    if set.schema_version != MODULE_SET_SCHEMA_VERSION {
        anyhow::bail!(
            "unsupported module set schema_version {:?} (expected {:?})",
            set.schema_version,
            MODULE_SET_SCHEMA_VERSION
        );
    }

    let mut targets: HashSet<&str> = HashSet::new();
    for t in &set.targets {
        validate::validate_target_name(t).map_err(|message| anyhow::anyhow!(message))?;
        if !targets.insert(t.as_str()) {
            anyhow::bail!("duplicate target {t:?}");
        }
    }

    let mut names: HashSet<&str> = HashSet::new();
    for m in &set.modules {
        validate::validate_module_name(&m.name)
            .map_err(|message| anyhow::anyhow!("module {:?}: {message}", m.name))?;
        validate::validate_package_path(&m.package)
            .map_err(|message| anyhow::anyhow!("module {:?}: {message}", m.name))?;
        if !names.insert(m.name.as_str()) {
            anyhow::bail!("module {:?} is declared more than once", m.name);
        }
        if m.multilib == Multilib::PerArch && set.targets.is_empty() {
            anyhow::bail!(
                "module {:?} is multilib per_arch but the module set declares no targets",
                m.name
            );
        }
        for arch in m.arch.keys() {
            if !targets.contains(arch.as_str()) {
                anyhow::bail!(
                    "module {:?}: arch override references unknown target {arch:?}",
                    m.name
                );
            }
        }
    }

    Ok(())
}

/// Registers every declaration with a fresh registry. The returned graph has
/// no edges yet; the pipeline creates those.
pub fn build_graph(set: &ModuleSet) -> Result<ModuleGraph, GraphError> {
    let mut graph = ModuleGraph::new();
    for m in &set.modules {
        graph.register(&m.package, &m.name, m.kind, m.properties())?;
    }
    Ok(graph)
}
