use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use mgc::compile;
use mgc::diagnostics;
use mgc::moduleset;
use mgc_contracts::MGC_REPORT_SCHEMA_VERSION;

#[derive(Parser)]
#[command(name = "mgc")]
#[command(about = "Module graph compiler (module set -> resolved graph).", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the mutator pipeline and report diagnostics.
    Check {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        report_json: bool,
    },
    /// Run the mutator pipeline and emit the resolved graph.
    Resolve {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct MgcToolReport {
    schema_version: &'static str,
    command: &'static str,
    ok: bool,
    input: String,
    diagnostics_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    diagnostics: Vec<diagnostics::Diagnostic>,
    exit_code: u8,
}

#[derive(Debug, Serialize)]
struct MgcResolveReport {
    schema_version: &'static str,
    command: &'static str,
    ok: bool,
    input: String,
    fingerprint: String,
    graph: compile::ResolvedGraph,
}

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();

    match cli.cmd {
        Cmd::Check { input, report_json } => {
            let set = moduleset::load_module_set(&input)?;
            let report = compile::check_module_set(&set)?;
            let exit_code = u8::from(!report.ok);

            if report_json {
                let tool_report = MgcToolReport {
                    schema_version: MGC_REPORT_SCHEMA_VERSION,
                    command: "check",
                    ok: report.ok,
                    input: input.display().to_string(),
                    diagnostics_count: report.diagnostics.len(),
                    diagnostics: report.diagnostics,
                    exit_code,
                };
                println!("{}", serde_json::to_string(&tool_report)?);
            } else {
                for d in &report.diagnostics {
                    eprintln!("{}: {d}", severity_label(d.severity));
                }
                if report.ok {
                    println!("ok: {} diagnostics", report.diagnostics.len());
                } else {
                    eprintln!("{} error(s)", report.error_count());
                }
            }
            Ok(std::process::ExitCode::from(exit_code))
        }
        Cmd::Resolve { input, out } => {
            let set = moduleset::load_module_set(&input)?;
            let (graph, report) =
                compile::run_module_set(&set, &mgc::mutator::PipelineBuilder::default())?;
            if !report.ok {
                for d in &report.diagnostics {
                    eprintln!("{}: {d}", severity_label(d.severity));
                }
                eprintln!("{} error(s)", report.error_count());
                return Ok(std::process::ExitCode::from(1));
            }

            let resolved = compile::resolved_graph(&set, &graph);
            let graph_json = serde_json::to_string(&resolved)?;
            let fingerprint = compile::sha256_hex(graph_json.as_bytes());

            if let Some(out) = &out {
                std::fs::write(out, &graph_json)
                    .with_context(|| format!("write resolved graph: {}", out.display()))?;
                println!("wrote {} (sha256 {fingerprint})", out.display());
            } else {
                let resolve_report = MgcResolveReport {
                    schema_version: MGC_REPORT_SCHEMA_VERSION,
                    command: "resolve",
                    ok: true,
                    input: input.display().to_string(),
                    fingerprint,
                    graph: resolved,
                };
                println!("{}", serde_json::to_string(&resolve_report)?);
            }
            Ok(std::process::ExitCode::SUCCESS)
        }
    }
}

fn severity_label(severity: diagnostics::Severity) -> &'static str {
    match severity {
        diagnostics::Severity::Error => "error",
        diagnostics::Severity::Warning => "warning",
    }
}
