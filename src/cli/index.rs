//! CLI `index` and `update` commands.

use anyhow::{Context, Result};
use std::path::Path;

use plexus::config::PlexusConfig;
use plexus::embedding::fill_missing_embeddings;
use plexus::federation::{IndexOptions, IndexReport};

use super::{open_federation, read_nodes, text_embedder};

pub struct IndexArgs<'a> {
    pub project: &'a str,
    pub nodes: &'a Path,
    pub name: Option<String>,
    pub weight: Option<f64>,
    pub recompute: bool,
    pub embed: bool,
}

/// Index a JSON node file into a project.
pub async fn index(config: &PlexusConfig, args: IndexArgs<'_>) -> Result<()> {
    let federation = open_federation(config)?;
    let mut nodes = read_nodes(args.nodes)?;

    if args.embed {
        let provider = text_embedder(&federation).await?;
        let filled = fill_missing_embeddings(&provider, &mut nodes);
        println!("Embedded {filled} node(s) from their text.");
    }

    let report = federation
        .add_project_index(
            args.project,
            nodes,
            IndexOptions {
                recompute_quant: args.recompute,
                name: args.name,
                weight: args.weight,
            },
        )
        .await
        .with_context(|| format!("failed to index project '{}'", args.project))?;

    print_report("Indexed", &report);
    Ok(())
}

/// Upsert nodes from a JSON file into a project without recomputing params.
pub async fn update(config: &PlexusConfig, project: &str, path: &Path, embed: bool) -> Result<()> {
    let federation = open_federation(config)?;
    let mut nodes = read_nodes(path)?;

    if embed {
        let provider = text_embedder(&federation).await?;
        fill_missing_embeddings(&provider, &mut nodes);
    }

    let report = federation
        .update_project_nodes(project, nodes)
        .await
        .with_context(|| format!("failed to update project '{project}'"))?;

    print_report("Updated", &report);
    Ok(())
}

fn print_report(verb: &str, report: &IndexReport) {
    println!(
        "{verb} {} node(s) in '{}' ({} keyed)",
        report.nodes_written, report.project_id, report.nodes_keyed
    );
    if let Some(v) = report.quant_version {
        println!("  Quantization params version: {v}");
    }
    if report.rekeyed > 0 {
        println!("  Re-keyed {} stored node(s) under the new params", report.rekeyed);
    }
}
