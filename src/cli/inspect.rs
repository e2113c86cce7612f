//! CLI `get` and `list` commands.

use anyhow::{bail, Result};

use plexus::config::PlexusConfig;
use plexus::federation::PageOptions;

use super::{open_federation, preview};

/// Display full details for a single node.
pub async fn get(config: &PlexusConfig, project: &str, node_id: &str) -> Result<()> {
    let federation = open_federation(config)?;

    let Some(n) = federation.get_project_node(project, node_id).await? else {
        bail!("no node '{node_id}' in project '{project}'");
    };

    println!("Node: {}::{}", project, n.id);
    println!("{}", "=".repeat(50));
    println!("  Title:          {}", n.title);
    println!(
        "  Morton key:     {}",
        n.morton_key.as_deref().unwrap_or("(none)")
    );
    if let Some(v) = n.quant_version {
        println!("  Params version: {v}");
    }
    if let Some(ref e) = n.embedding {
        println!("  Embedding:      {} dims", e.len());
    }
    if let Some(ref parent) = n.parent {
        println!("  Parent:         {parent}");
    }
    if !n.children.is_empty() {
        println!("  Children:       {}", n.children.join(", "));
    }
    println!("  Created:        {}", n.created_at);
    println!("  Updated:        {}", n.updated_at);
    if let Some(ref meta) = n.meta {
        println!("  Meta:           {}", serde_json::to_string_pretty(meta)?);
    }
    println!();
    println!("Text:");
    println!("  {}", n.text);
    Ok(())
}

/// List one page of a project's nodes.
pub async fn list(config: &PlexusConfig, project: &str, page: PageOptions) -> Result<()> {
    let federation = open_federation(config)?;
    let nodes = federation.get_project_nodes(project, page).await?;

    if nodes.is_empty() {
        println!("No nodes.");
        return Ok(());
    }

    for n in &nodes {
        println!(
            "  {:<24} {:<34} {}",
            n.id,
            n.morton_key.as_deref().unwrap_or("-"),
            preview(&n.title, 60)
        );
    }
    println!();
    println!("{} node(s) from offset {}", nodes.len(), page.offset);
    Ok(())
}
