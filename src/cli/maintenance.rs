//! CLI `recompute`, `rekey`, `remove` and `reset` commands.

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;

use plexus::config::PlexusConfig;

use super::open_federation;

/// Derive params from stored embeddings of `projects` (all when empty).
pub async fn recompute(config: &PlexusConfig, projects: Vec<String>) -> Result<()> {
    let federation = open_federation(config)?;
    let scope = (!projects.is_empty()).then_some(projects);

    let stored = federation
        .compute_global_quant_params(scope)
        .await
        .context("failed to recompute quantization params")?;

    let p = &stored.params;
    println!("Quantization params version {}", stored.version);
    println!(
        "  {} dims x {} bits = {}-bit keys ({} policy, dims {:?})",
        p.reduced_dims,
        p.bits_per_dim,
        p.key_bits(),
        p.policy,
        p.dims
    );
    if !config.quantization.auto_rekey {
        println!("  auto_rekey is off; run `plexus rekey` to refresh stored keys");
    }
    Ok(())
}

/// Re-key every project under the current params.
pub async fn rekey(config: &PlexusConfig) -> Result<()> {
    let federation = open_federation(config)?;
    let projects = federation.get_all_project_ids().await?;

    if projects.is_empty() {
        println!("No projects to re-key.");
        return Ok(());
    }

    let pb = ProgressBar::new(projects.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("##-"),
    );

    let mut total = 0;
    for project in &projects {
        pb.set_message(project.clone());
        total += federation
            .rekey_project(project)
            .await
            .with_context(|| format!("failed to re-key project '{project}'"))?;
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!("Re-keyed {total} node(s) across {} project(s).", projects.len());
    Ok(())
}

/// Remove one project and its nodes.
pub async fn remove(config: &PlexusConfig, project: &str) -> Result<()> {
    let federation = open_federation(config)?;
    federation.remove_project_index(project).await?;
    println!("Removed project '{project}'.");
    Ok(())
}

/// Delete all projects and params after user confirmation.
pub async fn reset(config: &PlexusConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    println!("WARNING: This will permanently delete ALL projects, nodes, and quantization params.");
    println!("Database: {}", db_path.display());
    print!("\nType YES to confirm: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    if input.trim() != "YES" {
        bail!("reset cancelled");
    }

    let federation = open_federation(config)?;
    federation.clear_all_indices().await?;

    println!("All indices deleted. Federation reset complete.");
    Ok(())
}
