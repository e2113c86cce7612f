use anyhow::{Context, Result};
use std::sync::Arc;

use plexus::config::PlexusConfig;
use plexus::embedding::EmbeddingProvider;
use plexus::federation::SearchOptions;

use super::{open_federation, preview, text_embedder};

/// Run a federated search from the terminal.
pub async fn search(
    config: &PlexusConfig,
    query: &str,
    radius: Option<u64>,
    top_k: Option<usize>,
) -> Result<()> {
    let federation = open_federation(config)?;

    // Embed the query
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(text_embedder(&federation).await?);
    let query_text = query.to_string();
    let query_embedding = tokio::task::spawn_blocking(move || provider.embed(&query_text)).await??;

    let response = federation
        .federated_search(
            &query_embedding,
            SearchOptions {
                radius: radius.map(u128::from),
                top_k,
                ..SearchOptions::default()
            },
        )
        .await
        .context("federated search failed")?;

    if !response.failed_project_ids.is_empty() {
        println!(
            "Partial results: {} project(s) failed or timed out: {}",
            response.failed_project_ids.len(),
            response.failed_project_ids.join(", ")
        );
    }

    if response.results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!(
        "Found {} result(s) from {} candidate(s) across {} project(s)\n",
        response.results.len(),
        response.total_candidates,
        response.searched_projects
    );

    for (i, r) in response.results.iter().enumerate() {
        println!(
            "  {}. {}::{} (score: {:.4}, similarity: {:.4})",
            i + 1,
            r.project_id.as_deref().unwrap_or("?"),
            r.node_id,
            r.rank_score(),
            r.similarity.unwrap_or(0.0),
        );
        if !r.title.is_empty() {
            println!("     {}", r.title);
        }
        println!("     {}", preview(&r.text, 120));
        if !r.other_project_ids.is_empty() {
            println!("     also in: {}", r.other_project_ids.join(", "));
        }
        println!();
    }

    Ok(())
}
