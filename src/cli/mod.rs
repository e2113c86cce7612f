pub mod index;
pub mod inspect;
pub mod maintenance;
pub mod search;
pub mod stats;

use anyhow::{Context, Result};
use std::path::Path;

use plexus::config::PlexusConfig;
use plexus::embedding::{HashingEmbeddingProvider, DEFAULT_DIMENSIONS};
use plexus::federation::NewNode;
use plexus::Federation;

/// Open the configured federation database.
pub fn open_federation(config: &PlexusConfig) -> Result<Federation> {
    let db_path = config.resolved_db_path();
    Federation::open(&db_path, config.federation_config())
        .with_context(|| format!("failed to open federation at {}", db_path.display()))
}

/// Create the database and print where it lives.
pub fn init(config: &PlexusConfig) -> Result<()> {
    let federation = open_federation(config)?;
    drop(federation);
    println!(
        "Federation database ready at {}",
        config.resolved_db_path().display()
    );
    Ok(())
}

/// Read a JSON array of nodes from a file.
pub fn read_nodes(path: &Path) -> Result<Vec<NewNode>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a JSON array of nodes", path.display()))
}

/// The hashing embedder sized to the current params, or the default size when
/// no params exist yet.
pub async fn text_embedder(federation: &Federation) -> Result<HashingEmbeddingProvider> {
    let dims = federation
        .get_quant_params()
        .await?
        .map_or(DEFAULT_DIMENSIONS, |s| s.params.source_dims);
    Ok(HashingEmbeddingProvider::new(dims))
}

/// First `max` characters of `text`, with an ellipsis when cut.
pub fn preview(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
