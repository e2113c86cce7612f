use anyhow::Result;

use plexus::config::PlexusConfig;

use super::open_federation;

/// Display federation statistics in the terminal.
pub async fn stats(config: &PlexusConfig) -> Result<()> {
    let federation = open_federation(config)?;
    let response = federation.get_federation_stats().await?;

    println!("Federation Statistics");
    println!("{}", "=".repeat(40));
    println!("  Projects:            {}", response.project_count);
    println!("  Total nodes:         {}", response.total_nodes);
    println!("  Keyed:               {}", response.keyed_nodes);
    println!("  Unkeyed:             {}", response.unkeyed_nodes);
    println!("  Stale keys:          {}", response.stale_nodes);
    println!();

    match response.quant_version {
        Some(v) => {
            println!("Params version:        {v}");
            if let Some(ref at) = response.quant_updated_at {
                println!("Params updated:        {at}");
            }
        }
        None => println!("Params:                (none)"),
    }
    println!();

    if !response.projects.is_empty() {
        println!("By Project:");
        for p in &response.projects {
            println!(
                "  {:<20} {:>8} nodes {:>8} keyed {:>6} stale",
                p.id, p.node_count, p.keyed_nodes, p.stale_nodes
            );
        }
        println!();
    }

    println!("Database size:         {} bytes", response.db_size_bytes);
    Ok(())
}
