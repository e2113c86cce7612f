mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use plexus::config::PlexusConfig;
use plexus::federation::PageOptions;

#[derive(Parser)]
#[command(name = "plexus", version, about = "Federated Morton-key vector index")]
struct Cli {
    /// Config file (defaults to ~/.plexus/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the federation database
    Init,
    /// Index a JSON array of nodes into a project
    Index {
        project: String,
        nodes: PathBuf,
        /// Display name for the project
        #[arg(long)]
        name: Option<String>,
        /// Score multiplier for this project in federated search
        #[arg(long)]
        weight: Option<f64>,
        /// Keep the existing quantization params instead of deriving new ones
        #[arg(long)]
        no_recompute: bool,
        /// Embed nodes without an embedding from their title and text
        #[arg(long)]
        embed: bool,
    },
    /// Upsert nodes into a project without recomputing params
    Update {
        project: String,
        nodes: PathBuf,
        #[arg(long)]
        embed: bool,
    },
    /// Show one node
    Get { project: String, node: String },
    /// List a project's nodes
    List {
        project: String,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Search every project with a text query
    Search {
        query: String,
        /// Morton radius around the query key
        #[arg(long)]
        radius: Option<u64>,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Recompute quantization params from stored embeddings
    Recompute {
        /// Projects to derive from (all when omitted)
        projects: Vec<String>,
    },
    /// Re-key every stored node under the current params
    Rekey,
    /// Remove a project and its nodes
    Remove { project: String },
    /// Show federation statistics
    Stats,
    /// Delete all projects, nodes and params
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PlexusConfig::load_from(path)?,
        None => PlexusConfig::load()?,
    };

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Init => cli::init(&config)?,
        Command::Index {
            project,
            nodes,
            name,
            weight,
            no_recompute,
            embed,
        } => {
            cli::index::index(
                &config,
                cli::index::IndexArgs {
                    project: &project,
                    nodes: &nodes,
                    name,
                    weight,
                    recompute: !no_recompute,
                    embed,
                },
            )
            .await?
        }
        Command::Update {
            project,
            nodes,
            embed,
        } => cli::index::update(&config, &project, &nodes, embed).await?,
        Command::Get { project, node } => cli::inspect::get(&config, &project, &node).await?,
        Command::List {
            project,
            limit,
            offset,
        } => cli::inspect::list(&config, &project, PageOptions { limit, offset }).await?,
        Command::Search {
            query,
            radius,
            top_k,
        } => cli::search::search(&config, &query, radius, top_k).await?,
        Command::Recompute { projects } => cli::maintenance::recompute(&config, projects).await?,
        Command::Rekey => cli::maintenance::rekey(&config).await?,
        Command::Remove { project } => cli::maintenance::remove(&config, &project).await?,
        Command::Stats => cli::stats::stats(&config).await?,
        Command::Reset => cli::maintenance::reset(&config).await?,
    }

    Ok(())
}
