//! Federated vector indexing with Morton (Z-order) keys.
//!
//! Plexus keeps many independent project indices in one directory and searches
//! them together. Each node's embedding is reduced to a few dimensions,
//! scalar-quantized with corpus-derived min/max ranges and bit-interleaved into
//! a fixed-width Morton key, so a key-range scan over an ordinary B-tree index
//! returns candidates that are close in embedding space. Per-project candidates
//! are then re-ranked, deduplicated, normalized and freshness-boosted into one
//! ranking.
//!
//! # Architecture
//!
//! - **Storage**: SQLite via rusqlite; one `nodes` table keyed by
//!   `(project_id, id)` with an index on `(project_id, morton_key)`
//! - **Quantization**: one federation-wide, versioned params record; keys carry
//!   the version they were computed under and are re-keyed on recomputation
//! - **Search**: bounded, time-limited fan-out over projects on tokio
//! - **Fusion**: content-hash dedupe, z-score/logistic normalization,
//!   exponential-decay freshness boost, stable merge
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema and migrations
//! - [`quant`]: quantization params and Morton keys
//! - [`federation`]: the project directory, its store and fan-out search
//! - [`fusion`]: cross-project result fusion
//! - [`embedding`]: embedding providers for nodes and queries

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod federation;
pub mod fusion;
pub mod quant;

pub use error::{Error, Result};
pub use federation::Federation;
