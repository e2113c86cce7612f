#![allow(dead_code)]

use plexus::federation::{FederationConfig, NewNode};
use plexus::quant::{QuantOptions, ReductionPolicy};
use plexus::{db, Federation};
use rusqlite::Connection;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Two reduced dims at 4 bits each: 8-bit keys, two hex digits.
pub fn small_config() -> FederationConfig {
    FederationConfig {
        quant: QuantOptions {
            reduced_dims: 2,
            bits: 4,
            policy: ReductionPolicy::First,
        },
        ..FederationConfig::default()
    }
}

pub fn test_federation() -> Federation {
    Federation::open_in_memory(small_config()).unwrap()
}

pub fn test_federation_with(config: FederationConfig) -> Federation {
    Federation::open_in_memory(config).unwrap()
}

/// A node with a 3-dim embedding `[x, y, 0]`.
pub fn node(id: &str, text: &str, x: f32, y: f32) -> NewNode {
    NewNode::new(id, format!("Title {id}"), text).with_embedding(vec![x, y, 0.0])
}

/// A 4x4 grid of nodes spanning `[0, 1]` on both axes.
pub fn grid_nodes(prefix: &str) -> Vec<NewNode> {
    let mut nodes = Vec::new();
    for i in 0..4 {
        for j in 0..4 {
            let id = format!("{prefix}-{i}-{j}");
            nodes.push(node(&id, &format!("{prefix} cell {i} {j}"), i as f32 / 3.0, j as f32 / 3.0));
        }
    }
    nodes
}
