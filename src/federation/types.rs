//! Federation record types.
//!
//! [`NewNode`] is what callers hand in; [`Node`] is what the store hands back,
//! with its Morton key, the params version that produced it, and timestamps.

use serde::{Deserialize, Serialize};

/// A node as supplied to `add_project_index` / `update_project_nodes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNode {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl NewNode {
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A stored node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub title: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Hex Morton key; `None` when the node has no usable embedding.
    pub morton_key: Option<String>,
    /// Params version the key was computed under.
    pub quant_version: Option<u64>,
    pub children: Vec<String>,
    /// Non-owning back-reference to the parent node's id.
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
}

/// A registered project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Multiplier applied to this project's similarity scores in fan-out search.
    pub weight: f64,
    pub created_at: String,
    pub updated_at: String,
}

/// Options for `add_project_index`.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Derive fresh params from this batch and overwrite the global record.
    pub recompute_quant: bool,
    /// Display name; defaults to the project id on first registration.
    pub name: Option<String>,
    pub weight: Option<f64>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            recompute_quant: true,
            name: None,
            weight: None,
        }
    }
}

/// Paging for `get_project_nodes`.
#[derive(Debug, Clone, Copy)]
pub struct PageOptions {
    pub limit: usize,
    pub offset: usize,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// Summary of one committed index batch.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub project_id: String,
    pub nodes_written: usize,
    pub nodes_keyed: usize,
    /// Params version in force after the batch.
    pub quant_version: Option<u64>,
    /// Previously stored nodes re-keyed because the params changed.
    pub rekeyed: usize,
}

/// Read-only federation counters.
#[derive(Debug, Clone, Serialize)]
pub struct FederationStats {
    pub project_count: u64,
    pub total_nodes: u64,
    pub keyed_nodes: u64,
    pub unkeyed_nodes: u64,
    /// Keyed under a params version other than the current one.
    pub stale_nodes: u64,
    pub quant_version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quant_updated_at: Option<String>,
    pub projects: Vec<ProjectStats>,
    pub db_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStats {
    pub id: String,
    pub name: String,
    pub node_count: u64,
    pub keyed_nodes: u64,
    pub stale_nodes: u64,
}
