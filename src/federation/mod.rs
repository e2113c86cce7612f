//! Project stores, the federation directory and fan-out search.

pub mod directory;
pub mod fanout;
pub mod store;
pub mod types;

pub use directory::{
    cosine_similarity, FederatedSearchResponse, Federation, FederationConfig, SearchOptions,
};
pub use fanout::{fan_out, FanOut, FanOutConfig};
pub use types::{
    FederationStats, IndexOptions, IndexReport, NewNode, Node, PageOptions, Project, ProjectStats,
};
