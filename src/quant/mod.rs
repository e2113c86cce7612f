//! Deterministic embedding quantization and Morton (Z-order) key construction.
//!
//! [`params`] derives the shared [`QuantizationParams`] from a corpus; [`morton`]
//! turns one embedding into a fixed-width, locality-preserving [`MortonKey`].

pub mod morton;
pub mod params;

pub use morton::{compute_morton_key_from_embedding, MortonKey};
pub use params::{
    compute_quantization_params, DimRange, QuantOptions, QuantizationParams, ReductionPolicy,
    StoredQuantParams,
};

/// Widest key a `u128` can hold.
pub const MAX_KEY_BITS: u32 = 128;

/// Widest per-dimension code supported.
pub const MAX_BITS_PER_DIM: u32 = 16;
