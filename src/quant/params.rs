//! Corpus-derived quantization parameters.
//!
//! [`compute_quantization_params`] picks `reduced_dims` source coordinates
//! according to a [`ReductionPolicy`], records each one's `[min, max]` over the
//! corpus, and from then on maps any embedding to `bits`-wide integer codes with
//! a fixed affine transform. The result is a pure function of its inputs.

use serde::{Deserialize, Serialize};

use super::{MAX_BITS_PER_DIM, MAX_KEY_BITS};
use crate::error::{Error, Result};

/// Which source coordinates participate in the reduced space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionPolicy {
    /// The lowest-index `reduced_dims` coordinates.
    #[default]
    First,
    /// The `reduced_dims` coordinates with the largest corpus variance, ties to
    /// the lower index, kept in ascending index order.
    HighestVariance,
}

impl ReductionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::HighestVariance => "highest_variance",
        }
    }
}

impl std::fmt::Display for ReductionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReductionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "first" => Ok(Self::First),
            "highest_variance" | "variance" => Ok(Self::HighestVariance),
            _ => Err(format!("unknown reduction policy: {s}")),
        }
    }
}

/// Knobs for [`compute_quantization_params`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantOptions {
    pub reduced_dims: usize,
    pub bits: u32,
    pub policy: ReductionPolicy,
}

impl Default for QuantOptions {
    fn default() -> Self {
        Self {
            reduced_dims: 8,
            bits: 8,
            policy: ReductionPolicy::First,
        }
    }
}

/// Observed value range of one selected coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimRange {
    pub min: f32,
    pub max: f32,
}

/// The mapping from embeddings to per-dimension integer codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationParams {
    pub reduced_dims: usize,
    pub bits_per_dim: u32,
    pub policy: ReductionPolicy,
    /// Dimensionality of the corpus the params were derived from.
    pub source_dims: usize,
    /// Selected source coordinate indices, in interleave order.
    pub dims: Vec<usize>,
    /// `ranges[i]` belongs to `dims[i]`.
    pub ranges: Vec<DimRange>,
}

/// The federation-wide params record as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredQuantParams {
    pub params: QuantizationParams,
    /// Starts at 1, bumped on every recomputation.
    pub version: u64,
    /// RFC 3339 timestamp of the last recomputation.
    pub updated_at: String,
}

/// Derive quantization params from a representative corpus.
pub fn compute_quantization_params(
    embeddings: &[Vec<f32>],
    options: QuantOptions,
) -> Result<QuantizationParams> {
    validate_options(options)?;

    let first = embeddings
        .first()
        .ok_or_else(|| Error::invalid("cannot derive quantization params from an empty corpus"))?;
    let source_dims = first.len();

    for (i, e) in embeddings.iter().enumerate() {
        if e.len() != source_dims {
            return Err(Error::invalid(format!(
                "embedding {i} has {} dimensions, expected {source_dims}",
                e.len()
            )));
        }
        if e.iter().any(|x| !x.is_finite()) {
            return Err(Error::invalid(format!(
                "embedding {i} contains a non-finite coordinate"
            )));
        }
    }

    if options.reduced_dims > source_dims {
        return Err(Error::invalid(format!(
            "reduced_dims ({}) exceeds embedding dimensionality ({source_dims})",
            options.reduced_dims
        )));
    }

    let dims = select_dims(embeddings, source_dims, options);
    let ranges = dims
        .iter()
        .map(|&d| {
            let mut min = f32::INFINITY;
            let mut max = f32::NEG_INFINITY;
            for e in embeddings {
                min = min.min(e[d]);
                max = max.max(e[d]);
            }
            DimRange { min, max }
        })
        .collect();

    Ok(QuantizationParams {
        reduced_dims: options.reduced_dims,
        bits_per_dim: options.bits,
        policy: options.policy,
        source_dims,
        dims,
        ranges,
    })
}

fn validate_options(options: QuantOptions) -> Result<()> {
    if options.reduced_dims == 0 {
        return Err(Error::invalid("reduced_dims must be at least 1"));
    }
    if options.bits == 0 || options.bits > MAX_BITS_PER_DIM {
        return Err(Error::invalid(format!(
            "bits per dimension must be in 1..={MAX_BITS_PER_DIM}, got {}",
            options.bits
        )));
    }
    let width = options.reduced_dims as u64 * u64::from(options.bits);
    if width > u64::from(MAX_KEY_BITS) {
        return Err(Error::invalid(format!(
            "key width {width} bits exceeds the {MAX_KEY_BITS}-bit maximum"
        )));
    }
    Ok(())
}

fn select_dims(embeddings: &[Vec<f32>], source_dims: usize, options: QuantOptions) -> Vec<usize> {
    match options.policy {
        ReductionPolicy::First => (0..options.reduced_dims).collect(),
        ReductionPolicy::HighestVariance => {
            let n = embeddings.len() as f64;
            let mut variances: Vec<(usize, f64)> = (0..source_dims)
                .map(|d| {
                    let mean = embeddings.iter().map(|e| f64::from(e[d])).sum::<f64>() / n;
                    let var = embeddings
                        .iter()
                        .map(|e| (f64::from(e[d]) - mean).powi(2))
                        .sum::<f64>()
                        / n;
                    (d, var)
                })
                .collect();
            // Stable sort keeps lower indices first among equal variances.
            variances.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            let mut dims: Vec<usize> = variances
                .into_iter()
                .take(options.reduced_dims)
                .map(|(d, _)| d)
                .collect();
            dims.sort_unstable();
            dims
        }
    }
}

impl QuantizationParams {
    /// Width of a Morton key under these params, in bits.
    pub fn key_bits(&self) -> u32 {
        self.reduced_dims as u32 * self.bits_per_dim
    }

    /// Largest code a single dimension can take.
    pub fn max_code(&self) -> u32 {
        (1u32 << self.bits_per_dim) - 1
    }

    /// Minimum embedding length these params can read from.
    pub fn required_len(&self) -> usize {
        self.dims.iter().max().map_or(0, |&d| d + 1)
    }

    /// Quantize the selected coordinates of `embedding` to per-dimension codes.
    ///
    /// Fails on embeddings too short for the selected indices instead of
    /// truncating.
    pub fn quantize(&self, embedding: &[f32]) -> Result<Vec<u32>> {
        let required = self.required_len();
        if embedding.len() < required {
            return Err(Error::invalid(format!(
                "embedding has {} dimensions, params require at least {required}",
                embedding.len()
            )));
        }

        let levels = f64::from(self.max_code());
        self.dims
            .iter()
            .zip(&self.ranges)
            .map(|(&d, range)| {
                let x = embedding[d];
                if !x.is_finite() {
                    return Err(Error::invalid(format!("coordinate {d} is not finite")));
                }
                Ok(quantize_value(x, *range, levels))
            })
            .collect()
    }
}

/// Affine map into `[0, levels]`. A degenerate range maps everything to 0.
fn quantize_value(x: f32, range: DimRange, levels: f64) -> u32 {
    let (min, max) = (f64::from(range.min), f64::from(range.max));
    if max <= min {
        return 0;
    }
    let scaled = (f64::from(x) - min) / (max - min) * levels;
    scaled.round().clamp(0.0, levels) as u32
}
