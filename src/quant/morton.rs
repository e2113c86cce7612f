//! Morton (Z-order) keys.
//!
//! Codes are interleaved round-robin across dimensions, most significant bit
//! first and dimension 0 first, so numerically close keys tend to come from
//! nearby points. The tendency only holds on average: crossing a high-order bit
//! boundary makes a "big jump", so range scans over keys yield candidates that
//! must be re-ranked with a true similarity.

use std::fmt;

use super::params::QuantizationParams;
use super::MAX_KEY_BITS;
use crate::error::{Error, Result};

/// A fixed-width unsigned key, `bits <= 128`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MortonKey {
    value: u128,
    bits: u32,
}

/// Quantize `embedding` under `params` and interleave the codes.
pub fn compute_morton_key_from_embedding(
    embedding: &[f32],
    params: &QuantizationParams,
) -> Result<MortonKey> {
    let codes = params.quantize(embedding)?;
    MortonKey::interleave(&codes, params.bits_per_dim)
}

/// Largest value representable in `bits` bits.
pub fn max_for_width(bits: u32) -> u128 {
    match bits {
        0 => 0,
        b if b >= MAX_KEY_BITS => u128::MAX,
        b => (1u128 << b) - 1,
    }
}

impl MortonKey {
    pub fn new(value: u128, bits: u32) -> Result<Self> {
        if bits == 0 || bits > MAX_KEY_BITS {
            return Err(Error::invalid(format!(
                "key width must be in 1..={MAX_KEY_BITS}, got {bits}"
            )));
        }
        if value > max_for_width(bits) {
            return Err(Error::invalid(format!(
                "value {value:#x} does not fit in {bits} bits"
            )));
        }
        Ok(Self { value, bits })
    }

    /// Build a key from per-dimension codes of `bits_per_dim` bits each.
    pub fn interleave(codes: &[u32], bits_per_dim: u32) -> Result<Self> {
        let bits = codes.len() as u32 * bits_per_dim;
        let mut value = 0u128;
        for b in (0..bits_per_dim).rev() {
            for code in codes {
                value = (value << 1) | u128::from((code >> b) & 1);
            }
        }
        Self::new(value, bits)
    }

    /// Split the key back into `dims` codes.
    pub fn deinterleave(&self, dims: usize) -> Vec<u32> {
        let mut codes = vec![0u32; dims];
        if dims == 0 {
            return codes;
        }
        let bits_per_dim = self.bits / dims as u32;
        let mut pos = self.bits;
        for b in (0..bits_per_dim).rev() {
            for code in codes.iter_mut() {
                pos -= 1;
                let bit = ((self.value >> pos) & 1) as u32;
                *code |= bit << b;
            }
        }
        codes
    }

    pub fn value(&self) -> u128 {
        self.value
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of hex digits in the external form.
    pub fn hex_len(&self) -> usize {
        hex_len(self.bits)
    }

    /// Zero-padded lowercase hex; string order equals numeric order for equal widths.
    pub fn to_hex(&self) -> String {
        format!("{:0width$x}", self.value, width = self.hex_len())
    }

    pub fn from_hex(hex: &str, bits: u32) -> Result<Self> {
        let expected = hex_len(bits);
        if hex.len() != expected {
            return Err(Error::invalid(format!(
                "hex key {hex:?} must have {expected} digits for a {bits}-bit key"
            )));
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::invalid(format!("{hex:?} is not a hex string")));
        }
        let value = u128::from_str_radix(hex, 16)
            .map_err(|e| Error::invalid(format!("bad hex key {hex:?}: {e}")))?;
        Self::new(value, bits)
    }

    /// `self - radius`, flooring at zero.
    pub fn saturating_sub(&self, radius: u128) -> Self {
        Self {
            value: self.value.saturating_sub(radius),
            bits: self.bits,
        }
    }

    /// `self + radius`, capping at the width's maximum.
    pub fn saturating_add(&self, radius: u128) -> Self {
        Self {
            value: self.value.saturating_add(radius).min(max_for_width(self.bits)),
            bits: self.bits,
        }
    }

    /// Closed interval `[self - radius, self + radius]` with both ends clamped.
    pub fn range(&self, radius: u128) -> (Self, Self) {
        (self.saturating_sub(radius), self.saturating_add(radius))
    }
}

impl fmt::Display for MortonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn hex_len(bits: u32) -> usize {
    bits.div_ceil(4) as usize
}
