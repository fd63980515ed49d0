//! Small bit-manipulation helpers shared by the encoders.

use std::ops::{BitAnd, Shl, Shr};

use num::Integer;

/// All-ones pattern covering the n_bits least significant bits.
/// Callers keep n_bits below the word width.
pub fn mask<T>(n_bits: T) -> T
where
    T: Integer + Shl<Output = T>,
{
    (T::one() << n_bits) - T::one()
}

/// Pull bits high..=low out of value, shifted down so the lowest
/// requested bit lands at position zero
pub fn extract_field<T>(value: T, high: T, low: T) -> T
where
    T: Copy + Integer + Shl<Output = T> + Shr<Output = T> + BitAnd<Output = T>,
{
    (value >> low) & mask(high - low + T::one())
}

/// Round value up to the next multiple of 16 (stack quantum)
pub fn round_up16(value: u64) -> u64 {
    (value + 15) / 16 * 16
}
