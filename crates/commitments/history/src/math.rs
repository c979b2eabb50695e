//! Integer helpers for tree sizing.

/// Floor of log2. `x` must be non-zero.
pub(crate) const fn log2_floor(x: u64) -> u64 {
    63 - x.leading_zeros() as u64
}

/// Ceiling of log2. `x` must be non-zero.
pub(crate) const fn log2_ceil(x: u64) -> u64 {
    if x <= 1 { 0 } else { log2_floor(x - 1) + 1 }
}

/// The smallest power of two greater than or equal to `n`.
pub(crate) const fn next_power_of_two(n: u64) -> u64 {
    if n == 0 { 1 } else { n.next_power_of_two() }
}
