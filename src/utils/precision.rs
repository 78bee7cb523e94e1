// src/utils/precision.rs
use rust_decimal::{Decimal, RoundingStrategy};

/// Bithumb accepts at most 8 fractional digits for order units.
pub const UNIT_SCALE: u32 = 8;

/// Truncates (never rounds up) an order quantity to the exchange unit scale.
/// Example: 2076.923076923 -> 2076.92307692
pub fn truncate_units(units: Decimal) -> Decimal {
    units.round_dp_with_strategy(UNIT_SCALE, RoundingStrategy::ToZero)
}
