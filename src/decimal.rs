//! Fixed-precision decimal helpers.
//!
//! All prices, quantities and ratios in the canonical schema are represented
//! with [`rust_decimal::Decimal`] rather than floating point, at a fixed
//! scale of 8 fractional digits (§3). This module centralizes the rounding
//! rule used to derive fields such as `quote_quantity` so every normalizer
//! rounds identically.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of fractional digits carried by canonical decimal fields.
pub const SCALE: u32 = 8;

/// Round `value` to [`SCALE`] fractional digits using banker's rounding
/// (round half to even), matching Testable Property 3.
pub fn round_scale(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointNearestEven)
}

/// `price * quantity`, rounded half-even to [`SCALE`] digits.
pub fn quote_quantity(price: Decimal, quantity: Decimal) -> Decimal {
    round_scale(price * quantity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quote_quantity_rounds_half_even() {
        // 30000.1 * 0.125 = 3750.0125 exactly -> no rounding needed
        assert_eq!(quote_quantity(dec!(30000.1), dec!(0.125)), dec!(3750.0125));
    }

    #[test]
    fn round_scale_uses_banker_rounding() {
        // 1.000000005 rounds to the nearest even 8th digit: 1.00000000
        assert_eq!(round_scale(dec!(1.000000005)), dec!(1.00000000));
        // 1.000000015 rounds up to 1.00000002 (nearest even)
        assert_eq!(round_scale(dec!(1.000000015)), dec!(1.00000002));
    }
}
