// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scale rollover arithmetic.
//!
//! The oracle's rollover rule: a Wind consumes part of the predecessor's
//! remaining scale and opens a successor position whose committed amounts are
//! double the predecessor's. Keeping the arithmetic here keeps it testable
//! without any store or stream wiring.

/// Prices are stored rounded to 9 decimal places.
const PRICE_DECIMALS: f64 = 1e9;

pub fn round_price(price: f64) -> f64 {
    (price * PRICE_DECIMALS).round() / PRICE_DECIMALS
}

/// Amounts committed by a freshly ticked alarm: the pair's minimum base asset
/// threshold at the observed price.
pub fn tick_amounts(min_base_asset_threshold: f64, price: f64) -> (f64, f64) {
    let base = min_base_asset_threshold;
    let quote = round_price(base * price);
    (base, quote)
}

/// Amounts committed by a wind successor: double the predecessor's.
pub fn wind_successor_amounts(
    predecessor_base: f64,
    predecessor_quote: f64,
) -> (f64, f64) {
    (predecessor_base * 2.0, predecessor_quote * 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_price() {
        assert_eq!(round_price(2.5), 2.5);
        assert_eq!(round_price(2.123456789123), 2.123456789);
        assert_eq!(round_price(2.1234567895), 2.12345679);
        assert_eq!(round_price(0.000000001), 0.000000001);
    }

    #[test]
    fn test_tick_amounts() {
        let (base, quote) = tick_amounts(1.0, 2.5);
        assert_eq!(base, 1.0);
        assert_eq!(quote, 2.5);

        let (base, quote) = tick_amounts(0.3, 2.0);
        assert_eq!(base, 0.3);
        assert_eq!(quote, 0.6);
    }

    #[test]
    fn test_wind_successor_doubles() {
        let (base, quote) = wind_successor_amounts(1.0, 2.5);
        assert_eq!(base, 2.0);
        assert_eq!(quote, 5.0);

        // Doubling across a chain of winds grows geometrically
        let (base, quote) = wind_successor_amounts(base, quote);
        assert_eq!(base, 4.0);
        assert_eq!(quote, 10.0);
    }
}
