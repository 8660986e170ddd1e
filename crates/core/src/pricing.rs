//! Load-based surcharge table and fee arithmetic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One band of the surcharge table, inclusive on both ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurchargeTier {
    pub min_load: u8,
    pub max_load: u8,
    pub surcharge_pct: u32,
}

pub const SURCHARGE_TABLE: [SurchargeTier; 3] = [
    SurchargeTier { min_load: 0, max_load: 3, surcharge_pct: 0 },
    SurchargeTier { min_load: 4, max_load: 7, surcharge_pct: 15 },
    SurchargeTier { min_load: 8, max_load: 10, surcharge_pct: 30 },
];

pub fn surcharge_tier(load: u8) -> SurchargeTier {
    SURCHARGE_TABLE
        .iter()
        .copied()
        .find(|tier| load >= tier.min_load && load <= tier.max_load)
        .unwrap_or(SURCHARGE_TABLE[SURCHARGE_TABLE.len() - 1])
}

/// Surcharge as a fraction, e.g. `0.15` for the middle band.
pub fn surcharge_rate(load: u8) -> Decimal {
    Decimal::new(i64::from(surcharge_tier(load).surcharge_pct), 2)
}

pub fn dynamic_price(base_price: Decimal, load: u8) -> Decimal {
    (base_price * (Decimal::ONE + surcharge_rate(load))).normalize()
}

/// Platform fee on an internal charge. `pct` is a percentage (`2.5` means 2.5%).
pub fn platform_fee(internal_amount: Decimal, pct: Decimal) -> Decimal {
    if pct <= Decimal::ZERO || internal_amount <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (internal_amount * pct / Decimal::ONE_HUNDRED).round_dp(6).normalize()
}
