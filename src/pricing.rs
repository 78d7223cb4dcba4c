//! Pure pricing math. No I/O, no state; all functions are total and
//! return 0.0 instead of panicking on degenerate inputs.

use alloy_primitives::U256;

use crate::models::PoolStateData;

/// 2^96 as f64, the Uniswap V3 sqrt-price fixed-point scale.
const Q96: f64 = 79228162514264337593543950336.0;

/// Lossy widening conversion; fine for pricing, which is f64 end to end.
fn u256_to_f64(v: U256) -> f64 {
    v.as_limbs()
        .iter()
        .rev()
        .fold(0.0, |acc, &limb| acc * 18446744073709551616.0 + limb as f64)
}

fn decimal_factor(exp: i32) -> f64 {
    10f64.powi(exp)
}

/// Spot price of the target leg in units of the other leg, from a V3
/// sqrt price. `(sqrtPriceX96 / 2^96)^2` is token1 per token0 in base
/// units; the result is decimal-adjusted to human units.
pub fn v3_spot_price(
    sqrt_price_x96: U256,
    target_is_token0: bool,
    decimals0: u8,
    decimals1: u8,
) -> f64 {
    let sp = u256_to_f64(sqrt_price_x96) / Q96;
    if sp <= 0.0 {
        return 0.0;
    }
    let raw = sp * sp;
    let price0_in_1 = raw * decimal_factor(decimals0 as i32 - decimals1 as i32);
    if target_is_token0 {
        price0_in_1
    } else if price0_in_1 > 0.0 {
        1.0 / price0_in_1
    } else {
        0.0
    }
}

/// Spot price of the target leg in units of the other leg, from V2
/// reserves.
pub fn v2_spot_price(
    reserve0: U256,
    reserve1: U256,
    target_is_token0: bool,
    decimals0: u8,
    decimals1: u8,
) -> f64 {
    let r0 = u256_to_f64(reserve0) / decimal_factor(decimals0 as i32);
    let r1 = u256_to_f64(reserve1) / decimal_factor(decimals1 as i32);
    let (target, quote) = if target_is_token0 { (r0, r1) } else { (r1, r0) };
    if target <= 0.0 {
        return 0.0;
    }
    quote / target
}

/// Spot price of the target leg for any observed pool state.
pub fn spot_price(
    data: &PoolStateData,
    target_is_token0: bool,
    decimals0: u8,
    decimals1: u8,
) -> f64 {
    match (data.reserve0, data.reserve1) {
        (Some(r0), Some(r1)) => v2_spot_price(r0, r1, target_is_token0, decimals0, decimals1),
        _ => v3_spot_price(data.sqrt_price_x96, target_is_token0, decimals0, decimals1),
    }
}

/// USD value locked in a V2 pool: both reserves at their USD prices.
pub fn v2_liquidity_usd(
    reserve0: U256,
    reserve1: U256,
    decimals0: u8,
    decimals1: u8,
    price0_usd: f64,
    price1_usd: f64,
) -> f64 {
    let r0 = u256_to_f64(reserve0) / decimal_factor(decimals0 as i32);
    let r1 = u256_to_f64(reserve1) / decimal_factor(decimals1 as i32);
    r0 * price0_usd.max(0.0) + r1 * price1_usd.max(0.0)
}

/// USD liquidity approximation for a V3 pool: `L * 2 * sqrt(p0 * p1)`,
/// normalized by the geometric mean of the token decimal scales. An
/// order-of-magnitude indicator, not an accounting figure.
pub fn v3_liquidity_usd(
    liquidity: U256,
    decimals0: u8,
    decimals1: u8,
    price0_usd: f64,
    price1_usd: f64,
) -> f64 {
    let l = u256_to_f64(liquidity) / decimal_factor((decimals0 as i32 + decimals1 as i32) / 2);
    let product = price0_usd * price1_usd;
    if product <= 0.0 {
        return 0.0;
    }
    l * 2.0 * product.sqrt()
}

/// USD liquidity for any observed pool state.
pub fn liquidity_usd(
    data: &PoolStateData,
    decimals0: u8,
    decimals1: u8,
    price0_usd: f64,
    price1_usd: f64,
) -> f64 {
    match (data.reserve0, data.reserve1) {
        (Some(r0), Some(r1)) => {
            v2_liquidity_usd(r0, r1, decimals0, decimals1, price0_usd, price1_usd)
        }
        _ => v3_liquidity_usd(data.liquidity, decimals0, decimals1, price0_usd, price1_usd),
    }
}

/// Raw price scalar used only for tier delta comparison. Not decimal
/// adjusted; the scheduler compares consecutive values of the same pool,
/// so the constant factor cancels out.
pub fn tier_price_scalar(data: &PoolStateData) -> f64 {
    if data.sqrt_price_x96 > U256::ZERO {
        let sp = u256_to_f64(data.sqrt_price_x96) / Q96;
        return sp * sp;
    }
    match (data.reserve0, data.reserve1) {
        (Some(r0), Some(r1)) if r0 > U256::ZERO => u256_to_f64(r1) / u256_to_f64(r0),
        _ => 0.0,
    }
}
