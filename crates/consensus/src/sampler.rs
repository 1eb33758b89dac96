//! Stochastic mining-delay sampler.
//!
//! A mining attempt succeeds per virtual millisecond-step with probability
//! `p = 1/difficulty`, scaled by the node's mining power, so the waiting
//! time is geometric:
//!
//! ```text
//! delay = floor( ln(u) / ln(1 - p) / mining_power )      u ~ Uniform(0, 1)
//! ```
//!
//! For realistic difficulties `p` is far below what f64 can handle:
//! `ln(1 - p)` evaluated in doubles rounds to `-p` and then to zero,
//! turning the division into garbage or a panic. The denominator is
//! therefore computed on exact rationals via the Mercator series
//! `ln(1 - p) = -(p + p²/2 + p³/3 + …)`, truncated once terms fall 25
//! decimal digits below `p`. The numerator `ln(u)` is safe in f64 (u is
//! never subnormal in practice) and is lifted exactly into the rational
//! domain for the division.

use crate::ConsensusError;
use num_bigint::{BigInt, BigUint};
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Relative precision of the series truncation, in decimal digits.
const LN_PRECISION_DIGITS: u32 = 25;

/// Hard cap on series terms; reached only for p close to 1 (tiny
/// difficulties), where ~90 terms already give 25 digits.
const LN_MAX_TERMS: u32 = 256;

/// Draw the waiting time, in virtual ms, of one mining attempt.
///
/// Fails when the parameters put the sampler outside its domain: zero
/// difficulty or power, a success probability at or below `2^-70`, or a
/// delay that does not fit the virtual clock.
pub fn sample_mining_delay(
    difficulty: &BigUint,
    mining_power: u64,
    rng: &mut ChaCha8Rng,
) -> Result<u64, ConsensusError> {
    if difficulty.is_zero() {
        return Err(ConsensusError::ZeroDifficulty);
    }
    if mining_power == 0 {
        return Err(ConsensusError::ZeroMiningPower);
    }
    if *difficulty >= BigUint::one() << 70u32 {
        return Err(ConsensusError::VanishingSuccessProbability {
            difficulty: difficulty.clone(),
        });
    }

    let u = rng.gen::<f64>();
    if u <= 0.0 {
        return Err(ConsensusError::LnOutOfDomain(u));
    }
    // Exact: ln(u) is a finite f64 and from_float is lossless.
    let ln_u = BigRational::from_float(u.ln()).ok_or(ConsensusError::LnOutOfDomain(u))?;

    let p = BigRational::new(BigInt::one(), BigInt::from(difficulty.clone()));
    let ln_one_minus_p = ln_one_minus(&p);

    let attempts = ln_u / ln_one_minus_p;
    let delay = attempts / BigRational::from_integer(BigInt::from(mining_power));

    delay
        .floor()
        .to_integer()
        .to_u64()
        .ok_or(ConsensusError::DelayOverflow)
}

/// `ln(1 - p)` for `p` in `(0, 1)`, on exact rationals.
///
/// Mercator series, truncated at a relative error of
/// [`LN_PRECISION_DIGITS`] digits. The leading term is `-p`, so the
/// truncation threshold is `p / 10^digits`.
fn ln_one_minus(p: &BigRational) -> BigRational {
    debug_assert!(p.is_positive() && *p < BigRational::one());

    let tolerance = p / BigRational::from_integer(BigInt::from(10u8).pow(LN_PRECISION_DIGITS));
    let mut sum = p.clone();
    let mut power = p.clone();
    for k in 2..=LN_MAX_TERMS {
        power = &power * p;
        let term = &power / BigRational::from_integer(BigInt::from(k));
        if term < tolerance {
            break;
        }
        sum += term;
    }
    -sum
}
