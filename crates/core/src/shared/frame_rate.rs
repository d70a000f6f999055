use std::fmt;

use thiserror::Error;

use crate::shared::constants::MAX_FRAME_RATE_FRACTION_DIGITS;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum FrameRateError {
    #[error("frame rate must be finite and positive, got {0}")]
    NotPositive(f32),
    #[error("frame rate {0} does not fit a 32-bit fraction")]
    Overflow(f32),
}

/// Frame rate as a reduced fraction, as hosts expect it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Derives a fraction from the floating-point rate reported by an engine.
    ///
    /// The rate is rendered as its shortest decimal string (at most
    /// `MAX_FRAME_RATE_FRACTION_DIGITS` fractional digits), the digit count picks
    /// a power-of-ten denominator and the pair is reduced by its GCD. This is
    /// best-effort: 23.976 becomes 2997/125, not the NTSC 24000/1001.
    pub fn from_decimal(rate: f32) -> Result<Self, FrameRateError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(FrameRateError::NotPositive(rate));
        }

        let text = decimal_text(rate);
        let (integer_part, fraction_part) = text.split_once('.').unwrap_or((text.as_str(), ""));

        let overflow = || FrameRateError::Overflow(rate);
        let denominator = 10u64
            .checked_pow(fraction_part.len() as u32)
            .ok_or_else(overflow)?;
        let integer: u64 = integer_part.parse().map_err(|_| overflow())?;
        let fraction: u64 = if fraction_part.is_empty() {
            0
        } else {
            fraction_part.parse().map_err(|_| overflow())?
        };
        let numerator = integer
            .checked_mul(denominator)
            .and_then(|n| n.checked_add(fraction))
            .ok_or_else(overflow)?;

        if numerator == 0 {
            return Err(FrameRateError::NotPositive(rate));
        }

        let divisor = gcd(numerator, denominator);
        Ok(Self {
            numerator: u32::try_from(numerator / divisor).map_err(|_| overflow())?,
            denominator: u32::try_from(denominator / divisor).map_err(|_| overflow())?,
        })
    }

    pub fn as_f64(&self) -> f64 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f64 / self.denominator as f64
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Shortest round-trip decimal, falling back to a fixed precision when the
/// expansion is longer than the allowed fractional digits.
fn decimal_text(rate: f32) -> String {
    let shortest = rate.to_string();
    let digits = shortest.split_once('.').map_or(0, |(_, frac)| frac.len());
    if digits <= MAX_FRAME_RATE_FRACTION_DIGITS {
        return shortest;
    }
    let fixed = format!("{rate:.prec$}", prec = MAX_FRAME_RATE_FRACTION_DIGITS);
    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}
