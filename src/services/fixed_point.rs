//! Exact fixed-point arithmetic for workbook geometry.
//!
//! Tableau stores zone coordinates as integers at a fixed denominator
//! ([`BASE_SCALE`]) and dashboard sizes as plain base-10 numbers. Every
//! recomputation goes through [`Ratio`] so results are bit-reproducible: no
//! floating point is involved anywhere.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Denominator of zone coordinates (`w`, `h`, `x`, `y`).
pub const BASE_SCALE: i128 = 100_000;

/// Longest digit string accepted by [`Decimal::from_str`].
const MAX_DIGITS: usize = 28;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecimalError {
    #[error("empty number")]
    Empty,

    #[error("not a plain base-10 number: {0:?}")]
    Malformed(String),

    #[error("more than 28 digits: {0:?}")]
    TooLong(String),
}

/// An exact rational number `numer / denom` with a non-zero denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratio {
    numer: i128,
    denom: i128,
}

impl Ratio {
    /// Returns `None` when `denom` is zero.
    pub fn new(numer: i128, denom: i128) -> Option<Self> {
        if denom == 0 {
            return None;
        }
        Some(Self { numer, denom })
    }

    pub fn from_integer(value: i128) -> Self {
        Self {
            numer: value,
            denom: 1,
        }
    }

    pub fn checked_mul(self, other: Ratio) -> Option<Ratio> {
        Ratio::new(
            self.numer.checked_mul(other.numer)?,
            self.denom.checked_mul(other.denom)?,
        )
    }

    /// Returns `None` on overflow or when `other` is zero.
    pub fn checked_div(self, other: Ratio) -> Option<Ratio> {
        Ratio::new(
            self.numer.checked_mul(other.denom)?,
            self.denom.checked_mul(other.numer)?,
        )
    }

    /// Round to the nearest integer, ties away from zero.
    pub fn round_half_up(self) -> i128 {
        round_half_up(self.numer, self.denom)
    }
}

/// Round `numer / denom` to zero decimal places, ties away from zero.
///
/// This is decimal `ROUND_HALF_UP`: `5/2 → 3`, `-5/2 → -3`, `7/3 → 2`.
/// A zero denominator yields zero.
pub fn round_half_up(numer: i128, denom: i128) -> i128 {
    if denom == 0 {
        return 0;
    }
    let (numer, denom) = if denom < 0 {
        (-numer, -denom)
    } else {
        (numer, denom)
    };

    let quotient = numer / denom;
    let remainder = numer % denom;

    if remainder.unsigned_abs() * 2 >= denom.unsigned_abs() {
        quotient + numer.signum()
    } else {
        quotient
    }
}

/// A base-10 number as written in a workbook attribute or by the caller.
///
/// The value is `units / 10^scale`. The original number of fractional digits
/// is kept so that [`Display`](fmt::Display) writes back what was parsed
/// (`"2000"` stays `"2000"`, `"12.50"` stays `"12.50"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    units: i128,
    scale: u32,
}

impl Decimal {
    pub fn from_integer(value: i128) -> Self {
        Self {
            units: value,
            scale: 0,
        }
    }

    pub fn is_positive(&self) -> bool {
        self.units > 0
    }

    pub fn to_ratio(self) -> Ratio {
        // scale <= MAX_DIGITS, so 10^scale always fits
        Ratio {
            numer: self.units,
            denom: 10_i128.pow(self.scale),
        }
    }
}

impl FromStr for Decimal {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DecimalError::Empty);
        }

        let (negative, body) = match trimmed.as_bytes()[0] {
            b'-' => (true, &trimmed[1..]),
            b'+' => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let (int_part, frac_part) = match body.split_once('.') {
            Some((int_part, frac_part)) => (int_part, frac_part),
            None => (body, ""),
        };

        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty())
            || !all_digits(int_part)
            || !all_digits(frac_part)
        {
            return Err(DecimalError::Malformed(s.to_string()));
        }

        let digits = format!("{int_part}{frac_part}");
        if digits.trim_start_matches('0').len() > MAX_DIGITS || frac_part.len() > MAX_DIGITS {
            return Err(DecimalError::TooLong(s.to_string()));
        }

        let magnitude = digits
            .bytes()
            .fold(0_i128, |acc, b| acc * 10 + i128::from(b - b'0'));

        Ok(Self {
            units: if negative { -magnitude } else { magnitude },
            scale: frac_part.len() as u32,
        })
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.units);
        }

        let divisor = 10_u128.pow(self.scale);
        let magnitude = self.units.unsigned_abs();
        let sign = if self.units < 0 { "-" } else { "" };
        write!(
            f,
            "{}{}.{:0width$}",
            sign,
            magnitude / divisor,
            magnitude % divisor,
            width = self.scale as usize
        )
    }
}
