//! Decimal context used for every shadow computation.
//!
//! The store keeps its own arbitrary-precision representation; the harness
//! mirrors it with a fixed decimal128-style context so the expected values
//! are computed independently of the server.

use std::{fmt, num::NonZeroU64, str::FromStr};

use bigdecimal::{BigDecimal, ParseBigDecimalError, RoundingMode};
use thiserror::Error;

pub const DECIMAL128_PRECISION: u64 = 34;
pub const DECIMAL128_MAX_EXPONENT: i64 = 6144;
pub const DECIMAL128_MIN_EXPONENT: i64 = -6143;

#[derive(Debug, Error)]
#[error("invalid decimal literal '{literal}'")]
pub struct DecimalError {
    literal: String,
    #[source]
    source: ParseBigDecimalError,
}

/// A value produced under a [`DecimalContext`].
///
/// Unlike IEEE comparison, `NaN == NaN` holds here: two mirrors that both
/// degenerated to not-a-number agree with each other.
#[derive(Debug, Clone, PartialEq)]
pub enum Decimal {
    Finite(BigDecimal),
    NaN,
}

impl Decimal {
    pub fn is_nan(&self) -> bool {
        matches!(self, Decimal::NaN)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decimal::Finite(value) => write!(f, "{value}"),
            Decimal::NaN => f.write_str("NaN"),
        }
    }
}

/// Precision, rounding and exponent bounds shared by all shadow arithmetic.
///
/// Arithmetic never fails: results whose adjusted exponent leaves the
/// configured range, and any operation with a NaN operand, yield
/// [`Decimal::NaN`].
///
/// This is simpler than IEEE decimal128, which keeps subnormals with
/// adjusted exponents down to Etiny (-6176). Here anything below
/// [`DECIMAL128_MIN_EXPONENT`] is NaN. The harness's amounts stay far
/// above that range.
#[derive(Debug, Clone, Copy)]
pub struct DecimalContext {
    precision: NonZeroU64,
    rounding: RoundingMode,
    max_exponent: i64,
    min_exponent: i64,
}

impl Default for DecimalContext {
    fn default() -> Self {
        Self::decimal128()
    }
}

impl DecimalContext {
    /// 34 significant digits, rounding toward zero, exponent in [-6143, 6144].
    pub fn decimal128() -> Self {
        Self {
            precision: NonZeroU64::MIN.saturating_add(DECIMAL128_PRECISION - 1),
            rounding: RoundingMode::Down,
            max_exponent: DECIMAL128_MAX_EXPONENT,
            min_exponent: DECIMAL128_MIN_EXPONENT,
        }
    }

    pub fn zero(&self) -> Decimal {
        Decimal::Finite(BigDecimal::from(0))
    }

    pub fn one(&self) -> Decimal {
        Decimal::Finite(BigDecimal::from(1))
    }

    /// Parses decimal text, accepting `NaN` in any letter case.
    pub fn parse(&self, literal: &str) -> Result<Decimal, DecimalError> {
        let trimmed = literal.trim();
        if trimmed.eq_ignore_ascii_case("nan") {
            return Ok(Decimal::NaN);
        }

        let value = BigDecimal::from_str(trimmed).map_err(|source| DecimalError {
            literal: literal.to_string(),
            source,
        })?;
        Ok(self.round(value))
    }

    pub fn add(&self, lhs: &Decimal, rhs: &Decimal) -> Decimal {
        match (lhs, rhs) {
            (Decimal::Finite(lhs), Decimal::Finite(rhs)) => self.round(lhs + rhs),
            _ => Decimal::NaN,
        }
    }

    pub fn sub(&self, lhs: &Decimal, rhs: &Decimal) -> Decimal {
        match (lhs, rhs) {
            (Decimal::Finite(lhs), Decimal::Finite(rhs)) => self.round(lhs - rhs),
            _ => Decimal::NaN,
        }
    }

    fn round(&self, value: BigDecimal) -> Decimal {
        // with_precision_round pads short values out to the full precision,
        // so only round when there are more digits than the context keeps.
        let rounded = if value.digits() > self.precision.get() {
            value.with_precision_round(self.precision, self.rounding)
        } else {
            value
        };

        if rounded == BigDecimal::from(0) {
            return Decimal::Finite(rounded);
        }

        let (_, scale) = rounded.as_bigint_and_exponent();
        let adjusted = rounded.digits() as i64 - 1 - scale;
        if adjusted > self.max_exponent || adjusted < self.min_exponent {
            return Decimal::NaN;
        }
        Decimal::Finite(rounded)
    }
}
