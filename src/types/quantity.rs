//! Resource quantities in Kubernetes notation.
//!
//! A quantity is a decimal number followed by an optional suffix:
//!
//! - binary SI: `Ki`, `Mi`, `Gi`, `Ti`, `Pi`, `Ei`
//! - decimal SI: `n`, `u`, `m`, `k`, `M`, `G`, `T`, `P`, `E`
//! - decimal exponent: `e3`, `E-2`
//!
//! Quantities keep the string they were written as (that is what gets written
//! back to the store) but compare by resolved value, held exactly as an
//! integer count of nano-units. `"1000m"` and `"1"` are equal; so are `"1Ki"`
//! and `"1024"`. Values finer than one nano-unit are rounded up.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const NANOS_PER_UNIT: i128 = 1_000_000_000;

/// Largest decimal exponent accepted in `e<N>` notation.
const MAX_EXPONENT: u32 = 30;

/// Errors from parsing a quantity string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,

    #[error("invalid number in quantity {0:?}")]
    InvalidNumber(String),

    #[error("unknown suffix {suffix:?} in quantity {input:?}")]
    UnknownSuffix { input: String, suffix: String },

    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),
}

/// A resource quantity such as `4`, `500m` or `8Gi`.
#[derive(Debug, Clone)]
pub struct Quantity {
    repr: String,
    nanos: i128,
}

impl Quantity {
    /// The zero quantity, written as `"0"`.
    pub fn zero() -> Self {
        Quantity {
            repr: "0".to_string(),
            nanos: 0,
        }
    }

    /// Parses a quantity string.
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, unsigned) = match trimmed.as_bytes()[0] {
            b'-' => (true, &trimmed[1..]),
            b'+' => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let number_end = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_end);

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if (int_part.is_empty() && frac_part.is_empty()) || frac_part.contains('.') {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }

        let out_of_range = || QuantityError::OutOfRange(input.to_string());

        let mut mantissa: i128 = 0;
        for digit in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(digit - b'0')))
                .ok_or_else(out_of_range)?;
        }

        let (factor_num, factor_den) = suffix_factor(suffix).map_err(|e| match e {
            SuffixError::Unknown => QuantityError::UnknownSuffix {
                input: input.to_string(),
                suffix: suffix.to_string(),
            },
            SuffixError::OutOfRange => out_of_range(),
        })?;

        let scale = u32::try_from(frac_part.len()).map_err(|_| out_of_range())?;
        let numerator = mantissa
            .checked_mul(factor_num)
            .and_then(|n| n.checked_mul(NANOS_PER_UNIT))
            .ok_or_else(out_of_range)?;
        let denominator = 10i128
            .checked_pow(scale)
            .and_then(|d| d.checked_mul(factor_den))
            .ok_or_else(out_of_range)?;

        let magnitude = numerator / denominator + i128::from(numerator % denominator != 0);

        Ok(Quantity {
            repr: trimmed.to_string(),
            nanos: if negative { -magnitude } else { magnitude },
        })
    }

    /// Returns the quantity as originally written.
    pub fn as_str(&self) -> &str {
        &self.repr
    }

    /// Returns the resolved value in nano-units.
    pub fn as_nanos(&self) -> i128 {
        self.nanos
    }

    /// Returns true if the resolved value is zero.
    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }
}

enum SuffixError {
    Unknown,
    OutOfRange,
}

/// Returns the multiplier for a suffix as a `(numerator, denominator)` pair.
fn suffix_factor(suffix: &str) -> Result<(i128, i128), SuffixError> {
    let factor = match suffix {
        "" => (1, 1),
        "n" => (1, 1_000_000_000),
        "u" => (1, 1_000_000),
        "m" => (1, 1_000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        _ => return exponent_factor(suffix),
    };
    Ok(factor)
}

fn exponent_factor(suffix: &str) -> Result<(i128, i128), SuffixError> {
    let Some(exponent) = suffix.strip_prefix(['e', 'E']) else {
        return Err(SuffixError::Unknown);
    };
    let (negative, digits) = match exponent.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, exponent.strip_prefix('+').unwrap_or(exponent)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SuffixError::Unknown);
    }
    let power: u32 = digits.parse().map_err(|_| SuffixError::OutOfRange)?;
    if power > MAX_EXPONENT {
        return Err(SuffixError::OutOfRange);
    }
    let scale = 10i128.pow(power);
    Ok(if negative { (1, scale) } else { (scale, 1) })
}

impl Default for Quantity {
    fn default() -> Self {
        Self::zero()
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quantity::parse(s)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr)
    }
}

// Equality, ordering and hashing all go through the resolved value, exact to
// the nano-unit. Fractions are not rounded to whole units first.
impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Hash for Quantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nanos.hash(state);
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.repr)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

/// Accepts both `"8Gi"` and bare JSON numbers such as `4`.
struct QuantityVisitor;

impl Visitor<'_> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a quantity string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
        Quantity::parse(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
        self.visit_str(&v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
        self.visit_str(&v.to_string())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Quantity, E> {
        self.visit_str(&v.to_string())
    }
}
