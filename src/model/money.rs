//! Fixed-point money representation.
//!
//! All amounts in the system are whole cents stored in an `i64`. External
//! sources are loose about amounts (JSON numbers, sometimes numeric
//! strings); the serde implementation here is the single normalization
//! boundary that converts either form into cents exactly once. Nothing past
//! this type ever branches on representation.

use crate::errors::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

/// An amount of money in whole cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    /// Zero dollars.
    pub const ZERO: Self = Self(0);

    /// Constructs from a cent count.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// The raw cent count.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Constructs from a floating-point dollar amount, rounding to the
    /// nearest cent. Used at the wire boundary only.
    ///
    /// # Errors
    /// Returns [`Error::InvalidAmount`] when the value is not finite.
    pub fn from_dollars(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(Error::InvalidAmount {
                value: value.to_string(),
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self((value * 100.0).round() as i64))
    }

    /// The amount as floating-point dollars, for the wire form.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_dollars(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Whether the amount is strictly negative.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Adds two amounts, rejecting `i64` overflow.
    ///
    /// # Errors
    /// Returns [`Error::InvalidAmount`] when the sum is not representable.
    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or_else(|| Error::InvalidAmount {
                value: format!("{self} + {rhs}"),
            })
    }

    /// Subtracts two amounts, rejecting `i64` overflow.
    ///
    /// # Errors
    /// Returns [`Error::InvalidAmount`] when the difference is not
    /// representable.
    pub fn checked_sub(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_sub(rhs.0)
            .map(Self)
            .ok_or_else(|| Error::InvalidAmount {
                value: format!("{self} - {rhs}"),
            })
    }
}

// Operator sums saturate at the i64 bounds instead of wrapping; call sites
// that must surface overflow use `checked_add`/`checked_sub`.
impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Money {
    type Err = Error;

    /// Parses a decimal dollar string such as `"12"`, `"12.5"`, `"-3.07"`.
    /// At most two fractional digits are accepted; amounts are exact, never
    /// rounded through floats.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidAmount {
            value: s.to_string(),
        };
        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (dollars_part, cents_part) = match body.split_once('.') {
            Some((d, c)) => (d, c),
            None => (body, ""),
        };
        if dollars_part.is_empty() && cents_part.is_empty() {
            return Err(invalid());
        }
        let dollars: i64 = if dollars_part.is_empty() {
            0
        } else {
            dollars_part.parse().map_err(|_| invalid())?
        };
        let cents: i64 = match cents_part.len() {
            0 => 0,
            1 => cents_part.parse::<i64>().map_err(|_| invalid())? * 10,
            2 => cents_part.parse().map_err(|_| invalid())?,
            _ => return Err(invalid()),
        };
        let total = dollars
            .checked_mul(100)
            .and_then(|scaled| scaled.checked_add(cents))
            .ok_or_else(invalid)?;
        Ok(Self(if negative { -total } else { total }))
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_dollars())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Self::from_dollars(value).map_err(serde::de::Error::custom),
            Raw::Text(value) => value.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_whole_and_fractional() {
        assert_eq!("12".parse::<Money>().unwrap(), Money::from_cents(1200));
        assert_eq!("12.5".parse::<Money>().unwrap(), Money::from_cents(1250));
        assert_eq!("12.34".parse::<Money>().unwrap(), Money::from_cents(1234));
        assert_eq!("-3.07".parse::<Money>().unwrap(), Money::from_cents(-307));
        assert_eq!(".50".parse::<Money>().unwrap(), Money::from_cents(50));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());
        assert!("1.234".parse::<Money>().is_err());
        assert!("1.2.3".parse::<Money>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(33500).to_string(), "335.00");
        assert_eq!(Money::from_cents(-5).to_string(), "-0.05");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(500);
        let b = Money::from_cents(125);
        assert_eq!(a + b, Money::from_cents(625));
        assert_eq!(a - b, Money::from_cents(375));
        assert_eq!(-a, Money::from_cents(-500));
        let total: Money = [a, b, b].into_iter().sum();
        assert_eq!(total, Money::from_cents(750));
    }

    #[test]
    fn test_checked_arithmetic_reports_overflow() {
        let max = Money::from_cents(i64::MAX);
        assert!(max.checked_add(Money::from_cents(1)).is_err());
        assert!(
            Money::from_cents(i64::MIN)
                .checked_sub(Money::from_cents(1))
                .is_err()
        );
        assert_eq!(
            Money::from_cents(1).checked_add(Money::from_cents(2)).unwrap(),
            Money::from_cents(3)
        );
    }

    #[test]
    fn test_operator_sums_saturate() {
        let max = Money::from_cents(i64::MAX);
        assert_eq!(max + Money::from_cents(1), max);
        assert_eq!(
            Money::from_cents(i64::MIN) - Money::from_cents(1),
            Money::from_cents(i64::MIN)
        );
    }

    #[test]
    fn test_parse_rejects_overflowing_amounts() {
        // parses as i64 dollars but does not fit in cents
        assert!("92233720368547758".parse::<Money>().is_err());
    }

    #[test]
    fn test_deserialize_number_or_string() {
        let from_number: Money = serde_json::from_str("12.34").unwrap();
        let from_string: Money = serde_json::from_str("\"12.34\"").unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_number, Money::from_cents(1234));
    }

    #[test]
    fn test_serialize_as_number() {
        let json = serde_json::to_string(&Money::from_cents(1250)).unwrap();
        assert_eq!(json, "12.5");
    }

    #[test]
    fn test_from_dollars_rejects_non_finite() {
        assert!(Money::from_dollars(f64::NAN).is_err());
        assert!(Money::from_dollars(f64::INFINITY).is_err());
    }
}
