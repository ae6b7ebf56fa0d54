//! # Amounts
//!
//! Fixed-point token amounts with 8 decimal places, stored as whole satoshis.
//!
//! ```text
//! 1 coin = 100,000,000 sat
//! 0.1 coin per block × 61 blocks = 6.10000000
//! ```

use crate::constants::COIN;
use crate::EconomicsError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Token amount in satoshis
///
/// Human-readable encodings (JSON, TOML) use the decimal form `"6.10000000"`;
/// binary encodings use the raw `i64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub const fn from_sat(sat: i64) -> Self {
        Self(sat)
    }

    pub const fn sat(&self) -> i64 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn checked_mul(self, factor: i64) -> Option<Amount> {
        self.0.checked_mul(factor).map(Self)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let coin = COIN as u64;
        write!(f, "{}{}.{:08}", sign, abs / coin, abs % coin)
    }
}

impl FromStr for Amount {
    type Err = EconomicsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EconomicsError::InvalidAmount(s.to_string());

        let (negative, body) = match s.trim().strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.trim()),
        };
        let (whole, frac) = body.split_once('.').unwrap_or((body, ""));

        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > 8 || !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac: i64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<8}", frac).parse().map_err(|_| invalid())?
        };

        let sat = whole
            .checked_mul(COIN)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(invalid)?;

        Ok(Self(if negative { -sat } else { sat }))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_i64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(D::Error::custom)
        } else {
            i64::deserialize(deserializer).map(Self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_has_eight_decimals() {
        assert_eq!(Amount::from_sat(610_000_000).to_string(), "6.10000000");
        assert_eq!(Amount::from_sat(10_000_000).to_string(), "0.10000000");
        assert_eq!(Amount::ZERO.to_string(), "0.00000000");
        assert_eq!(Amount::from_sat(-1).to_string(), "-0.00000001");
    }

    #[test]
    fn test_parse() {
        assert_eq!("0.1".parse::<Amount>().unwrap(), Amount::from_sat(10_000_000));
        assert_eq!("6.10000000".parse::<Amount>().unwrap(), Amount::from_sat(610_000_000));
        assert_eq!("6".parse::<Amount>().unwrap(), Amount::from_sat(600_000_000));
        assert_eq!(".5".parse::<Amount>().unwrap(), Amount::from_sat(50_000_000));
        assert_eq!("-2.5".parse::<Amount>().unwrap(), Amount::from_sat(-250_000_000));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Amount>().is_err());
        assert!(".".parse::<Amount>().is_err());
        assert!("1.123456789".parse::<Amount>().is_err());
        assert!("1e5".parse::<Amount>().is_err());
        assert!("99999999999999999999".parse::<Amount>().is_err());
    }

    #[test]
    fn test_accrual_arithmetic() {
        let per_block = Amount::from_sat(10_000_000);
        let pool = per_block.checked_mul(61).unwrap();

        assert_eq!(pool.to_string(), "6.10000000");
        assert_eq!(pool.checked_sub(pool).unwrap(), Amount::ZERO);
        assert!(Amount::from_sat(i64::MAX).checked_add(per_block).is_none());
    }

    #[test]
    fn test_serde_forms() {
        let amount = Amount::from_sat(610_000_000);

        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"6.10000000\"");
        assert_eq!(serde_json::from_str::<Amount>("\"0.1\"").unwrap(), Amount::from_sat(10_000_000));

        let bytes = bincode::serialize(&amount).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bincode::deserialize::<Amount>(&bytes).unwrap(), amount);
    }
}
