//! Core domain types shared by pricing, charging and billing

use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ChargingError;

/// Decimal places kept on every amount that leaves the engine
pub const MONEY_SCALE: u32 = 2;

/// Round an amount to cents, midpoint away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Monetary amount in a given currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub value: Decimal,
    pub unit: String,
}

impl Money {
    pub fn new(value: Decimal, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    pub fn zero(unit: impl Into<String>) -> Self {
        Self::new(Decimal::ZERO, unit)
    }

    pub fn rounded(&self) -> Self {
        Self::new(round_money(self.value), self.unit.clone())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Calendar unit of a recurring charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Day,
    Week,
    Month,
    Year,
}

impl PeriodUnit {
    fn from_word(word: &str) -> Option<Self> {
        match word.trim().to_ascii_lowercase().as_str() {
            "day" | "days" | "daily" => Some(Self::Day),
            "week" | "weeks" | "weekly" => Some(Self::Week),
            "month" | "months" | "monthly" => Some(Self::Month),
            "year" | "years" | "yearly" | "annual" | "annually" => Some(Self::Year),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

/// Length of one recurring charge period, e.g. `1 month` or `3 month`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChargePeriod {
    pub unit: PeriodUnit,
    pub length: u32,
}

impl ChargePeriod {
    pub fn new(unit: PeriodUnit, length: u32) -> Self {
        Self {
            unit,
            length: length.max(1),
        }
    }

    pub fn monthly() -> Self {
        Self::new(PeriodUnit::Month, 1)
    }

    /// Move `date` forward by `n` whole periods.
    ///
    /// Month and year steps clamp to the last day of the target month.
    pub fn advance(&self, date: DateTime<Utc>, n: u32) -> DateTime<Utc> {
        let steps = self.length.saturating_mul(n);
        let advanced = match self.unit {
            PeriodUnit::Day => date.checked_add_signed(Duration::days(i64::from(steps))),
            PeriodUnit::Week => date.checked_add_signed(Duration::weeks(i64::from(steps))),
            PeriodUnit::Month => date.checked_add_months(Months::new(steps)),
            PeriodUnit::Year => date.checked_add_months(Months::new(steps.saturating_mul(12))),
        };
        advanced.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whole periods completed between `since` and `now`.
    pub fn periods_elapsed(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
        let mut count = 0;
        while count < u32::MAX && self.advance(since, count + 1) <= now {
            count += 1;
        }
        count
    }

    /// Interval covered by `n` periods starting at `start`.
    pub fn coverage(&self, start: DateTime<Utc>, n: u32) -> (DateTime<Utc>, DateTime<Utc>) {
        (start, self.advance(start, n))
    }
}

impl fmt::Display for ChargePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.length, self.unit.as_str())
    }
}

impl FromStr for ChargePeriod {
    type Err = ChargingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ChargingError::Validation(format!("invalid charge period '{}'", s));
        let mut parts = s.split_whitespace();
        let first = parts.next().ok_or_else(invalid)?;

        let period = match first.parse::<u32>() {
            Ok(length) => {
                let unit = parts.next().and_then(PeriodUnit::from_word).ok_or_else(invalid)?;
                if length == 0 {
                    return Err(invalid());
                }
                Self::new(unit, length)
            }
            Err(_) => Self::new(PeriodUnit::from_word(first).ok_or_else(invalid)?, 1),
        };

        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(period)
    }
}

impl TryFrom<String> for ChargePeriod {
    type Error = ChargingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChargePeriod> for String {
    fn from(period: ChargePeriod) -> Self {
        period.to_string()
    }
}
