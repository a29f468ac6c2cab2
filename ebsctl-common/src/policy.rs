//! Snapshot retention policy types

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bucket a kept snapshot was assigned to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RetentionClass {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl RetentionClass {
    /// Classes in the order their quotas are filled
    pub const PRIORITY: [RetentionClass; 4] = [
        RetentionClass::Hourly,
        RetentionClass::Daily,
        RetentionClass::Weekly,
        RetentionClass::Monthly,
    ];
}

impl fmt::Display for RetentionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hourly => write!(f, "hourly"),
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
        }
    }
}

/// Monthly retention: a count, or keep every month-start snapshot
///
/// Keeping none is `Count(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMonthly", into = "RawMonthly")]
pub enum MonthlyRetention {
    Count(u32),
    KeepAll,
}

impl MonthlyRetention {
    pub const NONE: MonthlyRetention = MonthlyRetention::Count(0);
}

impl fmt::Display for MonthlyRetention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{}", n),
            Self::KeepAll => write!(f, "all"),
        }
    }
}

impl FromStr for MonthlyRetention {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" | "true" => Ok(Self::KeepAll),
            "none" | "false" => Ok(Self::NONE),
            other => other.parse::<u32>().map(Self::Count).map_err(|_| Error::InvalidArgument {
                option: "monthly".to_string(),
                reason: format!("'{}' must be a positive integer, all/true or none/false", s),
            }),
        }
    }
}

/// Config files may spell monthly retention as a number, a boolean or a word
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawMonthly {
    Count(u32),
    Flag(bool),
    Word(String),
}

impl TryFrom<RawMonthly> for MonthlyRetention {
    type Error = Error;

    fn try_from(raw: RawMonthly) -> Result<Self> {
        match raw {
            RawMonthly::Count(n) => Ok(Self::Count(n)),
            RawMonthly::Flag(true) => Ok(Self::KeepAll),
            RawMonthly::Flag(false) => Ok(Self::NONE),
            RawMonthly::Word(word) => word.parse(),
        }
    }
}

impl From<MonthlyRetention> for RawMonthly {
    fn from(value: MonthlyRetention) -> Self {
        match value {
            MonthlyRetention::Count(n) => RawMonthly::Count(n),
            MonthlyRetention::KeepAll => RawMonthly::Word("all".to_string()),
        }
    }
}

/// How many snapshots of each granularity survive a cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub hourly: u32,
    pub daily: u32,
    pub weekly: u32,
    pub monthly: MonthlyRetention,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            hourly: 0,
            daily: 7,
            weekly: 0,
            monthly: MonthlyRetention::Count(4),
        }
    }
}

impl RetentionPolicy {
    /// Whether `kept` snapshots already fill the quota of `class`
    pub fn is_full(&self, class: RetentionClass, kept: u32) -> bool {
        match class {
            RetentionClass::Hourly => kept >= self.hourly,
            RetentionClass::Daily => kept >= self.daily,
            RetentionClass::Weekly => kept >= self.weekly,
            RetentionClass::Monthly => match self.monthly {
                MonthlyRetention::Count(n) => kept >= n,
                MonthlyRetention::KeepAll => false,
            },
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hourly={} daily={} weekly={} monthly={}",
            self.hourly, self.daily, self.weekly, self.monthly
        )
    }
}
