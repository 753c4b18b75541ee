//! Rate limit quotas and their string notation.
//!
//! Quotas are written `<count> per <unit>`, `<count> per <n> <units>` or
//! `<count>/<unit>`. A policy joins quotas with `;`, `,` or ` and `, e.g.
//! `5 per minute;100 per day`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("rate limit policy has no quotas")]
    Empty,
    #[error("cannot parse quota `{0}`")]
    Malformed(String),
    #[error("unknown time unit `{0}`")]
    UnknownUnit(String),
    #[error("quota `{0}` must allow at least one request per non-empty window")]
    Zero(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub window: Duration,
}

const SECOND: u64 = 1;
const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

impl Quota {
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub const fn per_second(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(SECOND))
    }

    pub const fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(MINUTE))
    }

    pub const fn per_hour(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(HOUR))
    }

    pub const fn per_day(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(DAY))
    }
}

fn unit_seconds(unit: &str) -> Option<u64> {
    match unit.trim_end_matches('s') {
        "second" | "sec" => Some(SECOND),
        "minute" | "min" => Some(MINUTE),
        "hour" => Some(HOUR),
        "day" => Some(DAY),
        _ => None,
    }
}

impl FromStr for Quota {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let malformed = || PolicyError::Malformed(raw.to_string());

        let normalized = raw.to_ascii_lowercase().replace('/', " per ");
        let mut words = normalized.split_whitespace();

        let limit: u32 = words
            .next()
            .and_then(|w| w.parse().ok())
            .ok_or_else(malformed)?;
        if words.next() != Some("per") {
            return Err(malformed());
        }

        let (multiplier, unit) = match (words.next(), words.next()) {
            (Some(n), Some(unit)) => (n.parse::<u64>().map_err(|_| malformed())?, unit),
            (Some(unit), None) => (1, unit),
            _ => return Err(malformed()),
        };
        if words.next().is_some() {
            return Err(malformed());
        }

        let seconds =
            unit_seconds(unit).ok_or_else(|| PolicyError::UnknownUnit(unit.to_string()))?;
        let window = seconds.checked_mul(multiplier).ok_or_else(malformed)?;
        let quota = Quota::new(limit, Duration::from_secs(window));
        if quota.limit == 0 || quota.window.is_zero() {
            return Err(PolicyError::Zero(raw.to_string()));
        }
        Ok(quota)
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.window.as_secs();
        let (count, unit) = [(DAY, "day"), (HOUR, "hour"), (MINUTE, "minute")]
            .into_iter()
            .find(|(size, _)| secs >= *size && secs % size == 0)
            .map(|(size, unit)| (secs / size, unit))
            .unwrap_or((secs, "second"));

        if count == 1 {
            write!(f, "{} per {}", self.limit, unit)
        } else {
            write!(f, "{} per {} {}s", self.limit, count, unit)
        }
    }
}

/// Every quota applies at once; a request must fit all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    quotas: Vec<Quota>,
}

impl RateLimitPolicy {
    pub fn new(quotas: Vec<Quota>) -> Result<Self, PolicyError> {
        if quotas.is_empty() {
            return Err(PolicyError::Empty);
        }
        if let Some(zero) = quotas
            .iter()
            .find(|q| q.limit == 0 || q.window.is_zero())
        {
            return Err(PolicyError::Zero(zero.to_string()));
        }
        Ok(Self { quotas })
    }

    pub fn quotas(&self) -> &[Quota] {
        &self.quotas
    }
}

impl FromStr for RateLimitPolicy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let quotas = s
            .to_ascii_lowercase()
            .replace(" and ", ";")
            .split([';', ','])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Quota>, _>>()?;
        Self::new(quotas)
    }
}

impl fmt::Display for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.quotas.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join(";"))
    }
}
