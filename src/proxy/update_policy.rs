use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ProxyError;

const MINUTE_MILLIS: u64 = 60 * 1000;
const DAY_MINUTES: u64 = 24 * 60;

/// How long a locally held copy of a proxied item is considered fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum UpdatePolicy {
    Never,
    Always,
    Daily,
    Interval { minutes: u64 },
}

impl UpdatePolicy {
    pub fn max_age_millis(&self) -> Option<u64> {
        match self {
            UpdatePolicy::Never => None,
            UpdatePolicy::Always => Some(0),
            UpdatePolicy::Daily => Some(DAY_MINUTES * MINUTE_MILLIS),
            UpdatePolicy::Interval { minutes } => Some(minutes * MINUTE_MILLIS),
        }
    }

    pub fn is_stale(&self, last_check_millis: u64, now_millis: u64) -> bool {
        match self {
            UpdatePolicy::Never => false,
            UpdatePolicy::Always => true,
            _ => match self.max_age_millis() {
                Some(max_age) => now_millis.saturating_sub(last_check_millis) > max_age,
                None => false,
            },
        }
    }
}

impl FromStr for UpdatePolicy {
    type Err = ProxyError;

    /// `never`, `always` (or `now`), `daily`, `interval:<minutes>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "never" => Ok(UpdatePolicy::Never),
            "always" | "now" => Ok(UpdatePolicy::Always),
            "daily" => Ok(UpdatePolicy::Daily),
            other => other.strip_prefix("interval:")
                .and_then(|m| m.trim().parse::<u64>().ok())
                .map(|minutes| UpdatePolicy::Interval { minutes })
                .ok_or_else(|| ProxyError::InvalidArgument(format!("not a valid update policy: {:?}", other))),
        }
    }
}

impl TryFrom<String> for UpdatePolicy {
    type Error = ProxyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for UpdatePolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdatePolicy::Never => f.write_str("never"),
            UpdatePolicy::Always => f.write_str("always"),
            UpdatePolicy::Daily => f.write_str("daily"),
            UpdatePolicy::Interval { minutes } => write!(f, "interval:{}", minutes),
        }
    }
}
