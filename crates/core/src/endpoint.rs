//! Endpoint identity and schema versioning.
//!
//! An endpoint consumes events under a `major.minor` schema version. Patch and
//! build components are accepted when parsing but dropped: only breaking or
//! minor schema changes get their own routed stream and subscription group.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Name of a consuming endpoint (e.g. `"billing-service"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint(String);

impl Endpoint {
    /// Create an endpoint name; surrounding whitespace is trimmed.
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(CoreError::validation("endpoint name must not be empty"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(CoreError::validation(format!(
                "endpoint name must not contain whitespace: {trimmed:?}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.0
    }
}

/// Schema version of an endpoint, truncated to `major.minor`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersion {
    major: u32,
    minor: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for SchemaVersion {
    type Err = CoreError;

    /// Parse `major[.minor[.patch[.build]]]`; anything past `minor` is validated then ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CoreError::invalid_version("empty version"));
        }

        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() > 4 {
            return Err(CoreError::invalid_version(format!(
                "{trimmed:?} has more than four components"
            )));
        }

        let mut numbers = Vec::with_capacity(parts.len());
        for part in &parts {
            let n = part
                .parse::<u32>()
                .map_err(|e| CoreError::invalid_version(format!("{trimmed:?}: {e}")))?;
            numbers.push(n);
        }

        Ok(Self::new(numbers[0], numbers.get(1).copied().unwrap_or(0)))
    }
}
