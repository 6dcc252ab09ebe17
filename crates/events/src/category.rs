use core::fmt;

use serde::{Deserialize, Serialize};

/// Category of the stream an event was written to.
///
/// The log maintains one virtual `$ce-<CATEGORY>` stream per category; the
/// stream router links events out of these three.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamCategory {
    /// Events appended by aggregates.
    Domain,
    /// Out-of-band events (not part of any aggregate's history).
    Oob,
    /// Plain-object events published without an aggregate.
    Poco,
}

impl StreamCategory {
    pub const ALL: [StreamCategory; 3] = [Self::Domain, Self::Oob, Self::Poco];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "DOMAIN",
            Self::Oob => "OOB",
            Self::Poco => "POCO",
        }
    }

    /// Name of the log's category stream, e.g. `$ce-DOMAIN`.
    pub fn category_stream(&self) -> String {
        format!("$ce-{}", self.as_str())
    }
}

impl fmt::Display for StreamCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
