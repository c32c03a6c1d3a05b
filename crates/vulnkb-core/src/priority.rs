//! Request priority hints

use serde::{Deserialize, Serialize};

/// Priority hint attached to a request.
///
/// Priorities only bucket metrics; they do not reorder execution or change
/// retry budgets.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    /// Background work
    Low,
    /// Default priority
    #[default]
    Normal,
    /// User-facing work
    High,
    /// Must-have data
    Critical,
}

impl RequestPriority {
    /// All priorities, lowest first
    pub const ALL: [RequestPriority; 4] = [Self::Low, Self::Normal, Self::High, Self::Critical];

    /// Lowercase name used in logs and exported metrics
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
