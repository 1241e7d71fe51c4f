//! Serializable identifiers and ordering classes shared across the crate.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique task identifier (UUID v4, unique for the lifetime of a store).
pub type TaskId = Uuid;

/// Ordering class determining dequeue precedence.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default class.
    #[default]
    Normal,
    /// Ahead of normal work.
    High,
    /// Always dequeued first.
    Critical,
}

impl Priority {
    /// Every priority, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Normal, Self::High, Self::Critical];

    /// Stable lowercase label used in logs and config.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown priority `{s}`"))
    }
}

/// Generate a fresh task identifier.
#[must_use]
pub fn new_task_id() -> TaskId {
    Uuid::new_v4()
}
