//! Tab Status State Machine
//!
//! ```text
//! Active <-> Background
//!              | inactivity sweep
//!              v
//!          Suspended
//!              | retention cleanup
//!              v
//!           Archived
//! ```
//!
//! Suspended and archived tabs become active again only on an explicit switch.

use serde::{Deserialize, Serialize};

use crate::error::TabError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    /// The single tab currently holding focus
    Active,
    /// Resident but not focused
    Background,
    /// Idle beyond the inactivity threshold, eligible for eviction
    Suspended,
    /// Retired by retention cleanup; the record lives in the archive area
    Archived,
}

impl TabStatus {
    /// Check if transition to another status is valid
    pub fn can_transition_to(&self, target: TabStatus) -> bool {
        match (self, target) {
            (TabStatus::Active, TabStatus::Background) => true,
            (TabStatus::Background, TabStatus::Active) => true,
            (TabStatus::Background, TabStatus::Suspended) => true,
            // Explicit re-open
            (TabStatus::Suspended, TabStatus::Active) => true,
            (TabStatus::Suspended, TabStatus::Archived) => true,
            (TabStatus::Archived, TabStatus::Active) => true,
            (a, b) if *a == b => true,
            _ => false,
        }
    }

    /// Tabs the maintenance sweep may evict from the resident set
    pub fn is_evictable(&self) -> bool {
        matches!(self, TabStatus::Suspended | TabStatus::Archived)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TabStatus::Active => "active",
            TabStatus::Background => "background",
            TabStatus::Suspended => "suspended",
            TabStatus::Archived => "archived",
        }
    }
}

impl std::fmt::Display for TabStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TabStatus {
    type Err = TabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(TabStatus::Active),
            "background" => Ok(TabStatus::Background),
            "suspended" => Ok(TabStatus::Suspended),
            "archived" => Ok(TabStatus::Archived),
            _ => Err(TabError::UnknownStatus(s.to_string())),
        }
    }
}
