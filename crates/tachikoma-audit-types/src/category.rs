//! Audit event categories.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// High-level category for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumIter, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditCategory {
    /// Login, logout, token lifecycle.
    Authentication,
    /// Permission checks and role changes.
    Authorization,
    /// Reads and writes of tenant data.
    DataAccess,
    /// Configuration changes.
    Configuration,
    /// Workflow and step execution.
    Workflow,
    /// Policy evaluation results.
    Policy,
    /// Process lifecycle and internal errors.
    System,
    /// Suspicious activity and violations.
    Security,
}

impl AuditCategory {
    /// Get all categories.
    pub fn all() -> impl Iterator<Item = Self> {
        use strum::IntoEnumIterator;
        Self::iter()
    }
}
