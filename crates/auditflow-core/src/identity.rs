//! # Identity Newtypes
//!
//! Newtype wrappers for the identifiers that cross crate boundaries.
//! You cannot pass an `ActorId` where an `EngagementId` is expected.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Unique identifier for an audit engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngagementId(pub Uuid);

/// Unique identifier for a user acting on an engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub Uuid);

impl EngagementId {
    /// Generate a new random engagement identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl ActorId {
    /// Generate a new random actor identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EngagementId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EngagementId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for EngagementId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_uuid(s, "engagement:").map(Self)
    }
}

impl FromStr for ActorId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_uuid(s, "actor:").map(Self)
    }
}

impl std::fmt::Display for EngagementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "engagement:{}", self.0)
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actor:{}", self.0)
    }
}

/// Accepts a bare UUID or the type's own prefixed `Display` form.
fn parse_uuid(s: &str, prefix: &str) -> Result<Uuid, CoreError> {
    let raw = s.strip_prefix(prefix).unwrap_or(s);
    Uuid::parse_str(raw).map_err(|e| CoreError::InvalidIdentifier {
        value: s.to_string(),
        reason: e.to_string(),
    })
}
