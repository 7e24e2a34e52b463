//! Sync cursor watermarks
//!
//! The remote store issues an opaque cursor with every change feed page;
//! persisting it marks everything up to that point as applied. Cursors are
//! tracked per entity kind so future feeds (attachments, settings) can
//! advance independently.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::CursorToken;

/// Entity families with their own remote change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Reminders,
}

impl EntityKind {
    /// Stable string form used as the database key
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Reminders => "reminders",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for EntityKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reminders" => Ok(EntityKind::Reminders),
            other => Err(DomainError::InvalidCursor(format!(
                "unknown entity kind: {other}"
            ))),
        }
    }
}

/// Last-applied change feed position for one entity kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
    entity: EntityKind,
    token: CursorToken,
    updated_at: DateTime<Utc>,
}

impl SyncCursor {
    /// Creates a cursor stamped with the current time
    #[must_use]
    pub fn new(entity: EntityKind, token: CursorToken) -> Self {
        Self {
            entity,
            token,
            updated_at: Utc::now(),
        }
    }

    /// Reconstructs a cursor from stored values
    #[must_use]
    pub fn from_parts(entity: EntityKind, token: CursorToken, updated_at: DateTime<Utc>) -> Self {
        Self {
            entity,
            token,
            updated_at,
        }
    }

    #[must_use]
    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    #[must_use]
    pub fn token(&self) -> &CursorToken {
        &self.token
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Moves the watermark to a newer token
    pub fn advance(&mut self, token: CursorToken) {
        self.token = token;
        self.updated_at = Utc::now();
    }
}
