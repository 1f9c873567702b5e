use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use crate::targets::Target;

/// An app user reachable by the bot. `last_active` feeds the recency-based
/// audience selectors.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct Miner {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub auth_key: String,
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Miner {
    /// True for the upsert round-trip that created the row: both timestamps
    /// were written from the same clock reading.
    pub(crate) fn is_new(&self) -> bool {
        self.joined_at == self.last_active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum AdminRole {
    Primary,
    Delegated,
}

#[derive(Debug, Clone)]
pub(crate) struct Admin {
    pub admin_id: i64,
    pub role: AdminRole,
    pub added_by: i64,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct ActivityEntry {
    pub user_id: i64,
    pub kind: String,
    pub at: DateTime<Utc>,
}

/// URL button attached under a broadcast message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LinkButton {
    pub label: String,
    pub url: Url,
}

/// A committed podcast. Immutable once written; the delivery tally is the
/// outcome of the single dispatch run that followed confirmation.
#[derive(Debug, Clone)]
pub(crate) struct PodcastRecord {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub button: Option<LinkButton>,
    pub sent_by: i64,
    pub target: Target,
    pub attempted: u32,
    pub failed: u32,
    pub created_at: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
}
