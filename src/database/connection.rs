use std::borrow::Cow;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;

use crate::database::models::{ActivityEntry, Admin, AdminRole, Miner, PodcastRecord};
use crate::errors::StoreError;
use crate::steps::{Step, WizardKind};

pub(crate) struct Connection {
    pool: PgPool,
}

impl Connection {
    pub(crate) async fn connect(connection_string: Cow<'_, str>) -> Self {
        let pool = PgPool::connect(&connection_string)
            .await
            .expect("Failed to connect to database");
        Self { pool }
    }

    /// Idempotent schema setup plus the primary-admin seed. The primary row
    /// is forced back to its role on every boot, so it cannot be lost to a
    /// bad manual edit.
    pub(crate) async fn ensure_schema(&self, primary_admin: i64) -> Result<(), StoreError> {
        let tables = [
            "CREATE TABLE IF NOT EXISTS miners (
                user_id BIGINT PRIMARY KEY,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                auth_key TEXT NOT NULL,
                joined_at TIMESTAMPTZ NOT NULL,
                last_active TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS admins (
                admin_id BIGINT PRIMARY KEY,
                role TEXT NOT NULL CHECK (role IN ('primary', 'delegated')),
                added_by BIGINT NOT NULL,
                added_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS wizard_sessions (
                admin_id BIGINT NOT NULL,
                kind TEXT NOT NULL,
                step TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (admin_id, kind)
            )",
            "CREATE TABLE IF NOT EXISTS podcasts (
                podcast_id BIGSERIAL PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                image_url TEXT,
                button_label TEXT,
                button_url TEXT,
                sent_by BIGINT NOT NULL,
                target_type TEXT NOT NULL,
                target_id BIGINT,
                attempted BIGINT NOT NULL,
                failed BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                sent_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS config_settings (
                setting_key TEXT PRIMARY KEY,
                setting_value TEXT NOT NULL,
                updated_by BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS activity_log (
                entry_id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                kind TEXT NOT NULL,
                at TIMESTAMPTZ NOT NULL
            )",
        ];
        for table in tables {
            sqlx::query(table).execute(&self.pool).await?;
        }

        sqlx::query(
            "INSERT INTO admins (admin_id, role, added_by, added_at)
             VALUES ($1, 'primary', $1, $2)
             ON CONFLICT (admin_id) DO UPDATE SET role = 'primary'",
        )
        .bind(primary_admin)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// A session row as stored. Step and payload are opaque strings here; the
/// wizard engine parses them against the step registry and discards rows
/// that no longer fit.
#[derive(Debug, Clone)]
pub(crate) struct StoredSession {
    pub step: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) trait SessionStore {
    async fn session(
        &self,
        owner: i64,
        kind: WizardKind,
    ) -> Result<Option<StoredSession>, StoreError>;

    /// Overwrites any existing session for this owner and kind.
    async fn save_session(
        &self,
        owner: i64,
        kind: WizardKind,
        step: Step,
        payload: &str,
    ) -> Result<(), StoreError>;

    /// Safe to call when no session exists.
    async fn clear_session(&self, owner: i64, kind: WizardKind) -> Result<(), StoreError>;
}

pub(crate) trait UserDirectory {
    /// Creates or refreshes the user row, bumping `last_active`. The auth
    /// key is only written when the row is first created.
    async fn upsert_miner(
        &self,
        id: i64,
        first_name: &str,
        last_name: &str,
        auth_key: &str,
    ) -> Result<Miner, StoreError>;

    async fn list_ids(&self, active_since: Option<DateTime<Utc>>)
        -> Result<Vec<i64>, StoreError>;

    async fn exists(&self, id: i64) -> Result<bool, StoreError>;

    async fn user_count(&self) -> Result<i64, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoveOutcome {
    Removed,
    NotFound,
    /// The id belongs to the primary admin, which is never removable.
    PrimaryKept,
}

pub(crate) trait AdminDirectory {
    async fn role(&self, id: i64) -> Result<Option<AdminRole>, StoreError>;

    /// Adds a delegated admin; returns false when the id already holds a
    /// role.
    async fn add_admin(&self, id: i64, added_by: i64) -> Result<bool, StoreError>;

    async fn remove_admin(&self, id: i64) -> Result<RemoveOutcome, StoreError>;

    async fn list_admins(&self) -> Result<Vec<Admin>, StoreError>;
}

pub(crate) trait PodcastArchive {
    async fn record_podcast(&self, record: &PodcastRecord) -> Result<i64, StoreError>;

    async fn podcast_count(&self) -> Result<i64, StoreError>;
}

pub(crate) trait ConfigStore {
    async fn set_settings(&self, pairs: &[(String, String)], actor: i64)
        -> Result<(), StoreError>;

    async fn setting(&self, key: &str) -> Result<Option<String>, StoreError>;
}

pub(crate) trait ActivityLog {
    async fn log_activity(&self, user: i64, kind: &str) -> Result<(), StoreError>;

    async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>, StoreError>;
}

impl SessionStore for Connection {
    async fn session(
        &self,
        owner: i64,
        kind: WizardKind,
    ) -> Result<Option<StoredSession>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, DateTime<Utc>)>(
            "SELECT step, payload, created_at FROM wizard_sessions
             WHERE admin_id = $1 AND kind = $2",
        )
        .bind(owner)
        .bind(kind.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(step, payload, created_at)| StoredSession {
            step,
            payload,
            created_at,
        }))
    }

    async fn save_session(
        &self,
        owner: i64,
        kind: WizardKind,
        step: Step,
        payload: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO wizard_sessions (admin_id, kind, step, payload, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (admin_id, kind)
             DO UPDATE SET step = EXCLUDED.step, payload = EXCLUDED.payload,
                           created_at = EXCLUDED.created_at",
        )
        .bind(owner)
        .bind(kind.to_string())
        .bind(step.to_string())
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_session(&self, owner: i64, kind: WizardKind) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM wizard_sessions WHERE admin_id = $1 AND kind = $2")
            .bind(owner)
            .bind(kind.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl UserDirectory for Connection {
    async fn upsert_miner(
        &self,
        id: i64,
        first_name: &str,
        last_name: &str,
        auth_key: &str,
    ) -> Result<Miner, StoreError> {
        let miner = sqlx::query_as::<_, Miner>(
            "INSERT INTO miners (user_id, first_name, last_name, auth_key, joined_at, last_active)
             VALUES ($1, $2, $3, $4, $5, $5)
             ON CONFLICT (user_id)
             DO UPDATE SET first_name = EXCLUDED.first_name,
                           last_name = EXCLUDED.last_name,
                           last_active = EXCLUDED.last_active
             RETURNING user_id, first_name, last_name, auth_key, joined_at, last_active",
        )
        .bind(id)
        .bind(first_name)
        .bind(last_name)
        .bind(auth_key)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(miner)
    }

    async fn list_ids(
        &self,
        active_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<i64>, StoreError> {
        let ids = match active_since {
            Some(cutoff) => {
                sqlx::query_scalar::<_, i64>("SELECT user_id FROM miners WHERE last_active >= $1")
                    .bind(cutoff)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>("SELECT user_id FROM miners")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(ids)
    }

    async fn exists(&self, id: i64) -> Result<bool, StoreError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM miners WHERE user_id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn user_count(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM miners")
            .fetch_one(&self.pool)
            .await?)
    }
}

impl AdminDirectory for Connection {
    async fn role(&self, id: i64) -> Result<Option<AdminRole>, StoreError> {
        let role = sqlx::query_scalar::<_, String>("SELECT role FROM admins WHERE admin_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        role.map(|raw| {
            AdminRole::from_str(&raw)
                .map_err(|_| StoreError::Corrupt(format!("admin role '{}'", raw)))
        })
        .transpose()
    }

    async fn add_admin(&self, id: i64, added_by: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO admins (admin_id, role, added_by, added_at)
             VALUES ($1, 'delegated', $2, $3)
             ON CONFLICT (admin_id) DO NOTHING",
        )
        .bind(id)
        .bind(added_by)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_admin(&self, id: i64) -> Result<RemoveOutcome, StoreError> {
        let deleted = sqlx::query("DELETE FROM admins WHERE admin_id = $1 AND role = 'delegated'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() > 0 {
            return Ok(RemoveOutcome::Removed);
        }
        match self.role(id).await? {
            Some(AdminRole::Primary) => Ok(RemoveOutcome::PrimaryKept),
            _ => Ok(RemoveOutcome::NotFound),
        }
    }

    async fn list_admins(&self) -> Result<Vec<Admin>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, String, i64, DateTime<Utc>)>(
            "SELECT admin_id, role, added_by, added_at FROM admins ORDER BY added_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(admin_id, raw_role, added_by, added_at)| {
                let role = AdminRole::from_str(&raw_role)
                    .map_err(|_| StoreError::Corrupt(format!("admin role '{}'", raw_role)))?;
                Ok(Admin {
                    admin_id,
                    role,
                    added_by,
                    added_at,
                })
            })
            .collect()
    }
}

impl PodcastArchive for Connection {
    async fn record_podcast(&self, record: &PodcastRecord) -> Result<i64, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO podcasts (title, body, image_url, button_label, button_url,
                                   sent_by, target_type, target_id, attempted, failed,
                                   created_at, sent_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING podcast_id",
        )
        .bind(&record.title)
        .bind(&record.body)
        .bind(&record.image_url)
        .bind(record.button.as_ref().map(|b| b.label.clone()))
        .bind(record.button.as_ref().map(|b| b.url.to_string()))
        .bind(record.sent_by)
        .bind(record.target.kind())
        .bind(record.target.specific_id())
        .bind(i64::from(record.attempted))
        .bind(i64::from(record.failed))
        .bind(record.created_at)
        .bind(record.sent_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn podcast_count(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM podcasts")
            .fetch_one(&self.pool)
            .await?)
    }
}

impl ConfigStore for Connection {
    async fn set_settings(
        &self,
        pairs: &[(String, String)],
        actor: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in pairs {
            sqlx::query(
                "INSERT INTO config_settings (setting_key, setting_value, updated_by, updated_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (setting_key)
                 DO UPDATE SET setting_value = EXCLUDED.setting_value,
                               updated_by = EXCLUDED.updated_by,
                               updated_at = EXCLUDED.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(actor)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT setting_value FROM config_settings WHERE setting_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?)
    }
}

impl ActivityLog for Connection {
    async fn log_activity(&self, user: i64, kind: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO activity_log (user_id, kind, at) VALUES ($1, $2, $3)")
            .bind(user)
            .bind(kind)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, String, DateTime<Utc>)>(
            "SELECT user_id, kind, at FROM activity_log ORDER BY at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, kind, at)| ActivityEntry { user_id, kind, at })
            .collect())
    }
}
