use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::database::connection::UserDirectory;
use crate::errors::StoreError;

pub(crate) const DAY_SECS: i64 = 86_400;
pub(crate) const WEEK_SECS: i64 = 604_800;
pub(crate) const MONTH_SECS: i64 = 2_592_000;

/// Symbolic audience selector, resolved to concrete recipient ids only at
/// dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Target {
    All,
    RecentDay,
    RecentWeek,
    RecentMonth,
    Specific(i64),
}

impl Target {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::RecentDay => "recent_day",
            Self::RecentWeek => "recent_week",
            Self::RecentMonth => "recent_month",
            Self::Specific(_) => "specific",
        }
    }

    pub(crate) fn specific_id(&self) -> Option<i64> {
        match self {
            Self::Specific(id) => Some(*id),
            _ => None,
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Self::All => "all users".to_owned(),
            Self::RecentDay => "users active in the last day".to_owned(),
            Self::RecentWeek => "users active in the last week".to_owned(),
            Self::RecentMonth => "users active in the last month".to_owned(),
            Self::Specific(id) => format!("user {}", id),
        }
    }
}

/// Materializes the recipient set for one dispatch run: deduplicated, stably
/// ordered. A `specific` id is returned as-is; its validity is proven (or
/// not) by the delivery attempt itself.
pub(crate) async fn resolve<Directory: UserDirectory>(
    directory: &Directory,
    target: &Target,
    now: DateTime<Utc>,
) -> Result<Vec<i64>, StoreError> {
    let mut ids = match target {
        Target::Specific(id) => vec![*id],
        Target::All => directory.list_ids(None).await?,
        Target::RecentDay => {
            directory
                .list_ids(Some(now - Duration::seconds(DAY_SECS)))
                .await?
        }
        Target::RecentWeek => {
            directory
                .list_ids(Some(now - Duration::seconds(WEEK_SECS)))
                .await?
        }
        Target::RecentMonth => {
            directory
                .list_ids(Some(now - Duration::seconds(MONTH_SECS)))
                .await?
        }
    };

    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::TimeZone;

    use super::*;

    struct SeededDirectory {
        last_active: HashMap<i64, DateTime<Utc>>,
    }

    impl UserDirectory for SeededDirectory {
        async fn upsert_miner(
            &self,
            _id: i64,
            _first_name: &str,
            _last_name: &str,
            _auth_key: &str,
        ) -> Result<crate::database::models::Miner, StoreError> {
            unimplemented!("not used by the resolver")
        }

        async fn list_ids(
            &self,
            active_since: Option<DateTime<Utc>>,
        ) -> Result<Vec<i64>, StoreError> {
            let mut ids: Vec<i64> = self
                .last_active
                .iter()
                .filter(|(_, seen)| active_since.is_none_or(|cutoff| **seen >= cutoff))
                .map(|(id, _)| *id)
                .collect();
            ids.push(7); // id 7 is always active, so this duplicates it
            Ok(ids)
        }

        async fn exists(&self, id: i64) -> Result<bool, StoreError> {
            Ok(self.last_active.contains_key(&id))
        }

        async fn user_count(&self) -> Result<i64, StoreError> {
            Ok(self.last_active.len() as i64)
        }
    }

    fn directory(now: DateTime<Utc>) -> SeededDirectory {
        let mut last_active = HashMap::new();
        last_active.insert(1, now); // active right now
        last_active.insert(2, now - Duration::seconds(DAY_SECS)); // exactly on the boundary
        last_active.insert(3, now - Duration::seconds(DAY_SECS + 1)); // just outside
        last_active.insert(4, now - Duration::seconds(WEEK_SECS - 60));
        last_active.insert(5, now - Duration::seconds(MONTH_SECS - 60));
        last_active.insert(7, now);
        SeededDirectory { last_active }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn recent_day_keeps_exactly_the_window() {
        let now = fixed_now();
        let ids = resolve(&directory(now), &Target::RecentDay, now)
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2, 7]);
    }

    #[tokio::test]
    async fn recent_week_and_month_widen_the_window() {
        let now = fixed_now();
        let week = resolve(&directory(now), &Target::RecentWeek, now)
            .await
            .unwrap();
        assert_eq!(week, vec![1, 2, 3, 4, 7]);

        let month = resolve(&directory(now), &Target::RecentMonth, now)
            .await
            .unwrap();
        assert_eq!(month, vec![1, 2, 3, 4, 5, 7]);
    }

    #[tokio::test]
    async fn all_returns_every_id_deduplicated() {
        let now = fixed_now();
        let ids = resolve(&directory(now), &Target::All, now).await.unwrap();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 7]);
    }

    #[tokio::test]
    async fn specific_is_a_singleton_without_existence_check() {
        let now = fixed_now();
        let directory = directory(now);
        assert!(!directory.exists(999).await.unwrap());
        let ids = resolve(&directory, &Target::Specific(999), now).await.unwrap();
        assert_eq!(ids, vec![999]);
    }
}
