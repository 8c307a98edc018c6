use async_trait::async_trait;
use campsite_monitor::{
    AvailableCampsite, EntryState, MatchKey, SeenEntry, SeenStore, StayWindow, StoreError,
};
use chrono::NaiveDate;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS seen_matches (
        namespace     TEXT NOT NULL,
        provider_id   TEXT NOT NULL,
        campground_id TEXT NOT NULL,
        campsite_id   TEXT NOT NULL,
        arrival       DATE NOT NULL,
        nights        INTEGER NOT NULL,
        campsite      JSONB,
        notified      BOOLEAN NOT NULL DEFAULT FALSE,
        first_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        notified_at   TIMESTAMPTZ,
        PRIMARY KEY (namespace, provider_id, campground_id, campsite_id, arrival, nights)
    )
"#;

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// One row of the seen_matches table
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    /// Match identity
    pub key: MatchKey,
    /// Snapshot taken on admission
    pub campsite: Option<AvailableCampsite>,
    /// Whether delivery was confirmed
    pub notified: bool,
}

impl StoredMatch {
    /// Log entries equivalent to this row
    pub fn into_entries(self) -> Vec<SeenEntry> {
        let admitted = SeenEntry {
            key: self.key.clone(),
            state: EntryState::Admitted,
            campsite: self.campsite,
        };

        if self.notified {
            vec![admitted, SeenEntry::notified(self.key)]
        } else {
            vec![admitted]
        }
    }
}

/// Seen-store over a `seen_matches` table
///
/// Rows are partitioned by namespace, one namespace per search, so several
/// searches can share a database.
pub struct PgSeenStore {
    pool: PgPool,
    namespace: String,
}

impl PgSeenStore {
    /// Open the store, creating the table if needed
    pub async fn create(pool: PgPool, namespace: &str) -> Result<Self, StoreError> {
        let namespace = namespace.trim();
        if namespace.is_empty() {
            return Err(StoreError::Backend(
                "seen-store namespace must not be empty".to_string(),
            ));
        }

        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(backend)?;

        info!("Seen-store ready (namespace {})", namespace);

        Ok(Self {
            pool,
            namespace: namespace.to_string(),
        })
    }

    /// Namespace this store reads and writes
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl SeenStore for PgSeenStore {
    async fn load(&self) -> Result<Vec<SeenEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                provider_id, campground_id, campsite_id, arrival, nights,
                campsite, notified
            FROM seen_matches
            WHERE namespace = $1
            ORDER BY first_seen_at, provider_id, campground_id, campsite_id, arrival, nights
            "#,
        )
        .bind(&self.namespace)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let arrival: NaiveDate = row.try_get("arrival").map_err(backend)?;
            let nights: i32 = row.try_get("nights").map_err(backend)?;
            let nights = u32::try_from(nights)
                .map_err(|_| StoreError::Backend(format!("negative nights in row: {}", nights)))?;
            let stay_window = StayWindow::new(arrival, nights)
                .map_err(|e| StoreError::Backend(format!("invalid stay in row: {}", e)))?;

            let campsite: Option<Json<AvailableCampsite>> =
                row.try_get("campsite").map_err(backend)?;

            let stored = StoredMatch {
                key: MatchKey {
                    provider_id: row.try_get("provider_id").map_err(backend)?,
                    campground_id: row.try_get("campground_id").map_err(backend)?,
                    campsite_id: row.try_get("campsite_id").map_err(backend)?,
                    stay_window,
                },
                campsite: campsite.map(|Json(site)| site),
                notified: row.try_get("notified").map_err(backend)?,
            };
            entries.extend(stored.into_entries());
        }

        debug!(
            "Loaded {} seen-store entries for namespace {}",
            entries.len(),
            self.namespace
        );
        Ok(entries)
    }

    async fn append(&self, entries: &[SeenEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(backend)?;

        for entry in entries {
            let nights = i32::try_from(entry.key.stay_window.nights())
                .map_err(|_| StoreError::Backend("nights out of range".to_string()))?;

            let query = match entry.state {
                EntryState::Admitted => sqlx::query(
                    r#"
                    INSERT INTO seen_matches (
                        namespace, provider_id, campground_id, campsite_id,
                        arrival, nights, campsite
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT DO NOTHING
                    "#,
                ),
                EntryState::Notified => sqlx::query(
                    r#"
                    INSERT INTO seen_matches (
                        namespace, provider_id, campground_id, campsite_id,
                        arrival, nights, campsite, notified, notified_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, NOW())
                    ON CONFLICT (
                        namespace, provider_id, campground_id, campsite_id, arrival, nights
                    )
                    DO UPDATE SET
                        notified = TRUE,
                        notified_at = COALESCE(seen_matches.notified_at, NOW())
                    "#,
                ),
            };

            query
                .bind(&self.namespace)
                .bind(&entry.key.provider_id)
                .bind(&entry.key.campground_id)
                .bind(&entry.key.campsite_id)
                .bind(entry.key.stay_window.arrival())
                .bind(nights)
                .bind(entry.campsite.as_ref().map(Json))
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}
