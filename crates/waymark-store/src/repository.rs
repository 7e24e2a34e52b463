//! SQLite implementation of IReminderStore
//!
//! Concrete SQLite-based implementation of the reminder store port defined
//! in waymark-core, together with the in-memory grid index that backs the
//! spatial candidate query. Domain type serialization and SQL query
//! construction live here.
//!
//! ## Type Mapping
//!
//! | Domain Type           | SQL Type | Strategy                     |
//! |-----------------------|----------|------------------------------|
//! | ReminderId, DeviceId, TriggerId | TEXT | UUID string via `.to_string()` / `FromStr` |
//! | Revision              | INTEGER  | `.value()` as i64 / `Revision::from_u64` |
//! | Latitude, Longitude   | REAL     | degrees via `.degrees()` / validated `new()` |
//! | RadiusMeters          | REAL     | meters via `.meters()` / validated `new()` |
//! | ReminderState, SyncState, TriggerOn, EntityKind | TEXT | canonical `.name()` / `FromStr` |
//! | CursorToken           | TEXT     | `.as_str()` / validated `new()` |
//! | DateTime<Utc>         | TEXT     | ISO 8601 via `to_rfc3339()` / `DateTime::parse_from_rfc3339()` |
//! | armed, one_shot       | INTEGER  | bool                         |
//! | PositionFix           | TEXT     | serde_json serialization     |

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use waymark_core::domain::{
    newtypes::{CursorToken, DeviceId, Latitude, Longitude, RadiusMeters, ReminderId, Revision},
    EntityKind, Geofence, Reminder, ReminderState, SyncCursor, SyncState, TriggerOn,
};
use waymark_core::ports::{IReminderStore, ReminderFilter};

use crate::grid::GridIndex;
use crate::StoreError;

/// SQLite-based implementation of the reminder store and trigger queue
/// ports
///
/// All operations go through a connection pool; reminder-and-geofence
/// writes and remote batch application run inside transactions. The grid
/// index is kept in step with the geofence table by every fence write.
pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
    grid: GridIndex,
}

impl SqliteStore {
    /// Opens the store over an initialized pool and rebuilds the grid
    /// index from the geofence table
    ///
    /// `grid_cell_m` is the candidate-lookup cell edge length in meters.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::QueryFailed` if the geofence table cannot be
    /// read, or `StoreError::SerializationError` for an unreadable row.
    pub async fn open(pool: SqlitePool, grid_cell_m: u32) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            grid: GridIndex::new(grid_cell_m),
        };
        store.rebuild_grid().await?;
        Ok(store)
    }

    /// Runs SQLite's integrity check against the open database
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Corrupted` when the check reports anything
    /// other than "ok"; the caller is expected to rebuild from the remote
    /// store.
    pub async fn integrity_check(&self) -> Result<(), StoreError> {
        let verdict: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&self.pool)
            .await?;

        if verdict != "ok" {
            tracing::error!(%verdict, "Database integrity check failed");
            return Err(StoreError::Corrupted(verdict));
        }
        Ok(())
    }

    async fn rebuild_grid(&self) -> Result<(), StoreError> {
        let rows = sqlx::query("SELECT * FROM geofences")
            .fetch_all(&self.pool)
            .await?;

        for row in &rows {
            let fence = geofence_from_row(row)?;
            self.grid.insert(&fence);
        }

        tracing::debug!(fences = rows.len(), "Grid index rebuilt from geofence table");
        Ok(())
    }

    /// Loads geofences for the given reminder ids, skipping missing ones
    async fn fetch_geofences(&self, ids: &[ReminderId]) -> Result<Vec<Geofence>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT * FROM geofences WHERE reminder_id IN ({placeholders})");

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut fences = Vec::with_capacity(rows.len());
        for row in &rows {
            fences.push(geofence_from_row(row)?);
        }
        Ok(fences)
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Parse a DateTime<Utc> from an ISO 8601 string
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Try parsing without timezone (SQLite default format)
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| {
            StoreError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Parse an optional DateTime<Utc> from an optional string
pub(crate) fn parse_optional_datetime(
    s: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

// ============================================================================
// Row mapping functions
// ============================================================================

/// Reconstruct a Reminder from a database row
fn reminder_from_row(row: &SqliteRow) -> Result<Reminder, StoreError> {
    let id_str: String = row.get("id");
    let title: String = row.get("title");
    let note: Option<String> = row.get("note");
    let image_ref: Option<String> = row.get("image_ref");
    let created_at_str: String = row.get("created_at");
    let modified_at_str: String = row.get("modified_at");
    let state_str: String = row.get("state");
    let revision: i64 = row.get("revision");
    let modified_by_str: String = row.get("modified_by");
    let sync_state_str: String = row.get("sync_state");

    let id = ReminderId::from_str(&id_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid ReminderId '{}': {}", id_str, e))
    })?;
    let modified_by = DeviceId::from_str(&modified_by_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid DeviceId '{}': {}", modified_by_str, e))
    })?;
    let state = ReminderState::from_str(&state_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid reminder state '{}': {}", state_str, e))
    })?;
    let sync_state = SyncState::from_str(&sync_state_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid sync state '{}': {}", sync_state_str, e))
    })?;
    let created_at = parse_datetime(&created_at_str)?;
    let modified_at = parse_datetime(&modified_at_str)?;

    Ok(Reminder::from_parts(
        id,
        title,
        note,
        image_ref,
        created_at,
        modified_at,
        state,
        Revision::from_u64(revision as u64),
        modified_by,
        sync_state,
    ))
}

/// Reconstruct a Geofence from a database row
pub(crate) fn geofence_from_row(row: &SqliteRow) -> Result<Geofence, StoreError> {
    let reminder_id_str: String = row.get("reminder_id");
    let latitude: f64 = row.get("latitude");
    let longitude: f64 = row.get("longitude");
    let radius_m: f64 = row.get("radius_m");
    let trigger_on_str: String = row.get("trigger_on");
    let armed: bool = row.get("armed");
    let one_shot: bool = row.get("one_shot");

    let reminder_id = ReminderId::from_str(&reminder_id_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid ReminderId '{}': {}", reminder_id_str, e))
    })?;
    let latitude = Latitude::new(latitude).map_err(|e| {
        StoreError::SerializationError(format!("Invalid latitude {}: {}", latitude, e))
    })?;
    let longitude = Longitude::new(longitude).map_err(|e| {
        StoreError::SerializationError(format!("Invalid longitude {}: {}", longitude, e))
    })?;
    let radius = RadiusMeters::new(radius_m).map_err(|e| {
        StoreError::SerializationError(format!("Invalid radius {}: {}", radius_m, e))
    })?;
    let trigger_on = TriggerOn::from_str(&trigger_on_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid trigger_on '{}': {}", trigger_on_str, e))
    })?;

    Ok(Geofence::from_parts(
        reminder_id,
        latitude,
        longitude,
        radius,
        trigger_on,
        armed,
        one_shot,
    ))
}

/// Reconstruct a SyncCursor from a database row
fn cursor_from_row(row: &SqliteRow) -> Result<SyncCursor, StoreError> {
    let entity_str: String = row.get("entity");
    let token_str: String = row.get("token");
    let updated_at_str: String = row.get("updated_at");

    let entity = EntityKind::from_str(&entity_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid entity kind '{}': {}", entity_str, e))
    })?;
    let token = CursorToken::new(token_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid cursor token: {}", e))
    })?;
    let updated_at = parse_datetime(&updated_at_str)?;

    Ok(SyncCursor::from_parts(entity, token, updated_at))
}

// ============================================================================
// Shared write statements
// ============================================================================

async fn upsert_reminder(
    conn: &mut SqliteConnection,
    reminder: &Reminder,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR REPLACE INTO reminders \
         (id, title, note, image_ref, created_at, modified_at, \
          state, revision, modified_by, sync_state) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(reminder.id().to_string())
    .bind(reminder.title())
    .bind(reminder.note())
    .bind(reminder.image_ref())
    .bind(reminder.created_at().to_rfc3339())
    .bind(reminder.modified_at().to_rfc3339())
    .bind(reminder.state().name())
    .bind(reminder.revision().value() as i64)
    .bind(reminder.modified_by().to_string())
    .bind(reminder.sync_state().name())
    .execute(conn)
    .await?;

    Ok(())
}

async fn upsert_geofence(
    conn: &mut SqliteConnection,
    geofence: &Geofence,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR REPLACE INTO geofences \
         (reminder_id, latitude, longitude, radius_m, trigger_on, armed, one_shot) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(geofence.reminder_id().to_string())
    .bind(geofence.latitude().degrees())
    .bind(geofence.longitude().degrees())
    .bind(geofence.radius().meters())
    .bind(geofence.trigger_on().name())
    .bind(geofence.is_armed())
    .bind(geofence.is_one_shot())
    .execute(conn)
    .await?;

    Ok(())
}

async fn delete_geofence(
    conn: &mut SqliteConnection,
    reminder_id: &ReminderId,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM geofences WHERE reminder_id = ?")
        .bind(reminder_id.to_string())
        .execute(conn)
        .await?;

    Ok(())
}

async fn upsert_cursor(conn: &mut SqliteConnection, cursor: &SyncCursor) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR REPLACE INTO sync_cursors (entity, token, updated_at) VALUES (?, ?, ?)",
    )
    .bind(cursor.entity().name())
    .bind(cursor.token().as_str())
    .bind(cursor.updated_at().to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

// ============================================================================
// IReminderStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IReminderStore for SqliteStore {
    // --- Reminder operations ---

    async fn save_reminder(&self, reminder: &Reminder) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_reminder(&mut conn, reminder).await?;

        tracing::trace!(reminder_id = %reminder.id(), "Saved reminder");
        Ok(())
    }

    async fn get_reminder(&self, id: &ReminderId) -> anyhow::Result<Option<Reminder>> {
        let row = sqlx::query("SELECT * FROM reminders WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(reminder_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn query_reminders(&self, filter: &ReminderFilter) -> anyhow::Result<Vec<Reminder>> {
        let mut sql = String::from("SELECT * FROM reminders WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(state) = filter.state {
            sql.push_str(" AND state = ?");
            binds.push(state.name().to_string());
        }

        if let Some(sync_state) = filter.sync_state {
            sql.push_str(" AND sync_state = ?");
            binds.push(sync_state.name().to_string());
        }

        if let Some(ref modified_since) = filter.modified_since {
            sql.push_str(" AND modified_at > ?");
            binds.push(modified_since.to_rfc3339());
        }

        sql.push_str(" ORDER BY modified_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut reminders = Vec::with_capacity(rows.len());
        for row in &rows {
            reminders.push(reminder_from_row(row)?);
        }

        Ok(reminders)
    }

    async fn count_by_state(&self) -> anyhow::Result<HashMap<String, u64>> {
        let rows = sqlx::query("SELECT state, COUNT(*) as count FROM reminders GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in &rows {
            let state_str: String = row.get("state");
            let count: i64 = row.get("count");

            let state = ReminderState::from_str(&state_str).map_err(|e| {
                StoreError::SerializationError(format!(
                    "Invalid reminder state '{}': {}",
                    state_str, e
                ))
            })?;
            counts.insert(state.name().to_string(), count as u64);
        }

        Ok(counts)
    }

    // --- Geofence operations ---

    async fn save_with_geofence(
        &self,
        reminder: &Reminder,
        geofence: Option<&Geofence>,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_reminder(&mut tx, reminder).await?;
        match geofence {
            Some(fence) => upsert_geofence(&mut tx, fence).await?,
            None => delete_geofence(&mut tx, reminder.id()).await?,
        }
        tx.commit().await?;

        match geofence {
            Some(fence) => self.grid.insert(fence),
            None => self.grid.remove(reminder.id()),
        }

        tracing::trace!(
            reminder_id = %reminder.id(),
            has_geofence = geofence.is_some(),
            "Saved reminder with geofence"
        );
        Ok(())
    }

    async fn get_geofence(&self, id: &ReminderId) -> anyhow::Result<Option<Geofence>> {
        let row = sqlx::query("SELECT * FROM geofences WHERE reminder_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(geofence_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_geofences(&self, ids: &[ReminderId]) -> anyhow::Result<Vec<Geofence>> {
        Ok(self.fetch_geofences(ids).await?)
    }

    async fn armed_geofences(&self) -> anyhow::Result<Vec<Geofence>> {
        let rows = sqlx::query("SELECT * FROM geofences WHERE armed = 1")
            .fetch_all(&self.pool)
            .await?;

        let mut fences = Vec::with_capacity(rows.len());
        for row in &rows {
            fences.push(geofence_from_row(row)?);
        }

        Ok(fences)
    }

    async fn candidate_geofences(
        &self,
        latitude: Latitude,
        longitude: Longitude,
    ) -> anyhow::Result<Vec<Geofence>> {
        let ids = self.grid.candidates(latitude, longitude);
        Ok(self.fetch_geofences(&ids).await?)
    }

    // --- Remote application ---

    async fn apply_remote_batch(
        &self,
        batch: &[(Reminder, Option<Geofence>)],
        cursor: &SyncCursor,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for (reminder, geofence) in batch {
            upsert_reminder(&mut tx, reminder).await?;
            match geofence {
                Some(fence) => upsert_geofence(&mut tx, fence).await?,
                None => delete_geofence(&mut tx, reminder.id()).await?,
            }
        }
        upsert_cursor(&mut tx, cursor).await?;
        tx.commit().await?;

        for (reminder, geofence) in batch {
            match geofence {
                Some(fence) => self.grid.insert(fence),
                None => self.grid.remove(reminder.id()),
            }
        }

        tracing::debug!(
            entries = batch.len(),
            cursor = %cursor.token(),
            "Applied remote change batch"
        );
        Ok(())
    }

    // --- Cursor operations ---

    async fn get_cursor(&self, entity: EntityKind) -> anyhow::Result<Option<SyncCursor>> {
        let row = sqlx::query("SELECT * FROM sync_cursors WHERE entity = ?")
            .bind(entity.name())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(cursor_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn save_cursor(&self, cursor: &SyncCursor) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_cursor(&mut conn, cursor).await?;

        tracing::trace!(entity = %cursor.entity(), "Saved sync cursor");
        Ok(())
    }

    // --- Maintenance ---

    async fn purge_all(&self) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM triggers").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM geofences").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM reminders").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sync_cursors").execute(&mut *tx).await?;
        tx.commit().await?;

        self.grid.clear();

        tracing::info!("Purged all local state");
        Ok(())
    }
}
