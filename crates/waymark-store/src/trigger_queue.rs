//! SQLite implementation of ITriggerQueue
//!
//! The `triggers` table doubles as the durable delivery queue. A partial
//! unique index over Pending rows (`idx_triggers_pending_key`) enforces
//! the one-Pending-per-(reminder, transition) coalescing invariant at the
//! storage level, so a racing enqueue cannot create a duplicate entry.
//!
//! ## Redelivery
//!
//! `dequeue_next` claims the oldest Pending row with a guarded update;
//! `requeue_expired` returns timed-out Delivered rows to Pending. An
//! expired delivery whose key has since gained a newer Pending event is
//! superseded instead: it moves straight to Acknowledged so the unique
//! index holds and the reminder does not fire twice for one transition.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use waymark_core::domain::{
    newtypes::{ReminderId, TriggerId},
    DeliveryState, PositionFix, Transition, TriggerEvent,
};
use waymark_core::ports::{EnqueueOutcome, ITriggerQueue};

use crate::repository::{parse_datetime, parse_optional_datetime, SqliteStore};
use crate::StoreError;

/// Reconstruct a TriggerEvent from a database row
fn trigger_from_row(row: &SqliteRow) -> Result<TriggerEvent, StoreError> {
    let id_str: String = row.get("id");
    let reminder_id_str: String = row.get("reminder_id");
    let transition_str: String = row.get("transition");
    let fix_json: String = row.get("fix");
    let occurred_at_str: String = row.get("occurred_at");
    let delivery_str: String = row.get("delivery");
    let attempts: i64 = row.get("attempts");
    let delivered_at_str: Option<String> = row.get("delivered_at");

    let id = TriggerId::from_str(&id_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid TriggerId '{}': {}", id_str, e))
    })?;
    let reminder_id = ReminderId::from_str(&reminder_id_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid ReminderId '{}': {}", reminder_id_str, e))
    })?;
    let transition = Transition::from_str(&transition_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid transition '{}': {}", transition_str, e))
    })?;
    let fix: PositionFix = serde_json::from_str(&fix_json).map_err(|e| {
        StoreError::SerializationError(format!("Invalid position fix '{}': {}", fix_json, e))
    })?;
    let delivery = DeliveryState::from_str(&delivery_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid delivery state '{}': {}", delivery_str, e))
    })?;
    let occurred_at = parse_datetime(&occurred_at_str)?;
    let delivered_at = parse_optional_datetime(delivered_at_str)?;

    Ok(TriggerEvent::from_parts(
        id,
        reminder_id,
        transition,
        fix,
        occurred_at,
        delivery,
        attempts as u32,
        delivered_at,
    ))
}

#[async_trait::async_trait]
impl ITriggerQueue for SqliteStore {
    async fn enqueue(&self, event: &TriggerEvent) -> anyhow::Result<EnqueueOutcome> {
        let fix_json = serde_json::to_string(event.fix()).map_err(|e| {
            StoreError::SerializationError(format!("Failed to serialize position fix: {}", e))
        })?;

        let mut tx = self.pool.begin().await?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT id FROM triggers WHERE reminder_id = ? AND transition = ? AND delivery = ?",
        )
        .bind(event.reminder_id().to_string())
        .bind(event.transition().name())
        .bind(DeliveryState::Pending.name())
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            Some(ref id) => {
                sqlx::query("UPDATE triggers SET fix = ?, occurred_at = ? WHERE id = ?")
                    .bind(&fix_json)
                    .bind(event.occurred_at().to_rfc3339())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                EnqueueOutcome::Coalesced
            }
            None => {
                sqlx::query(
                    "INSERT INTO triggers \
                     (id, reminder_id, transition, fix, occurred_at, \
                      delivery, attempts, delivered_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(event.id().to_string())
                .bind(event.reminder_id().to_string())
                .bind(event.transition().name())
                .bind(&fix_json)
                .bind(event.occurred_at().to_rfc3339())
                .bind(event.delivery().name())
                .bind(event.attempts() as i64)
                .bind(event.delivered_at().map(|dt| dt.to_rfc3339()))
                .execute(&mut *tx)
                .await?;
                EnqueueOutcome::Inserted
            }
        };

        tx.commit().await?;

        tracing::trace!(
            trigger_id = %event.id(),
            reminder_id = %event.reminder_id(),
            transition = %event.transition(),
            outcome = ?outcome,
            "Enqueued trigger event"
        );
        Ok(outcome)
    }

    async fn dequeue_next(&self) -> anyhow::Result<Option<TriggerEvent>> {
        loop {
            let row = sqlx::query(
                "SELECT * FROM triggers WHERE delivery = ? \
                 ORDER BY occurred_at ASC, id ASC LIMIT 1",
            )
            .bind(DeliveryState::Pending.name())
            .fetch_optional(&self.pool)
            .await?;

            let Some(ref row) = row else {
                return Ok(None);
            };

            let mut event = trigger_from_row(row)?;
            event.mark_delivered(Utc::now())?;

            // Guarded update: a concurrent consumer may have claimed the
            // row between the select and this write.
            let updated = sqlx::query(
                "UPDATE triggers SET delivery = ?, attempts = ?, delivered_at = ? \
                 WHERE id = ? AND delivery = ?",
            )
            .bind(event.delivery().name())
            .bind(event.attempts() as i64)
            .bind(event.delivered_at().map(|dt| dt.to_rfc3339()))
            .bind(event.id().to_string())
            .bind(DeliveryState::Pending.name())
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() == 1 {
                tracing::trace!(
                    trigger_id = %event.id(),
                    attempts = event.attempts(),
                    "Dequeued trigger event"
                );
                return Ok(Some(event));
            }
            // Lost the claim; retry with the next pending row.
        }
    }

    async fn acknowledge(&self, id: &TriggerId) -> anyhow::Result<TriggerEvent> {
        let row = sqlx::query("SELECT * FROM triggers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(ref row) = row else {
            return Err(StoreError::NotFound(format!("trigger {}", id)).into());
        };

        let mut event = trigger_from_row(row)?;
        if event.delivery() == DeliveryState::Acknowledged {
            return Ok(event);
        }

        event.acknowledge()?;

        sqlx::query("UPDATE triggers SET delivery = ? WHERE id = ?")
            .bind(event.delivery().name())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        tracing::trace!(trigger_id = %id, "Acknowledged trigger event");
        Ok(event)
    }

    async fn requeue_expired(&self, retry_timeout: chrono::Duration) -> anyhow::Result<u32> {
        let cutoff = (Utc::now() - retry_timeout).to_rfc3339();

        let mut tx = self.pool.begin().await?;

        // Superseded deliveries: the key already has a newer Pending
        // event, so requeueing would duplicate it.
        sqlx::query(
            "UPDATE triggers SET delivery = ? \
             WHERE delivery = ? AND delivered_at <= ? \
               AND EXISTS (SELECT 1 FROM triggers AS p \
                           WHERE p.reminder_id = triggers.reminder_id \
                             AND p.transition = triggers.transition \
                             AND p.delivery = ?)",
        )
        .bind(DeliveryState::Acknowledged.name())
        .bind(DeliveryState::Delivered.name())
        .bind(&cutoff)
        .bind(DeliveryState::Pending.name())
        .execute(&mut *tx)
        .await?;

        let requeued = sqlx::query(
            "UPDATE triggers SET delivery = ?, delivered_at = NULL \
             WHERE delivery = ? AND delivered_at <= ?",
        )
        .bind(DeliveryState::Pending.name())
        .bind(DeliveryState::Delivered.name())
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let count = requeued.rows_affected() as u32;
        if count > 0 {
            tracing::debug!(count, "Requeued expired trigger deliveries");
        }
        Ok(count)
    }

    async fn pending_count(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM triggers WHERE delivery = ?")
            .bind(DeliveryState::Pending.name())
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    async fn get_trigger(&self, id: &TriggerId) -> anyhow::Result<Option<TriggerEvent>> {
        let row = sqlx::query("SELECT * FROM triggers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(trigger_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn purge_acknowledged(&self, before: DateTime<Utc>) -> anyhow::Result<u32> {
        let result = sqlx::query("DELETE FROM triggers WHERE delivery = ? AND occurred_at < ?")
            .bind(DeliveryState::Acknowledged.name())
            .bind(before.to_rfc3339())
            .execute(&self.pool)
            .await?;

        let count = result.rows_affected() as u32;
        if count > 0 {
            tracing::debug!(count, "Purged acknowledged trigger events");
        }
        Ok(count)
    }
}
