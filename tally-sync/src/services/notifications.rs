use chrono::Duration;
use std::sync::Arc;
use tally_core::records::{Notification, NotificationKind};
use tally_core::{RecordId, Result, ValidationError};
use tracing::debug;

use super::{optimistic_delete, optimistic_upsert, refresh, BatchOutcome, SharedSink};
use crate::repository::Repository;
use crate::state::{Collection, MutationOutcome};

/// Notifications persisted for the tenant, unlike the transient notices
/// delivered through the sink.
pub struct NotificationService {
    repo: Arc<Repository>,
    sink: SharedSink,
    notifications: Collection<Notification>,
}

impl NotificationService {
    pub fn new(repo: Arc<Repository>, sink: SharedSink) -> Self {
        Self {
            repo,
            sink,
            notifications: Collection::new(),
        }
    }

    pub fn notifications(&self) -> &Collection<Notification> {
        &self.notifications
    }

    pub fn unread_count(&self) -> usize {
        self.notifications
            .entries()
            .iter()
            .filter(|t| !t.record.read)
            .count()
    }

    pub async fn add(
        &self,
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
    ) -> Result<MutationOutcome<Notification>> {
        self.save(Notification::new(title, message, kind)).await
    }

    pub async fn save(&self, notification: Notification) -> Result<MutationOutcome<Notification>> {
        self.repo.session().tenant()?;
        optimistic_upsert(
            &self.repo,
            &self.notifications,
            self.sink.as_ref(),
            notification,
            || {},
        )
        .await
    }

    pub async fn mark_read(&self, id: &RecordId) -> Result<MutationOutcome<Notification>> {
        let mut notification = self
            .notifications
            .get(id)
            .ok_or_else(|| ValidationError::NotFound(id.to_string()))?
            .record;
        notification.read = true;
        self.save(notification).await
    }

    /// Mark every unread notification read. A failure rolls back that one
    /// notification and the rest still go through.
    pub async fn mark_all_read(&self) -> Result<BatchOutcome> {
        self.repo.session().tenant()?;
        let unread: Vec<RecordId> = self
            .notifications
            .records()
            .into_iter()
            .filter(|n| !n.read)
            .map(|n| n.id)
            .collect();
        let mut outcome = BatchOutcome::default();
        for id in unread {
            let result = self.mark_read(&id).await.map(drop);
            outcome.record(id, result);
        }
        Ok(outcome)
    }

    pub async fn delete(&self, id: &RecordId) -> Result<MutationOutcome<Notification>> {
        optimistic_delete(
            &self.repo,
            &self.notifications,
            self.sink.as_ref(),
            id,
            |_| Vec::new(),
            |_| {},
        )
        .await
    }

    /// Delete notifications dated more than `days` days ago
    pub async fn delete_older_than(&self, days: u32) -> Result<BatchOutcome> {
        self.repo.session().tenant()?;
        let cutoff = self.repo.clock().now_utc() - Duration::days(i64::from(days));
        let expired: Vec<RecordId> = self
            .notifications
            .records()
            .into_iter()
            .filter(|n| n.date < cutoff)
            .map(|n| n.id)
            .collect();
        debug!(days, count = expired.len(), "Pruning old notifications");

        let mut outcome = BatchOutcome::default();
        for id in expired {
            let result = self.delete(&id).await.map(drop);
            outcome.record(id, result);
        }
        Ok(outcome)
    }

    pub async fn reload(&self, force_fresh: bool) -> Result<()> {
        let fetched = self.repo.fetch::<Notification>(force_fresh).await?;
        refresh(&self.repo, &self.notifications, fetched)
    }
}
