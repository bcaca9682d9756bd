use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{AuditError, AuditEvent, AuditEventType, AuditLog};

/// Append-only in-process audit log that also mirrors every event to tracing.
#[derive(Debug)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
    available: AtomicBool,
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryAuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of all recorded events in insertion order.
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    pub async fn events_of(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable);
        }
        info!(
            target: "gatehouse::audit",
            event_type = event.event_type.as_str(),
            user_id = ?event.user_id,
            email = event.email.as_deref().unwrap_or(""),
            ip = event.ip_address.as_deref().unwrap_or(""),
            details = %serde_json::Value::Object(event.details.clone()),
            "security event"
        );
        self.events.lock().await.push(event);
        Ok(())
    }

    async fn count_events(
        &self,
        user_id: Uuid,
        event_type: AuditEventType,
        since: DateTime<Utc>,
    ) -> Result<u64, AuditError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable);
        }
        let count = self
            .events
            .lock()
            .await
            .iter()
            .filter(|event| {
                event.user_id == Some(user_id)
                    && event.event_type == event_type
                    && event.timestamp >= since
            })
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::emit;
    use anyhow::Result;

    #[tokio::test]
    async fn counts_by_user_type_and_time() -> Result<()> {
        let log = MemoryAuditLog::new();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let start = Utc::now();
        let earlier = start - chrono::Duration::hours(1);

        log.record(AuditEvent::new(AuditEventType::PasswordGraceLogin, earlier).user(user))
            .await?;
        log.record(AuditEvent::new(AuditEventType::PasswordGraceLogin, start).user(user))
            .await?;
        log.record(AuditEvent::new(AuditEventType::PasswordGraceLogin, start).user(other))
            .await?;
        log.record(AuditEvent::new(AuditEventType::LoginSuccess, start).user(user))
            .await?;

        assert_eq!(
            log.count_events(user, AuditEventType::PasswordGraceLogin, start)
                .await?,
            1
        );
        assert_eq!(
            log.count_events(user, AuditEventType::PasswordGraceLogin, earlier)
                .await?,
            2
        );
        Ok(())
    }

    #[tokio::test]
    async fn emit_swallows_sink_failures() {
        let log = MemoryAuditLog::new();
        log.set_available(false);
        emit(&log, AuditEvent::new(AuditEventType::LoginFailure, Utc::now())).await;
        log.set_available(true);
        assert!(log.events().await.is_empty());
    }
}
