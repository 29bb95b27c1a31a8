use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

use super::{CalendarEvent, CalendarService};
use crate::kernel::error::CollaboratorError;

#[derive(Debug, Default)]
struct Access {
    /// `None`: every user is authorized.
    allowed: Option<HashSet<String>>,
}

/// Per-user calendars held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCalendar {
    events: RwLock<HashMap<String, Vec<CalendarEvent>>>,
    access: RwLock<Access>,
}

impl InMemoryCalendar {
    /// Every user may read and write.
    pub fn open() -> Self {
        Self::default()
    }

    /// Nobody is authorized until `authorize` is called for them.
    pub fn restricted() -> Self {
        Self {
            events: RwLock::default(),
            access: RwLock::new(Access {
                allowed: Some(HashSet::new()),
            }),
        }
    }

    pub fn authorize(&self, user: &str) {
        if let Some(allowed) = self.access.write().allowed.as_mut() {
            allowed.insert(user.to_string());
        }
    }

    pub fn revoke(&self, user: &str) {
        let mut access = self.access.write();
        access
            .allowed
            .get_or_insert_with(HashSet::new)
            .remove(user);
    }

    /// Seed an event without the authorization check.
    pub fn insert(&self, user: &str, mut event: CalendarEvent) -> CalendarEvent {
        event.id.get_or_insert_with(|| Uuid::new_v4().to_string());
        self.events
            .write()
            .entry(user.to_string())
            .or_default()
            .push(event.clone());
        event
    }

    pub fn events_for(&self, user: &str) -> Vec<CalendarEvent> {
        self.events.read().get(user).cloned().unwrap_or_default()
    }

    fn check(&self, user: &str) -> Result<(), CollaboratorError> {
        match &self.access.read().allowed {
            Some(allowed) if !allowed.contains(user) => Err(CollaboratorError::AuthRequired),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl CalendarService for InMemoryCalendar {
    async fn list_events(
        &self,
        user: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CollaboratorError> {
        self.check(user)?;
        let mut events: Vec<CalendarEvent> = self
            .events
            .read()
            .get(user)
            .map(|all| {
                all.iter()
                    .filter(|e| e.start < end && e.end > start)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        events.sort_by_key(|e| e.start);
        Ok(events)
    }

    async fn create_event(&self, user: &str, event: CalendarEvent) -> Result<CalendarEvent, CollaboratorError> {
        self.check(user)?;
        if event.end < event.start {
            return Err(CollaboratorError::Unavailable("event ends before it starts".into()));
        }
        let created = self.insert(user, event);
        debug!(event_id = ?created.id, "calendar event created");
        Ok(created)
    }
}
