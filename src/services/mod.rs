//! Collaborator interfaces consumed by the action dispatcher, plus the
//! in-process implementations used by the console driver and the tests.

pub mod calendar;
pub mod content;
pub mod http;
pub mod maps;
pub mod records;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::config::CopilotConfig;
use crate::kernel::entity::TravelMode;
use crate::kernel::error::CollaboratorError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Assigned by the calendar on creation.
    pub id: Option<String>,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Link that opens the place in a map viewer.
    #[serde(default)]
    pub maps_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    pub instruction: String,
    pub distance_m: u32,
    pub minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub origin: String,
    pub destination: String,
    pub distance_m: u32,
    pub minutes: u32,
    #[serde(default)]
    pub mode: TravelMode,
    pub steps: Vec<RouteStep>,
    #[serde(default)]
    pub maps_url: Option<String>,
}

/// Structured input to a content generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationInput {
    Summary {
        text: String,
    },
    Poster {
        title: String,
        date: Option<NaiveDate>,
        time: Option<NaiveTime>,
        place: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Summary,
    Poster,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[async_trait]
pub trait CalendarService: Send + Sync {
    /// Events overlapping `[start, end)`, ordered by start.
    async fn list_events(
        &self,
        user: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CollaboratorError>;

    async fn create_event(&self, user: &str, event: CalendarEvent) -> Result<CalendarEvent, CollaboratorError>;
}

#[async_trait]
pub trait MapsService: Send + Sync {
    /// `CollaboratorError::NotFound` when nothing matches.
    async fn find_location(&self, query: &str) -> Result<Place, CollaboratorError>;

    async fn directions(&self, from: &str, to: &str, mode: TravelMode) -> Result<Route, CollaboratorError>;
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, input: &GenerationInput) -> Result<Artifact, CollaboratorError>;
}

/// Key-value records grouped in named collections. The schema is the caller's.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<(), CollaboratorError>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>, CollaboratorError>;

    async fn list(&self, collection: &str) -> Result<Vec<(String, serde_json::Value)>, CollaboratorError>;

    async fn delete(&self, collection: &str, key: &str) -> Result<bool, CollaboratorError>;
}

/// The set of collaborators the dispatcher routes to.
#[derive(Clone)]
pub struct Collaborators {
    pub calendar: Arc<dyn CalendarService>,
    pub maps: Arc<dyn MapsService>,
    pub summarizer: Arc<dyn ContentGenerator>,
    pub poster: Arc<dyn ContentGenerator>,
    pub records: Arc<dyn RecordStore>,
}

impl Collaborators {
    /// In-process campus collaborators. With `generator_url` set, summaries and
    /// posters go to the remote generator instead; an unusable URL logs a
    /// warning and keeps the local generators.
    pub fn campus_defaults(config: &CopilotConfig) -> Self {
        let (summarizer, poster): (Arc<dyn ContentGenerator>, Arc<dyn ContentGenerator>) =
            match config
                .generator_url
                .as_deref()
                .map(|url| http::HttpGenerator::new(url, config.dispatcher.call_timeout()))
            {
                Some(Ok(generator)) => {
                    let remote = Arc::new(generator);
                    (remote.clone(), remote)
                }
                Some(Err(err)) => {
                    warn!(error = %err, "remote generator unusable, falling back to local generators");
                    local_generators()
                }
                None => local_generators(),
            };

        Self {
            calendar: Arc::new(calendar::InMemoryCalendar::open()),
            maps: Arc::new(maps::CampusMaps::default()),
            summarizer,
            poster,
            records: Arc::new(records::InMemoryRecords::default()),
        }
    }
}

fn local_generators() -> (Arc<dyn ContentGenerator>, Arc<dyn ContentGenerator>) {
    (
        Arc::new(content::ExtractiveSummarizer::default()),
        Arc::new(content::PosterGenerator::default()),
    )
}
