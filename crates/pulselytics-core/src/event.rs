use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable tracking record. The wire field `type` selects the variant;
/// everything else in the envelope is common to all kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub site_id: String,
    /// Stable across a visitor's sessions (cookie/local-storage backed).
    pub visitor_id: String,
    /// Stable for one browsing session; rotates after the client's
    /// inactivity window (default 30 minutes).
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
    pub device_type: Option<String>,
    #[serde(rename = "deviceOS")]
    pub device_os: Option<String>,
    pub device_browser: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// Per-type payload, tagged by the wire field `type`. Each variant's fields
/// are explicit; a field absent from a variant cannot appear on that event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventKind {
    Pageview(PageviewData),
    /// Custom events use the wire tag `event`.
    #[serde(rename = "event")]
    Custom(CustomData),
    Error(ErrorData),
    Exit(ExitData),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageviewData {
    pub url: String,
    pub path: String,
    pub title: Option<String>,
    pub referrer: Option<String>,
    /// Seconds spent on the page, reported by the client at exit.
    pub time_on_page: Option<f64>,
    /// Client-computed first-visit flag; best-effort, resets with storage.
    pub is_new_visitor: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomData {
    pub category: Option<String>,
    pub action: Option<String>,
    pub label: Option<String>,
    /// Arbitrary client JSON; serialized to a string before storage.
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub message: String,
    pub stack: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitData {
    pub path: Option<String>,
    pub time_on_page: Option<f64>,
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::Pageview(_) => EventType::Pageview,
            EventKind::Custom(_) => EventType::Custom,
            EventKind::Error(_) => EventType::Error,
            EventKind::Exit(_) => EventType::Exit,
        }
    }
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    pub fn pageview(&self) -> Option<&PageviewData> {
        match &self.kind {
            EventKind::Pageview(data) => Some(data),
            _ => None,
        }
    }

    pub fn custom(&self) -> Option<&CustomData> {
        match &self.kind {
            EventKind::Custom(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_pageview(&self) -> bool {
        matches!(self.kind, EventKind::Pageview(_))
    }
}

/// Type filter passed through to the event store. `Custom` carries the wire
/// name `event`, same as the tag on [`EventKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Pageview,
    #[serde(rename = "event")]
    Custom,
    Error,
    Exit,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Pageview => "pageview",
            EventType::Custom => "event",
            EventType::Error => "error",
            EventType::Exit => "exit",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pageview" => Some(EventType::Pageview),
            "event" => Some(EventType::Custom),
            "error" => Some(EventType::Error),
            "exit" => Some(EventType::Exit),
            _ => None,
        }
    }
}

/// The payload the client sends to POST /api/track. The server re-stamps the
/// timestamp when the client omits one, then enriches from the request
/// (User-Agent, client IP) before storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPayload {
    pub site_id: String,
    pub visitor_id: String,
    pub session_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Accepts either a single event or a batch array at POST /api/track.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TrackRequest {
    Single(Box<TrackPayload>),
    Batch(Vec<TrackPayload>),
}
