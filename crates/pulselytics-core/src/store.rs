use anyhow::Result;
use async_trait::async_trait;

use crate::event::{Event, EventType};
use crate::timerange::TimeRange;

/// Storage boundary consumed by the aggregation engine.
///
/// `fetch_events` returns the finite, unordered set of events for a site
/// within the inclusive range, exactly matching the optional type filter.
/// The engine assumes nothing else about the backing store; implementations
/// are free to order or batch however they like.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    async fn insert_events(&self, events: &[Event]) -> Result<()>;

    async fn fetch_events(
        &self,
        site_id: &str,
        range: &TimeRange,
        event_type: Option<EventType>,
    ) -> Result<Vec<Event>>;
}
