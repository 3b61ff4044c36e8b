// =============================================================================
// Market Events — day-change and session-close signals
// =============================================================================
//
// A single external event source is authoritative for session transitions;
// the pipeline never infers them from timestamps. Messages on the
// `market:events` pub/sub channel are mapped onto an in-process broadcast
// bus that the enrichment loop subscribes to:
//
//   "day_changed"     -> clear per-ticker state and the change-detector cache
//   "session_closed"  -> copy the enriched hash to the last-close hash
// =============================================================================

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::store::MARKET_EVENTS_CHANNEL;

/// Session transition events delivered to the enrichment loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketEvent {
    DayChanged,
    SessionClosed,
}

impl MarketEvent {
    /// Parse a pub/sub payload. Unknown payloads are ignored by the caller.
    pub fn parse(payload: &str) -> Option<Self> {
        match payload.trim() {
            "day_changed" => Some(Self::DayChanged),
            // The upstream publisher has used both spellings.
            "session_closed" | "session_changed" => Some(Self::SessionClosed),
            _ => None,
        }
    }
}

const EVENT_BUS_CAPACITY: usize = 16;

/// In-process fanout of market events.
pub struct EventBus {
    tx: broadcast::Sender<MarketEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: MarketEvent) {
        // No receivers is fine (e.g. during startup).
        let _ = self.tx.send(event);
    }
}

/// Listen on the market-events channel and forward onto the bus.
///
/// Runs until the pub/sub connection drops, then returns so the caller can
/// reconnect after a delay.
pub async fn run_event_listener(client: redis::Client, bus: std::sync::Arc<EventBus>) -> Result<()> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .context("failed to open market-events pub/sub connection")?;
    pubsub
        .subscribe(MARKET_EVENTS_CHANNEL)
        .await
        .context("failed to subscribe to market events")?;
    info!(channel = MARKET_EVENTS_CHANNEL, "market-event listener started");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "unreadable market-event payload");
                continue;
            }
        };
        match MarketEvent::parse(&payload) {
            Some(event) => {
                info!(?event, "market event received");
                bus.emit(event);
            }
            None => warn!(payload = %payload, "unknown market-event payload ignored"),
        }
    }

    warn!("market-event pub/sub stream ended");
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_parsing() {
        assert_eq!(MarketEvent::parse("day_changed"), Some(MarketEvent::DayChanged));
        assert_eq!(
            MarketEvent::parse(" session_closed "),
            Some(MarketEvent::SessionClosed)
        );
        assert_eq!(
            MarketEvent::parse("session_changed"),
            Some(MarketEvent::SessionClosed)
        );
        assert_eq!(MarketEvent::parse("lunch_break"), None);
        assert_eq!(MarketEvent::parse(""), None);
    }

    #[tokio::test]
    async fn bus_fans_out_to_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.emit(MarketEvent::DayChanged);
        assert_eq!(rx1.recv().await.unwrap(), MarketEvent::DayChanged);
        assert_eq!(rx2.recv().await.unwrap(), MarketEvent::DayChanged);
    }

    #[test]
    fn emit_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        bus.emit(MarketEvent::SessionClosed);
    }
}
