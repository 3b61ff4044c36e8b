// =============================================================================
// Delta Publisher — per-channel incremental match-set events
// =============================================================================
//
// Keeps the previous cycle's match set per rule and emits, for every channel
// whose membership moved, an event `{added, removed, updated}`:
//
//   added    — symbols newly matching the rule
//   removed  — symbols that stopped matching
//   updated  — still-matching symbols whose enriched bytes changed this
//              cycle (from the change detector's delta)
//
// Publication order within one cycle: system channels first, in stable
// lexical order of category id, then user channels by user id and scan id.
// A subscriber connecting mid-stream gets a synthetic `initial` event per
// channel carrying the full current match set before any increments.
// =============================================================================

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::rete::system_rules::channel_for;

const DELTA_CHANNEL_CAPACITY: usize = 512;

/// Kind of delta event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaEventKind {
    /// Full current match set, sent once to a new subscriber.
    Initial,
    /// Incremental change produced by one evaluation cycle.
    Delta,
}

/// One event on one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelDelta {
    pub channel: String,
    pub event: DeltaEventKind,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
    pub timestamp: i64,
}

/// Publisher statistics for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PublisherStats {
    pub channels_tracked: usize,
    pub events_published: u64,
    pub subscribers: usize,
}

pub struct DeltaPublisher {
    /// Previous cycle's match set per rule id.
    prev: RwLock<HashMap<String, BTreeSet<String>>>,
    tx: broadcast::Sender<ChannelDelta>,
    events_published: AtomicU64,
}

impl Default for DeltaPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DELTA_CHANNEL_CAPACITY);
        Self {
            prev: RwLock::new(HashMap::new()),
            tx,
            events_published: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelDelta> {
        self.tx.subscribe()
    }

    /// Synthetic `initial` events for a new subscriber's channels, carrying
    /// the full current match set of each.
    pub fn initial_events(&self, channels: &[String]) -> Vec<ChannelDelta> {
        let prev = self.prev.read();
        let now = Utc::now().timestamp_millis();
        channels
            .iter()
            .map(|channel| {
                let matches = prev
                    .get(&rule_id_for(channel))
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default();
                ChannelDelta {
                    channel: channel.clone(),
                    event: DeltaEventKind::Initial,
                    added: matches,
                    removed: Vec::new(),
                    updated: Vec::new(),
                    timestamp: now,
                }
            })
            .collect()
    }

    /// Current match set for one channel.
    pub fn current_matches(&self, channel: &str) -> Vec<String> {
        self.prev
            .read()
            .get(&rule_id_for(channel))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Fold one evaluation cycle into per-channel deltas and broadcast them.
    ///
    /// `batch` is the evaluator's `{rule_id: [matched symbols]}`; `changed`
    /// is the change detector's delta for this cycle. Returns the number of
    /// events emitted.
    pub fn publish_cycle(
        &self,
        batch: &HashMap<String, Vec<String>>,
        changed: &HashSet<String>,
    ) -> usize {
        let mut prev = self.prev.write();

        // Union of current and previous rule ids, system channels first.
        let mut rule_ids: Vec<&String> = batch.keys().chain(prev.keys()).collect();
        rule_ids.sort_by(|a, b| {
            let a_system = a.starts_with("category:");
            let b_system = b.starts_with("category:");
            b_system.cmp(&a_system).then_with(|| a.cmp(b))
        });
        rule_ids.dedup();

        let now = Utc::now().timestamp_millis();
        let mut emitted = 0;
        let mut next: HashMap<String, BTreeSet<String>> = HashMap::with_capacity(batch.len());

        for rule_id in rule_ids {
            let current: BTreeSet<String> = batch
                .get(rule_id)
                .map(|symbols| symbols.iter().cloned().collect())
                .unwrap_or_default();
            let previous = prev.get(rule_id).cloned().unwrap_or_default();

            let added: Vec<String> = current.difference(&previous).cloned().collect();
            let removed: Vec<String> = previous.difference(&current).cloned().collect();
            let updated: Vec<String> = current
                .intersection(&previous)
                .filter(|s| changed.contains(s.as_str()))
                .cloned()
                .collect();

            if !added.is_empty() || !removed.is_empty() || !updated.is_empty() {
                let delta = ChannelDelta {
                    channel: channel_for(rule_id).to_string(),
                    event: DeltaEventKind::Delta,
                    added,
                    removed,
                    updated,
                    timestamp: now,
                };
                debug!(
                    channel = %delta.channel,
                    added = delta.added.len(),
                    removed = delta.removed.len(),
                    updated = delta.updated.len(),
                    "channel delta"
                );
                // No subscribers is fine; the match state still advances.
                let _ = self.tx.send(delta);
                emitted += 1;
            }

            if !current.is_empty() {
                next.insert(rule_id.clone(), current);
            }
        }

        *prev = next;
        self.events_published.fetch_add(emitted as u64, Ordering::Relaxed);
        emitted as usize
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            channels_tracked: self.prev.read().len(),
            events_published: self.events_published.load(Ordering::Relaxed),
            subscribers: self.tx.receiver_count(),
        }
    }
}

/// Inverse of `channel_for`: system channels map back onto their category
/// rule id, user channels are already rule ids.
fn rule_id_for(channel: &str) -> String {
    if channel.contains(':') {
        channel.to_string()
    } else {
        format!("category:{channel}")
    }
}
