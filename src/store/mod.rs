pub mod redis_store;

pub use redis_store::{EnrichedMeta, ReferenceData, SnapshotStore};
pub use redis_store::{MARKET_EVENTS_CHANNEL, RULES_CHANGED_CHANNEL};
