pub mod ticker;
pub mod ticker_state;

// Re-export the core data types for convenient access
// (e.g. `use crate::market_data::EnrichedTicker`).
pub use ticker::{round2, round4, EnrichedTicker, Field, FieldValue, RawSnapshot, RawTicker};
pub use ticker_state::{PriceWindows, TickerState, VolumeWindows};
