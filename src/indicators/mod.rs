// =============================================================================
// Indicators Module
// =============================================================================
//
// Derived-indicator calculators for the enrichment pipeline. Each is a
// stateless function over TickerState and the external reference caches:
// - RVOL against historical slot-volume averages (market-timezone slots)
// - ATR% from the cached ATR and the live price
// - Trade-anomaly Z-score against 5-day trade-count stats
// - VWAP resolution and percent distance

pub mod atr;
pub mod rvol;
pub mod trades_anomaly;
pub mod vwap;

pub use trades_anomaly::TradeStats;
