// =============================================================================
// Enrichment Pipeline — the main cycle loop
// =============================================================================
//
// Each cycle:
//   1. Read the latest raw snapshot; skip if its timestamp was already
//      processed.
//   2. Batch-fetch the reference caches (ATR, slot volumes, trade stats,
//      live VWAP) for the snapshot's symbol set.
//   3. Enrich every ticker: update its rolling state, compute derived
//      change fields, windows, RVOL, ATR%, VWAP distance, anomaly metrics.
//   4. Byte-dedup against the previous cycle and write only the changed
//      tickers (plus `__meta__` and the TTL refresh) to the shared hash.
//   5. Refresh the current-slot RVOL hash.
//   6. Evaluate the enriched set against the rule network and publish the
//      per-channel deltas.
//
// Ordering within a cycle is fixed: enrichment → change detection → hash
// write → rule evaluation → delta publish. Cycles never overlap.
//
// Failure semantics: a bad ticker is counted and skipped; store errors are
// logged and retried next cycle; the loop itself never dies. Day-change
// clears the per-ticker state and detector cache before the next cycle;
// session-close copies the enriched hash to the last-close hash.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::events::{EventBus, MarketEvent};
use crate::indicators::{atr, rvol, trades_anomaly, vwap};
use crate::market_data::{round2, round4, EnrichedTicker, RawTicker, TickerState};
use crate::store::redis_store::ENRICHED_FORMAT_VERSION;
use crate::store::{EnrichedMeta, ReferenceData, SnapshotStore};

use super::ChangeDetector;

/// What one cycle did, used to pick the pause before the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Processed,
    AlreadyProcessed,
    Empty,
}

pub struct EnrichmentPipeline {
    store: SnapshotStore,
    app: Arc<AppState>,
    bus: Arc<EventBus>,

    // Exclusively owned per-cycle state. No locks: only this task touches it.
    ticker_states: HashMap<String, TickerState>,
    detector: ChangeDetector,
    last_processed_timestamp: Option<String>,
    last_slot: Option<u32>,
    cycle_count: u64,
    skipped_tickers: u64,
}

impl EnrichmentPipeline {
    pub fn new(store: SnapshotStore, app: Arc<AppState>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            app,
            bus,
            ticker_states: HashMap::new(),
            detector: ChangeDetector::new(),
            last_processed_timestamp: None,
            last_slot: None,
            cycle_count: 0,
            skipped_tickers: 0,
        }
    }

    /// Main processing loop. Runs until shutdown is signalled; cancellation
    /// is honored between cycles, never mid-cycle.
    pub async fn run_loop(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.bus.subscribe();
        info!("enrichment pipeline started");

        loop {
            let outcome = match self.run_cycle().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "enrichment cycle error");
                    self.app.push_error(format!("enrichment cycle error: {e}"));
                    CycleOutcome::Empty
                }
            };

            let pause = {
                let config = self.app.runtime_config.read();
                match outcome {
                    CycleOutcome::Processed => config.cycle_interval(),
                    _ => config.idle_interval(),
                }
            };

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("enrichment pipeline stopping");
                    return;
                }
                event = events.recv() => {
                    match event {
                        Ok(event) => self.handle_event(event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(missed = n, "market-event receiver lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {}
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }

            // Apply any further queued events before the next cycle starts.
            while let Ok(event) = events.try_recv() {
                self.handle_event(event).await;
            }
        }
    }

    async fn handle_event(&mut self, event: MarketEvent) {
        match event {
            MarketEvent::DayChanged => self.reset_for_new_day(),
            MarketEvent::SessionClosed => match self.store.copy_last_close().await {
                Ok(count) => info!(fields_count = count, "session closed — last-close snapshot taken"),
                Err(e) => {
                    error!(error = %e, "failed to write last-close snapshot");
                    self.app.push_error(format!("last-close write failed: {e}"));
                }
            },
        }
    }

    /// Clear all session state so the next cycle starts from scratch with a
    /// forced full write.
    fn reset_for_new_day(&mut self) {
        let symbols = self.ticker_states.len();
        self.ticker_states.clear();
        self.detector.clear();
        info!(symbols, "trading day changed — session state cleared");
    }

    async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let now = Utc::now();

        // Slot-entry logging for RVOL.
        let slot = rvol::current_slot(now);
        if slot != self.last_slot {
            if let Some(s) = slot {
                info!(slot = s, window = %rvol::slot_label(s), "entered new rvol slot");
            }
            self.last_slot = slot;
        }

        let Some(snapshot) = self.store.read_raw_snapshot().await? else {
            return Ok(CycleOutcome::Empty);
        };
        if Some(&snapshot.timestamp) == self.last_processed_timestamp.as_ref() {
            return Ok(CycleOutcome::AlreadyProcessed);
        }
        if snapshot.tickers.is_empty() {
            return Ok(CycleOutcome::Empty);
        }

        // Batched reference lookups for this snapshot's symbols.
        let symbols: Vec<String> = snapshot
            .tickers
            .iter()
            .filter(|t| !t.symbol.is_empty())
            .map(|t| t.symbol.clone())
            .collect();
        let reference = self.store.fetch_reference(&symbols, slot).await?;

        // Enrich.
        let mut enriched: HashMap<String, EnrichedTicker> =
            HashMap::with_capacity(snapshot.tickers.len());
        let mut rvol_map: HashMap<String, String> = HashMap::new();

        for raw in &snapshot.tickers {
            if raw.symbol.is_empty() {
                self.skipped_tickers += 1;
                continue;
            }
            let state = self.ticker_states.entry(raw.symbol.clone()).or_default();
            let ticker = enrich_ticker(state, raw, now, &reference);
            if let Some(r) = ticker.rvol.filter(|r| *r > 0.0) {
                rvol_map.insert(ticker.symbol.clone(), format!("{r:.2}"));
            }
            enriched.insert(ticker.symbol.clone(), ticker);
        }

        // Change detection.
        let (changed, total, changed_count) = if self.detector.is_first_cycle() {
            let written = self.detector.force_full_write(&enriched);
            let total = enriched.len();
            let count = written.len();
            info!(total, "first cycle — full write");
            (written, total, count)
        } else {
            self.detector.detect_changes(&enriched)
        };

        // Hash writes. Meta goes out even on a zero-change cycle so readers
        // always see a fresh timestamp; write errors retry next cycle.
        let meta = EnrichedMeta {
            timestamp: snapshot.timestamp.clone(),
            count: total,
            changed: changed_count,
            version: ENRICHED_FORMAT_VERSION,
        };
        if let Err(e) = self.store.write_enriched(&changed, &meta).await {
            error!(error = %e, changed = changed_count, "enriched hash write failed");
            self.app.push_error(format!("enriched hash write failed: {e}"));
        }
        if let Err(e) = self.store.write_rvol_slot(&rvol_map).await {
            error!(error = %e, "rvol hash write failed");
        }

        self.last_processed_timestamp = Some(snapshot.timestamp.clone());
        self.cycle_count += 1;

        // Rule evaluation and delta fanout.
        let batch = self.app.rete.evaluate_batch(enriched.values());
        let changed_symbols: HashSet<String> = changed.keys().cloned().collect();
        let delta_events = self.app.publisher.publish_cycle(&batch, &changed_symbols);

        // Publish cycle stats.
        {
            let mut stats = self.app.pipeline_stats.write();
            stats.cycle_count = self.cycle_count;
            stats.last_processed_timestamp = self.last_processed_timestamp.clone();
            stats.last_total = total;
            stats.last_changed = changed_count;
            stats.skipped_tickers = self.skipped_tickers;
            stats.detector = self.detector.stats();
        }
        self.app.increment_version();

        info!(
            total,
            changed = changed_count,
            change_pct = if total > 0 {
                round2(changed_count as f64 / total as f64 * 100.0)
            } else {
                0.0
            },
            delta_events,
            cycle = self.cycle_count,
            "enrichment cycle complete"
        );
        Ok(CycleOutcome::Processed)
    }
}

// =============================================================================
// Per-ticker enrichment
// =============================================================================

/// Percent change of `value` from `base`, rounded to 2 decimals. `None` for
/// a missing or non-positive base.
fn pct_change(value: Option<f64>, base: Option<f64>) -> Option<f64> {
    let value = value?;
    let base = base.filter(|b| b.is_finite() && *b > 0.0)?;
    let pct = (value - base) / base * 100.0;
    pct.is_finite().then(|| round2(pct))
}

/// Merge one raw ticker with its rolling state and the reference caches.
///
/// Observations happen first (price, cumulative volume, trade count), then
/// every derived field is computed from the updated state. Any missing
/// input degrades the affected field to `None` and nothing else.
pub fn enrich_ticker(
    state: &mut TickerState,
    raw: &RawTicker,
    now: DateTime<Utc>,
    reference: &ReferenceData,
) -> EnrichedTicker {
    let price = raw.current_price();
    if let Some(p) = price {
        state.observe_price(p, now);
    }
    let volume = raw.session_volume();
    if let Some(v) = volume {
        state.observe_volume(v, now);
    }
    if let Some(count) = raw.trades_today {
        state.observe_trade_count(count);
    }

    let (vol_windows, price_windows) = state.windows(now);

    // Intraday extremes from state, falling back to the day bar before any
    // price has been observed.
    let intraday_high = state.intraday_high().or(raw.high);
    let intraday_low = state.intraday_low().or(raw.low);
    let price_from_intraday_high = pct_change(price, intraday_high);
    let price_from_intraday_low = pct_change(price, intraday_low);

    // Quote spread.
    let spread = match (raw.bid, raw.ask) {
        (Some(bid), Some(ask)) if ask >= bid => Some(round4(ask - bid)),
        _ => None,
    };
    let spread_percent = match (spread, price.filter(|p| *p > 0.0)) {
        (Some(s), Some(p)) => Some(round4(s / p * 100.0)),
        _ => None,
    };

    // Reference-cache indicators.
    let atr_value = reference.atr.get(&raw.symbol).copied();
    let atr_percent = atr::atr_percent(atr_value, price).map(round2);
    let rvol_value =
        rvol::calculate(volume, reference.slot_volume.get(&raw.symbol).copied()).map(round2);
    let vwap_value = vwap::resolve(raw.day_vwap, reference.vwap.get(&raw.symbol).copied());
    let price_vs_vwap = vwap::price_vs_vwap(price, vwap_value).map(round2);

    // Trade anomaly.
    let trades_today = state.trades_today().filter(|c| *c > 0);
    let anomaly = trades_today
        .and_then(|count| trades_anomaly::detect(count, reference.trade_stats.get(&raw.symbol)));

    EnrichedTicker {
        symbol: raw.symbol.clone(),

        price,
        bid: raw.bid,
        ask: raw.ask,
        spread,
        spread_percent,

        open: raw.open,
        high: raw.high,
        low: raw.low,
        prev_close: raw.prev_close,
        day_volume: raw.day_volume,

        change_percent: pct_change(price, raw.prev_close),
        change_from_open: pct_change(price, raw.open),
        gap_percent: pct_change(raw.open, raw.prev_close),

        volume_today: volume,
        vol_1min: vol_windows.vol_1min,
        vol_5min: vol_windows.vol_5min,
        vol_10min: vol_windows.vol_10min,
        vol_15min: vol_windows.vol_15min,
        vol_30min: vol_windows.vol_30min,

        chg_1min: price_windows.chg_1min.map(round2),
        chg_5min: price_windows.chg_5min.map(round2),
        chg_10min: price_windows.chg_10min.map(round2),
        chg_15min: price_windows.chg_15min.map(round2),
        chg_30min: price_windows.chg_30min.map(round2),
        chg_60min: price_windows.chg_60min.map(round2),

        intraday_high,
        intraday_low,
        price_from_intraday_high,
        price_from_intraday_low,
        high_52w: raw.high_52w,
        low_52w: raw.low_52w,

        rvol: rvol_value,
        atr: atr_value,
        atr_percent,
        vwap: vwap_value,
        price_vs_vwap,

        trades_today,
        avg_trades_5d: anomaly.map(|a| a.avg_trades_5d.round()),
        trades_z_score: anomaly.map(|a| round2(a.z_score)),
        is_trade_anomaly: anomaly.map(|a| a.is_anomaly).unwrap_or(false),

        sector: raw.sector.clone(),
        industry: raw.industry.clone(),
        exchange: raw.exchange.clone(),
        security_type: raw.security_type.clone(),
        market_cap: raw.market_cap,
        free_float: raw.free_float,
        shares_outstanding: raw.shares_outstanding,
        is_etf: raw.is_etf,
    }
}
