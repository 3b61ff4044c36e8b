// =============================================================================
// Snapshot Store — shared Redis hashes and pub/sub channels
// =============================================================================
//
// All traffic with the out-of-scope collaborators flows through here:
//
//   snapshot:raw:latest          raw snapshot (read, written by the ingester)
//   snapshot:enriched:latest     enriched hash (this service is sole writer)
//   snapshot:enriched:last_close copy taken on session-closed
//   rvol:current_slot            current-slot RVOL strings, short TTL
//   cache:atr                    per-symbol ATR (read)
//   cache:slot_volume:<slot>     historical slot-volume averages (read)
//   cache:trade_stats            5-day trade-count stats (read)
//   vwap:live                    live VWAP from the trade-feed consumer (read)
//
// Every operation runs under a bounded timeout; failures are reported to the
// caller, which logs and retries on the next cycle.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use tracing::{info, warn};

use crate::indicators::TradeStats;
use crate::market_data::RawSnapshot;

pub const RAW_SNAPSHOT_KEY: &str = "snapshot:raw:latest";
pub const ENRICHED_HASH_KEY: &str = "snapshot:enriched:latest";
pub const LAST_CLOSE_HASH_KEY: &str = "snapshot:enriched:last_close";
pub const RVOL_SLOT_KEY: &str = "rvol:current_slot";
pub const ATR_CACHE_KEY: &str = "cache:atr";
pub const SLOT_VOLUME_KEY_PREFIX: &str = "cache:slot_volume:";
pub const TRADE_STATS_KEY: &str = "cache:trade_stats";
pub const VWAP_LIVE_KEY: &str = "vwap:live";

pub const RULES_CHANGED_CHANNEL: &str = "scanner:rules:changed";
pub const MARKET_EVENTS_CHANNEL: &str = "market:events";

/// Field inside the enriched hash carrying cycle metadata.
pub const META_FIELD: &str = "__meta__";

/// Version stamped into `__meta__`; bump when the canonical ticker JSON
/// contract changes.
pub const ENRICHED_FORMAT_VERSION: u32 = 2;

/// Cycle metadata written alongside the enriched tickers.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedMeta {
    pub timestamp: String,
    pub count: usize,
    pub changed: usize,
    pub version: u32,
}

/// Per-cycle reference data fetched in one batched round trip.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub atr: HashMap<String, f64>,
    pub slot_volume: HashMap<String, f64>,
    pub trade_stats: HashMap<String, TradeStats>,
    pub vwap: HashMap<String, f64>,
}

/// TTLs applied on every write, in seconds.
#[derive(Debug, Clone, Copy)]
pub struct StoreTtls {
    pub enriched: i64,
    pub last_close: i64,
    pub rvol: i64,
}

impl Default for StoreTtls {
    fn default() -> Self {
        Self {
            enriched: 600,
            last_close: 604_800,
            rvol: 300,
        }
    }
}

/// Async handle to the shared store. Cheap to clone.
#[derive(Clone)]
pub struct SnapshotStore {
    client: redis::Client,
    conn: ConnectionManager,
    io_timeout: Duration,
    ttls: StoreTtls,
}

impl SnapshotStore {
    pub async fn connect(url: &str, io_timeout: Duration, ttls: StoreTtls) -> Result<Self> {
        let client =
            redis::Client::open(url).with_context(|| format!("invalid redis url {url}"))?;
        let conn = tokio::time::timeout(io_timeout, client.get_connection_manager())
            .await
            .context("timed out connecting to redis")?
            .context("failed to connect to redis")?;
        info!(url = %url, "snapshot store connected");
        Ok(Self {
            client,
            conn,
            io_timeout,
            ttls,
        })
    }

    /// Underlying client, for dedicated pub/sub connections.
    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    async fn io<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context(format!("redis {what} failed"))),
            Err(_) => bail!("redis {what} timed out after {:?}", self.io_timeout),
        }
    }

    /// Read and parse the latest raw snapshot. `None` when the key is unset.
    pub async fn read_raw_snapshot(&self) -> Result<Option<RawSnapshot>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = self
            .io("raw snapshot read", async move {
                conn.get(RAW_SNAPSHOT_KEY).await
            })
            .await?;
        match raw {
            None => Ok(None),
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .context("malformed raw snapshot JSON"),
        }
    }

    /// Batched reference lookups for the cycle's symbol set. `slot` is the
    /// current RVOL slot; outside the regular session no slot volumes are
    /// fetched and RVOL stays `None`.
    pub async fn fetch_reference(
        &self,
        symbols: &[String],
        slot: Option<u32>,
    ) -> Result<ReferenceData> {
        if symbols.is_empty() {
            return Ok(ReferenceData::default());
        }

        type Cols = Vec<Option<String>>;

        let mut pipe = redis::pipe();
        pipe.cmd("HMGET").arg(ATR_CACHE_KEY).arg(symbols);
        pipe.cmd("HMGET").arg(TRADE_STATS_KEY).arg(symbols);
        pipe.cmd("HMGET").arg(VWAP_LIVE_KEY).arg(symbols);
        if let Some(slot) = slot {
            pipe.cmd("HMGET")
                .arg(format!("{SLOT_VOLUME_KEY_PREFIX}{slot}"))
                .arg(symbols);
        }

        let mut conn = self.conn.clone();
        let has_slot = slot.is_some();
        let (atr_raw, stats_raw, vwap_raw, slot_raw): (Cols, Cols, Cols, Cols) = if has_slot {
            self.io("reference cache read", async move {
                pipe.query_async(&mut conn).await
            })
            .await?
        } else {
            let (a, s, v): (Cols, Cols, Cols) = self
                .io("reference cache read", async move {
                    pipe.query_async(&mut conn).await
                })
                .await?;
            let empty = vec![None; symbols.len()];
            (a, s, v, empty)
        };

        let mut reference = ReferenceData::default();
        for (i, symbol) in symbols.iter().enumerate() {
            if let Some(atr) = parse_f64(atr_raw.get(i)) {
                reference.atr.insert(symbol.clone(), atr);
            }
            if let Some(raw) = stats_raw.get(i).and_then(|entry| entry.as_deref()) {
                match serde_json::from_str::<TradeStats>(raw) {
                    Ok(stats) => {
                        reference.trade_stats.insert(symbol.clone(), stats);
                    }
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "invalid trade stats entry");
                    }
                }
            }
            if let Some(vwap) = parse_f64(vwap_raw.get(i)) {
                reference.vwap.insert(symbol.clone(), vwap);
            }
            if let Some(avg) = parse_f64(slot_raw.get(i)) {
                reference.slot_volume.insert(symbol.clone(), avg);
            }
        }
        Ok(reference)
    }

    /// Write the cycle delta: changed tickers, the `__meta__` field, and the
    /// TTL refresh, in one pipelined transaction. The meta field is written
    /// even on a zero-change cycle so readers always see a fresh timestamp.
    pub async fn write_enriched(
        &self,
        changed: &HashMap<String, String>,
        meta: &EnrichedMeta,
    ) -> Result<()> {
        let meta_json = serde_json::to_string(meta).context("failed to serialize meta")?;

        let mut pipe = redis::pipe();
        if !changed.is_empty() {
            let items: Vec<(&str, &str)> = changed
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            pipe.hset_multiple(ENRICHED_HASH_KEY, &items).ignore();
        }
        pipe.hset(ENRICHED_HASH_KEY, META_FIELD, meta_json).ignore();
        pipe.expire(ENRICHED_HASH_KEY, self.ttls.enriched).ignore();

        let mut conn = self.conn.clone();
        self.io("enriched hash write", async move {
            pipe.query_async(&mut conn).await
        })
        .await
    }

    /// Write the current-slot RVOL map with its short TTL.
    pub async fn write_rvol_slot(&self, rvols: &HashMap<String, String>) -> Result<()> {
        if rvols.is_empty() {
            return Ok(());
        }
        let items: Vec<(&str, &str)> = rvols
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let mut pipe = redis::pipe();
        pipe.hset_multiple(RVOL_SLOT_KEY, &items).ignore();
        pipe.expire(RVOL_SLOT_KEY, self.ttls.rvol).ignore();

        let mut conn = self.conn.clone();
        self.io("rvol hash write", async move {
            pipe.query_async(&mut conn).await
        })
        .await
    }

    /// Copy the full enriched hash to the last-close hash. Called only on the
    /// session-closed event. Returns the number of fields copied.
    pub async fn copy_last_close(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let all: HashMap<String, String> = self
            .io("enriched hash read", async move {
                conn.hgetall(ENRICHED_HASH_KEY).await
            })
            .await?;

        if all.is_empty() {
            warn!("no enriched data available for last-close snapshot");
            return Ok(0);
        }

        let items: Vec<(&str, &str)> =
            all.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let mut pipe = redis::pipe();
        pipe.del(LAST_CLOSE_HASH_KEY).ignore();
        pipe.hset_multiple(LAST_CLOSE_HASH_KEY, &items).ignore();
        pipe.expire(LAST_CLOSE_HASH_KEY, self.ttls.last_close).ignore();

        let mut conn = self.conn.clone();
        let count = all.len();
        self.io::<(), _>("last-close hash write", async move {
            pipe.query_async(&mut conn).await
        })
        .await?;

        info!(
            fields_count = count,
            ttl_days = self.ttls.last_close / 86_400,
            "last-close snapshot saved"
        );
        Ok(count)
    }
}

fn parse_f64(raw: Option<&Option<String>>) -> Option<f64> {
    raw?.as_deref()?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_serializes_with_version() {
        let meta = EnrichedMeta {
            timestamp: "2026-02-03T14:30:00Z".into(),
            count: 1100,
            changed: 42,
            version: ENRICHED_FORMAT_VERSION,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"count\":1100"));
        assert!(json.contains("\"changed\":42"));
        assert!(json.contains("\"version\":2"));
    }

    #[test]
    fn parse_f64_filters_garbage() {
        let some = |s: &str| Some(s.to_string());
        assert_eq!(parse_f64(Some(&some("1.25"))), Some(1.25));
        assert_eq!(parse_f64(Some(&some("abc"))), None);
        assert_eq!(parse_f64(Some(&some("inf"))), None);
        assert_eq!(parse_f64(Some(&None)), None);
        assert_eq!(parse_f64(None), None);
    }

    #[test]
    fn trade_stats_entry_parses() {
        let stats: TradeStats =
            serde_json::from_str(r#"{"mean_5d": 2000.0, "stddev_5d": 1000.0}"#).unwrap();
        assert_eq!(stats.mean_5d, 2000.0);
        assert_eq!(stats.stddev_5d, 1000.0);
    }

    #[test]
    fn default_ttls_match_contract() {
        let ttls = StoreTtls::default();
        assert_eq!(ttls.enriched, 600);
        assert_eq!(ttls.last_close, 604_800);
        assert_eq!(ttls.rvol, 300);
    }
}
