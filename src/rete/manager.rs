// =============================================================================
// RETE Manager — rule lifecycle, hot reload, and evaluation entry points
// =============================================================================
//
// Owns the compiled network. Reloads build a detached network under a single
// async lock and publish it with an atomic swap, so evaluators always see
// either the old or the new network, never a partial one.
//
// Rule sources:
//   - the fixed system categories (rete::system_rules)
//   - all enabled rows of `user_scanner_filters` (rete::user_rules)
//
// Reload triggers:
//   - any message on the rules-changed pub/sub channel (immediate)
//   - the periodic safety reload, which compares the DB's enabled-row count
//     against the network and recompiles on mismatch (covers lost pub/sub)
//
// A failed reload leaves the previous network intact.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::db::FilterDb;
use crate::market_data::EnrichedTicker;
use crate::store::RULES_CHANGED_CHANNEL;

use super::evaluator;
use super::model::{NetworkStats, ReteNetwork};
use super::{compiler, system_rules, user_rules};

/// Manager statistics for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub network: NetworkStats,
    pub active_users: usize,
    pub total_evaluations: u64,
    pub total_matches: u64,
    pub last_compile: Option<String>,
}

pub struct ReteManager {
    network: ArcSwap<ReteNetwork>,
    /// Serializes reloads; evaluators never take it.
    reload_lock: tokio::sync::Mutex<()>,
    db: Option<FilterDb>,
    active_users: RwLock<HashSet<String>>,
    total_evaluations: AtomicU64,
    total_matches: AtomicU64,
    last_compile: RwLock<Option<DateTime<Utc>>>,
}

impl ReteManager {
    pub fn new(db: Option<FilterDb>) -> Self {
        Self {
            network: ArcSwap::from_pointee(ReteNetwork::default()),
            reload_lock: tokio::sync::Mutex::new(()),
            db,
            active_users: RwLock::new(HashSet::new()),
            total_evaluations: AtomicU64::new(0),
            total_matches: AtomicU64::new(0),
            last_compile: RwLock::new(None),
        }
    }

    /// Current network handle. The returned Arc is a consistent view; hold
    /// it for the duration of a batch so one cycle never mixes networks.
    pub fn network(&self) -> Arc<ReteNetwork> {
        self.network.load_full()
    }

    /// Rebuild the network from all rule sources and swap it in.
    pub async fn reload_rules(&self) -> Result<()> {
        let _guard = self.reload_lock.lock().await;

        let mut rules = system_rules::all();
        info!(count = rules.len(), "loaded system rules");

        if let Some(db) = &self.db {
            let db = db.clone();
            let rows = tokio::task::spawn_blocking(move || db.load_enabled_filters())
                .await
                .context("user-filter load task panicked")?
                .context("failed to load user filters")?;
            let converted = user_rules::convert_rows(&rows);
            info!(rows = rows.len(), rules = converted.len(), "loaded user rules");
            rules.extend(converted);
        }

        let network = compiler::compile_network(&rules);
        let stats = network.stats();
        self.network.store(Arc::new(network));
        *self.last_compile.write() = Some(Utc::now());

        info!(
            total_rules = stats.total_rules,
            system_rules = stats.system_rules,
            user_rules = stats.user_rules,
            alpha_nodes = stats.alpha_nodes,
            "rule network compiled"
        );
        Ok(())
    }

    // ── Evaluation ──────────────────────────────────────────────────────

    /// Evaluate one ticker against every rule. Returns `{rule_id: matched}`.
    pub fn evaluate(&self, ticker: &EnrichedTicker) -> HashMap<String, bool> {
        let network = self.network.load();
        let matches = evaluator::evaluate_ticker(ticker, &network);
        self.total_evaluations.fetch_add(1, Ordering::Relaxed);
        let matched = matches.values().filter(|m| **m).count() as u64;
        self.total_matches.fetch_add(matched, Ordering::Relaxed);
        matches
    }

    /// Evaluate a batch under one network handle.
    ///
    /// Returns `{rule_id: [matched symbols]}`, symbols sorted; rules with no
    /// matches are absent from the map.
    pub fn evaluate_batch<'a>(
        &self,
        tickers: impl IntoIterator<Item = &'a EnrichedTicker>,
    ) -> HashMap<String, Vec<String>> {
        let network = self.network.load();
        let mut results: HashMap<String, Vec<String>> = HashMap::new();
        let mut evaluations = 0u64;
        let mut matched_total = 0u64;

        for ticker in tickers {
            evaluations += 1;
            for (rule_id, matched) in evaluator::evaluate_ticker(ticker, &network) {
                if matched {
                    matched_total += 1;
                    results.entry(rule_id).or_default().push(ticker.symbol.clone());
                }
            }
        }

        for symbols in results.values_mut() {
            symbols.sort();
        }

        self.total_evaluations.fetch_add(evaluations, Ordering::Relaxed);
        self.total_matches.fetch_add(matched_total, Ordering::Relaxed);
        results
    }

    /// System-category subset of a batch result.
    pub fn system_results<'a>(
        batch: &'a HashMap<String, Vec<String>>,
    ) -> HashMap<&'a str, &'a Vec<String>> {
        batch
            .iter()
            .filter(|(rule_id, _)| rule_id.starts_with("category:"))
            .map(|(k, v)| (k.as_str(), v))
            .collect()
    }

    /// One user's subset of a batch result.
    pub fn user_results<'a>(
        batch: &'a HashMap<String, Vec<String>>,
        user_id: &str,
    ) -> HashMap<&'a str, &'a Vec<String>> {
        let prefix = format!("user:{user_id}:");
        batch
            .iter()
            .filter(|(rule_id, _)| rule_id.starts_with(&prefix))
            .map(|(k, v)| (k.as_str(), v))
            .collect()
    }

    // ── Active users ────────────────────────────────────────────────────

    pub fn add_active_user(&self, user_id: &str) {
        self.active_users.write().insert(user_id.to_string());
    }

    pub fn remove_active_user(&self, user_id: &str) {
        self.active_users.write().remove(user_id);
    }

    pub fn active_user_count(&self) -> usize {
        self.active_users.read().len()
    }

    // ── Stats ───────────────────────────────────────────────────────────

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            network: self.network.load().stats(),
            active_users: self.active_user_count(),
            total_evaluations: self.total_evaluations.load(Ordering::Relaxed),
            total_matches: self.total_matches.load(Ordering::Relaxed),
            last_compile: self.last_compile.read().map(|t| t.to_rfc3339()),
        }
    }
}

// =============================================================================
// Background tasks
// =============================================================================

/// Listen on the rules-changed channel and reload on any message.
///
/// Runs until the pub/sub connection drops, then returns so the caller can
/// reconnect after a delay. If pub/sub stays unavailable, the periodic
/// safety reload still picks up edits.
pub async fn listen_for_rule_changes(
    manager: Arc<ReteManager>,
    client: redis::Client,
) -> Result<()> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .context("failed to open rules-changed pub/sub connection")?;
    pubsub
        .subscribe(RULES_CHANGED_CHANNEL)
        .await
        .context("failed to subscribe to rules-changed channel")?;
    info!(channel = RULES_CHANGED_CHANNEL, "rules-changed listener started");

    let mut stream = pubsub.on_message();
    while let Some(_msg) = stream.next().await {
        info!("rules-changed event received — reloading");
        if let Err(e) = manager.reload_rules().await {
            error!(error = %e, "rule reload after change event failed — keeping previous network");
        }
    }

    warn!("rules-changed pub/sub stream ended");
    Ok(())
}

/// Periodic safety net: every `interval`, compare the DB's enabled-filter
/// count against the network's user-rule count and reload on mismatch.
pub async fn run_safety_reload(
    manager: Arc<ReteManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("safety reload task stopping");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(db) = manager.db.clone() else {
            continue;
        };

        let db_count = match tokio::task::spawn_blocking(move || db.count_enabled()).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                error!(error = %e, "safety reload count query failed");
                continue;
            }
            Err(e) => {
                error!(error = %e, "safety reload count task panicked");
                continue;
            }
        };

        let current = manager.network.load().user_rules;
        if db_count != current {
            info!(
                db_rules = db_count,
                network_rules = current,
                "rule count mismatch — safety reload triggered"
            );
            if let Err(e) = manager.reload_rules().await {
                error!(error = %e, "safety reload failed — keeping previous network");
            }
        } else {
            debug!(rules = db_count, "safety reload check ok");
        }
    }
}
