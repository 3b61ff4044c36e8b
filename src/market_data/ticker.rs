// =============================================================================
// Ticker Models — raw snapshot entries and the enriched ticker record
// =============================================================================
//
// `RawTicker` is the wire shape produced by the upstream ingester (quote and
// trade fields plus session bar aggregates). `EnrichedTicker` is the record
// this service publishes: raw fields merged with derived indicators.
//
// The serialized form of `EnrichedTicker` is the contract with external
// subscribers. Field order is fixed by struct order and every optional field
// serializes as an explicit null, so byte-level change detection is stable
// across cycles.
// =============================================================================

use serde::{Deserialize, Serialize};

// =============================================================================
// Raw snapshot
// =============================================================================

/// Top-level raw snapshot read from the shared store:
/// `{timestamp, tickers: [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSnapshot {
    pub timestamp: String,
    #[serde(default)]
    pub tickers: Vec<RawTicker>,
}

/// One raw ticker entry as written by the upstream ingester. Every field is
/// optional-by-presence; enrichment tolerates any of them being absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTicker {
    #[serde(default)]
    pub symbol: String,

    // Quote / last trade
    pub last_price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,

    // Session bars
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub prev_close: Option<f64>,
    pub day_volume: Option<f64>,
    /// Accumulated session volume from the minute aggregate, preferred over
    /// `day_volume` when present.
    pub accumulated_volume: Option<f64>,
    pub day_vwap: Option<f64>,

    pub trades_today: Option<u64>,

    // Reference data
    pub high_52w: Option<f64>,
    pub low_52w: Option<f64>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub exchange: Option<String>,
    pub security_type: Option<String>,
    pub market_cap: Option<f64>,
    pub free_float: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub is_etf: Option<bool>,
}

impl RawTicker {
    /// Current price: last trade if present, else the day close. Zero and
    /// negative prices are treated as absent.
    pub fn current_price(&self) -> Option<f64> {
        self.last_price
            .filter(|p| *p > 0.0)
            .or(self.close.filter(|p| *p > 0.0))
    }

    /// Session volume: minute-aggregate accumulated volume if present, else
    /// the day bar volume.
    pub fn session_volume(&self) -> Option<f64> {
        self.accumulated_volume
            .filter(|v| *v > 0.0)
            .or(self.day_volume.filter(|v| *v > 0.0))
    }
}

// =============================================================================
// Enriched ticker
// =============================================================================

/// The published record for one symbol. Struct order is the canonical
/// serialization order — do not reorder fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichedTicker {
    pub symbol: String,

    // Quote
    pub price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub spread: Option<f64>,
    pub spread_percent: Option<f64>,

    // Session bars
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub prev_close: Option<f64>,
    pub day_volume: Option<f64>,

    // Derived change
    pub change_percent: Option<f64>,
    pub change_from_open: Option<f64>,
    pub gap_percent: Option<f64>,

    // Volume
    pub volume_today: Option<f64>,
    pub vol_1min: Option<f64>,
    pub vol_5min: Option<f64>,
    pub vol_10min: Option<f64>,
    pub vol_15min: Option<f64>,
    pub vol_30min: Option<f64>,

    // Rolling price change windows
    pub chg_1min: Option<f64>,
    pub chg_5min: Option<f64>,
    pub chg_10min: Option<f64>,
    pub chg_15min: Option<f64>,
    pub chg_30min: Option<f64>,
    pub chg_60min: Option<f64>,

    // Extremes
    pub intraday_high: Option<f64>,
    pub intraday_low: Option<f64>,
    pub price_from_intraday_high: Option<f64>,
    pub price_from_intraday_low: Option<f64>,
    pub high_52w: Option<f64>,
    pub low_52w: Option<f64>,

    // Volatility / flow indicators
    pub rvol: Option<f64>,
    pub atr: Option<f64>,
    pub atr_percent: Option<f64>,
    pub vwap: Option<f64>,
    pub price_vs_vwap: Option<f64>,

    // Activity
    pub trades_today: Option<u64>,
    pub avg_trades_5d: Option<f64>,
    pub trades_z_score: Option<f64>,
    pub is_trade_anomaly: bool,

    // Reference
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub exchange: Option<String>,
    pub security_type: Option<String>,
    pub market_cap: Option<f64>,
    pub free_float: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub is_etf: Option<bool>,
}

// =============================================================================
// Typed field access
// =============================================================================

/// Value of one enriched field as seen by the rule evaluator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Num(f64),
    Text(&'a str),
    Flag(bool),
}

/// Identifier for every filterable enriched field. Alpha nodes hold a `Field`
/// instead of a field-name string so the hot evaluation path never does
/// string lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Price,
    Bid,
    Ask,
    Spread,
    SpreadPercent,
    Open,
    High,
    Low,
    PrevClose,
    DayVolume,
    ChangePercent,
    ChangeFromOpen,
    GapPercent,
    VolumeToday,
    Vol1Min,
    Vol5Min,
    Vol10Min,
    Vol15Min,
    Vol30Min,
    Chg1Min,
    Chg5Min,
    Chg10Min,
    Chg15Min,
    Chg30Min,
    Chg60Min,
    IntradayHigh,
    IntradayLow,
    PriceFromIntradayHigh,
    PriceFromIntradayLow,
    High52W,
    Low52W,
    Rvol,
    Atr,
    AtrPercent,
    Vwap,
    PriceVsVwap,
    TradesToday,
    AvgTrades5D,
    TradesZScore,
    IsTradeAnomaly,
    Sector,
    Industry,
    Exchange,
    SecurityType,
    MarketCap,
    FreeFloat,
    SharesOutstanding,
    IsEtf,
}

impl Field {
    /// Snake-case field name as it appears in the published record. Used in
    /// canonical condition keys and the status surface.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Bid => "bid",
            Self::Ask => "ask",
            Self::Spread => "spread",
            Self::SpreadPercent => "spread_percent",
            Self::Open => "open",
            Self::High => "high",
            Self::Low => "low",
            Self::PrevClose => "prev_close",
            Self::DayVolume => "day_volume",
            Self::ChangePercent => "change_percent",
            Self::ChangeFromOpen => "change_from_open",
            Self::GapPercent => "gap_percent",
            Self::VolumeToday => "volume_today",
            Self::Vol1Min => "vol_1min",
            Self::Vol5Min => "vol_5min",
            Self::Vol10Min => "vol_10min",
            Self::Vol15Min => "vol_15min",
            Self::Vol30Min => "vol_30min",
            Self::Chg1Min => "chg_1min",
            Self::Chg5Min => "chg_5min",
            Self::Chg10Min => "chg_10min",
            Self::Chg15Min => "chg_15min",
            Self::Chg30Min => "chg_30min",
            Self::Chg60Min => "chg_60min",
            Self::IntradayHigh => "intraday_high",
            Self::IntradayLow => "intraday_low",
            Self::PriceFromIntradayHigh => "price_from_intraday_high",
            Self::PriceFromIntradayLow => "price_from_intraday_low",
            Self::High52W => "high_52w",
            Self::Low52W => "low_52w",
            Self::Rvol => "rvol",
            Self::Atr => "atr",
            Self::AtrPercent => "atr_percent",
            Self::Vwap => "vwap",
            Self::PriceVsVwap => "price_vs_vwap",
            Self::TradesToday => "trades_today",
            Self::AvgTrades5D => "avg_trades_5d",
            Self::TradesZScore => "trades_z_score",
            Self::IsTradeAnomaly => "is_trade_anomaly",
            Self::Sector => "sector",
            Self::Industry => "industry",
            Self::Exchange => "exchange",
            Self::SecurityType => "security_type",
            Self::MarketCap => "market_cap",
            Self::FreeFloat => "free_float",
            Self::SharesOutstanding => "shares_outstanding",
            Self::IsEtf => "is_etf",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Field {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl EnrichedTicker {
    /// Read one field by id. Absent values return `None`; rules treat `None`
    /// as non-matching unless the condition is an explicit null-test.
    pub fn field(&self, field: Field) -> Option<FieldValue<'_>> {
        use FieldValue::{Flag, Num, Text};
        match field {
            Field::Price => self.price.map(Num),
            Field::Bid => self.bid.map(Num),
            Field::Ask => self.ask.map(Num),
            Field::Spread => self.spread.map(Num),
            Field::SpreadPercent => self.spread_percent.map(Num),
            Field::Open => self.open.map(Num),
            Field::High => self.high.map(Num),
            Field::Low => self.low.map(Num),
            Field::PrevClose => self.prev_close.map(Num),
            Field::DayVolume => self.day_volume.map(Num),
            Field::ChangePercent => self.change_percent.map(Num),
            Field::ChangeFromOpen => self.change_from_open.map(Num),
            Field::GapPercent => self.gap_percent.map(Num),
            Field::VolumeToday => self.volume_today.map(Num),
            Field::Vol1Min => self.vol_1min.map(Num),
            Field::Vol5Min => self.vol_5min.map(Num),
            Field::Vol10Min => self.vol_10min.map(Num),
            Field::Vol15Min => self.vol_15min.map(Num),
            Field::Vol30Min => self.vol_30min.map(Num),
            Field::Chg1Min => self.chg_1min.map(Num),
            Field::Chg5Min => self.chg_5min.map(Num),
            Field::Chg10Min => self.chg_10min.map(Num),
            Field::Chg15Min => self.chg_15min.map(Num),
            Field::Chg30Min => self.chg_30min.map(Num),
            Field::Chg60Min => self.chg_60min.map(Num),
            Field::IntradayHigh => self.intraday_high.map(Num),
            Field::IntradayLow => self.intraday_low.map(Num),
            Field::PriceFromIntradayHigh => self.price_from_intraday_high.map(Num),
            Field::PriceFromIntradayLow => self.price_from_intraday_low.map(Num),
            Field::High52W => self.high_52w.map(Num),
            Field::Low52W => self.low_52w.map(Num),
            Field::Rvol => self.rvol.map(Num),
            Field::Atr => self.atr.map(Num),
            Field::AtrPercent => self.atr_percent.map(Num),
            Field::Vwap => self.vwap.map(Num),
            Field::PriceVsVwap => self.price_vs_vwap.map(Num),
            Field::TradesToday => self.trades_today.map(|v| Num(v as f64)),
            Field::AvgTrades5D => self.avg_trades_5d.map(Num),
            Field::TradesZScore => self.trades_z_score.map(Num),
            Field::IsTradeAnomaly => Some(Flag(self.is_trade_anomaly)),
            Field::Sector => self.sector.as_deref().map(Text),
            Field::Industry => self.industry.as_deref().map(Text),
            Field::Exchange => self.exchange.as_deref().map(Text),
            Field::SecurityType => self.security_type.as_deref().map(Text),
            Field::MarketCap => self.market_cap.map(Num),
            Field::FreeFloat => self.free_float.map(Num),
            Field::SharesOutstanding => self.shares_outstanding.map(Num),
            Field::IsEtf => self.is_etf.map(Flag),
        }
    }
}

// =============================================================================
// Rounding helpers
// =============================================================================
// Derived values are rounded before serialization so that float jitter does
// not defeat byte-level change detection.

/// Round to 2 decimal places (percent fields, RVOL, Z-scores).
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Round to 4 decimal places (price-scale fields like spread).
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
