// =============================================================================
// User Rules — converts stored filter rows into scan rules
// =============================================================================
//
// User filters arrive as rows whose `parameters` object carries bounded
// ranges over ticker fields. Recognition is an explicit whitelist generated
// from the published field set:
//
//   min_<field> / max_<field>  -> gte / lte / between conditions
//   security_type              -> eq
//   sectors / industries /
//   exchanges                  -> in
//
// Unknown keys are ignored by contract. A filter that yields zero conditions
// is discarded.
// =============================================================================

use serde_json::Value;
use tracing::warn;

use crate::db::UserFilterRow;
use crate::market_data::Field;

use super::model::{CondValue, Condition, Operator, RuleOwner, ScanRule};

/// Recognized `(min_key, max_key, field)` triples. A `None` max key means the
/// parameter only supports a lower bound.
const FILTER_FIELD_MAPPING: &[(&str, Option<&str>, Field)] = &[
    // Price & spread
    ("min_price", Some("max_price"), Field::Price),
    ("min_bid", Some("max_bid"), Field::Bid),
    ("min_ask", Some("max_ask"), Field::Ask),
    ("min_spread", Some("max_spread"), Field::Spread),
    ("min_spread_percent", Some("max_spread_percent"), Field::SpreadPercent),
    ("min_vwap", Some("max_vwap"), Field::Vwap),
    // Change %
    ("min_change_percent", Some("max_change_percent"), Field::ChangePercent),
    ("min_change_from_open", Some("max_change_from_open"), Field::ChangeFromOpen),
    ("min_gap_percent", Some("max_gap_percent"), Field::GapPercent),
    (
        "min_price_from_high",
        Some("max_price_from_high"),
        Field::PriceFromIntradayHigh,
    ),
    (
        "min_price_from_low",
        Some("max_price_from_low"),
        Field::PriceFromIntradayLow,
    ),
    // Volume
    ("min_rvol", Some("max_rvol"), Field::Rvol),
    ("min_volume", None, Field::VolumeToday),
    ("min_volume_today", None, Field::VolumeToday),
    ("min_day_volume", Some("max_day_volume"), Field::DayVolume),
    // Volume windows
    ("min_vol_1min", Some("max_vol_1min"), Field::Vol1Min),
    ("min_vol_5min", Some("max_vol_5min"), Field::Vol5Min),
    ("min_vol_10min", Some("max_vol_10min"), Field::Vol10Min),
    ("min_vol_15min", Some("max_vol_15min"), Field::Vol15Min),
    ("min_vol_30min", Some("max_vol_30min"), Field::Vol30Min),
    // Time-window changes
    ("min_chg_1min", Some("max_chg_1min"), Field::Chg1Min),
    ("min_chg_5min", Some("max_chg_5min"), Field::Chg5Min),
    ("min_chg_10min", Some("max_chg_10min"), Field::Chg10Min),
    ("min_chg_15min", Some("max_chg_15min"), Field::Chg15Min),
    ("min_chg_30min", Some("max_chg_30min"), Field::Chg30Min),
    ("min_chg_60min", Some("max_chg_60min"), Field::Chg60Min),
    // Technical
    ("min_atr", Some("max_atr"), Field::Atr),
    ("min_atr_percent", Some("max_atr_percent"), Field::AtrPercent),
    ("min_price_vs_vwap", Some("max_price_vs_vwap"), Field::PriceVsVwap),
    // 52-week
    ("min_high_52w", Some("max_high_52w"), Field::High52W),
    ("min_low_52w", Some("max_low_52w"), Field::Low52W),
    // Trades
    ("min_trades_today", Some("max_trades_today"), Field::TradesToday),
    ("min_avg_trades_5d", Some("max_avg_trades_5d"), Field::AvgTrades5D),
    ("min_trades_z_score", Some("max_trades_z_score"), Field::TradesZScore),
    // Fundamentals
    ("min_market_cap", Some("max_market_cap"), Field::MarketCap),
    ("min_float", Some("max_float"), Field::FreeFloat),
    ("min_float_shares", Some("max_float_shares"), Field::FreeFloat),
    (
        "min_shares_outstanding",
        Some("max_shares_outstanding"),
        Field::SharesOutstanding,
    ),
];

fn num_param(params: &Value, key: &str) -> Option<f64> {
    params.get(key).and_then(Value::as_f64).filter(|v| v.is_finite())
}

fn list_param(params: &Value, key: &str) -> Option<Vec<String>> {
    let items: Vec<String> = params
        .get(key)?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str())
        .map(str::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}

/// Convert a `parameters` object into conditions using the whitelist.
pub fn params_to_conditions(params: &Value) -> Vec<Condition> {
    let mut conditions = Vec::new();

    for (min_key, max_key, field) in FILTER_FIELD_MAPPING {
        let min_val = num_param(params, min_key);
        let max_val = max_key.and_then(|k| num_param(params, k));

        match (min_val, max_val) {
            (Some(lo), Some(hi)) => conditions.push(Condition::new(
                *field,
                Operator::Between,
                CondValue::Range(lo, hi),
            )),
            (Some(lo), None) => {
                conditions.push(Condition::new(*field, Operator::Gte, CondValue::Num(lo)))
            }
            (None, Some(hi)) => {
                conditions.push(Condition::new(*field, Operator::Lte, CondValue::Num(hi)))
            }
            (None, None) => {}
        }
    }

    if let Some(security_type) = params
        .get("security_type")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        conditions.push(Condition::new(
            Field::SecurityType,
            Operator::Eq,
            CondValue::Text(security_type.to_string()),
        ));
    }

    for (key, field) in [
        ("sectors", Field::Sector),
        ("industries", Field::Industry),
        ("exchanges", Field::Exchange),
    ] {
        if let Some(items) = list_param(params, key) {
            conditions.push(Condition::new(
                field,
                Operator::In,
                CondValue::TextList(items),
            ));
        }
    }

    conditions
}

/// Convert one stored filter row into a ScanRule. Returns `None` when the
/// parameters yield no conditions (the row is skipped with a warning).
pub fn row_to_scan_rule(row: &UserFilterRow) -> Option<ScanRule> {
    let conditions = params_to_conditions(&row.parameters);
    if conditions.is_empty() {
        warn!(
            filter_id = row.id,
            user_id = %row.user_id,
            "user filter has no recognized conditions — skipping"
        );
        return None;
    }

    Some(ScanRule {
        id: format!("user:{}:scan:{}", row.user_id, row.id),
        owner_type: RuleOwner::User,
        owner_id: Some(row.user_id.clone()),
        name: row.name.clone(),
        conditions,
        enabled: row.enabled,
        priority: row.priority,
        sort_field: Some(Field::ChangePercent),
        sort_descending: true,
    })
}

/// Convert a batch of rows, dropping the unusable ones.
pub fn convert_rows(rows: &[UserFilterRow]) -> Vec<ScanRule> {
    rows.iter().filter_map(row_to_scan_rule).collect()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: i64, params: Value) -> UserFilterRow {
        UserFilterRow {
            id,
            user_id: "u1".into(),
            name: format!("scan {id}"),
            enabled: true,
            filter_type: "custom".into(),
            parameters: params,
            priority: 0,
        }
    }

    #[test]
    fn min_and_max_become_between() {
        let conditions =
            params_to_conditions(&json!({ "min_price": 5.0, "max_price": 10.0, "min_rvol": 2.0 }));
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].key(), "price:between:5.0000,10.0000");
        assert_eq!(conditions[1].key(), "rvol:gte:2.0000");
    }

    #[test]
    fn lone_bounds_become_gte_or_lte() {
        let conditions =
            params_to_conditions(&json!({ "max_gap_percent": -2.0, "min_volume": 100000 }));
        assert_eq!(conditions.len(), 2);
        let keys: Vec<&str> = conditions.iter().map(|c| c.key()).collect();
        assert!(keys.contains(&"volume_today:gte:100000.0000"));
        assert!(keys.contains(&"gap_percent:lte:-2.0000"));
    }

    #[test]
    fn list_keys_become_membership_conditions() {
        let conditions = params_to_conditions(&json!({
            "security_type": " CS ",
            "sectors": ["Technology", "Energy"],
            "exchanges": ["XNAS"]
        }));
        assert_eq!(conditions.len(), 3);
        assert_eq!(conditions[0].key(), "security_type:eq:CS");
        assert_eq!(conditions[1].key(), "sector:in:Energy,Technology");
        assert_eq!(conditions[2].key(), "exchange:in:XNAS");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let conditions = params_to_conditions(&json!({
            "min_price": 1.0,
            "min_warp_factor": 9.0,
            "frobnicate": true
        }));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].field, Field::Price);
    }

    #[test]
    fn empty_and_non_numeric_params_yield_nothing() {
        assert!(params_to_conditions(&json!({})).is_empty());
        assert!(params_to_conditions(&json!({ "min_price": "abc" })).is_empty());
        assert!(params_to_conditions(&json!({ "sectors": [] })).is_empty());
        assert!(params_to_conditions(&json!({ "security_type": "  " })).is_empty());
    }

    #[test]
    fn row_conversion_builds_prefixed_rule_id() {
        let rule = row_to_scan_rule(&row(7, json!({ "min_price": 5.0 }))).unwrap();
        assert_eq!(rule.id, "user:u1:scan:7");
        assert_eq!(rule.owner_type, RuleOwner::User);
        assert_eq!(rule.owner_id.as_deref(), Some("u1"));
        assert_eq!(rule.sort_field, Some(Field::ChangePercent));
    }

    #[test]
    fn zero_condition_rows_are_discarded() {
        assert!(row_to_scan_rule(&row(8, json!({}))).is_none());
        let rules = convert_rows(&[
            row(1, json!({ "min_price": 5.0 })),
            row(2, json!({})),
            row(3, json!({ "min_rvol": 2.0 })),
        ]);
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn float_aliases_map_to_free_float() {
        let a = params_to_conditions(&json!({ "min_float": 1000000.0 }));
        let b = params_to_conditions(&json!({ "min_float_shares": 1000000.0 }));
        assert_eq!(a[0].key(), b[0].key());
        assert_eq!(a[0].field, Field::FreeFloat);
    }
}
