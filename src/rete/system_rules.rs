// =============================================================================
// System Rules — the built-in scanner categories
// =============================================================================
//
// The definitive category set. Each category is a ScanRule with AND-joined
// conditions and a sort key; thresholds are percent units throughout
// (`price_from_intraday_high` is negative below HOD, zero at HOD;
// `price_vs_vwap` is percent distance from VWAP).
// =============================================================================

use crate::market_data::Field;

use super::model::{CondValue, Condition, Operator, RuleOwner, ScanRule};

fn category(
    name: &str,
    display: &str,
    conditions: Vec<Condition>,
    sort_field: Field,
    sort_descending: bool,
) -> ScanRule {
    ScanRule {
        id: format!("category:{name}"),
        owner_type: RuleOwner::System,
        owner_id: None,
        name: display.to_string(),
        conditions,
        enabled: true,
        priority: 0,
        sort_field: Some(sort_field),
        sort_descending,
    }
}

fn cond(field: Field, operator: Operator, value: f64) -> Condition {
    Condition::new(field, operator, CondValue::Num(value))
}

/// All system categories. No price floor on any of them — users narrow by
/// price with their own scans.
pub fn all() -> Vec<ScanRule> {
    vec![
        category(
            "gappers_up",
            "Gappers Up",
            vec![
                cond(Field::GapPercent, Operator::Gte, 2.0),
                cond(Field::VolumeToday, Operator::Gt, 0.0),
            ],
            Field::GapPercent,
            true,
        ),
        category(
            "gappers_down",
            "Gappers Down",
            vec![
                cond(Field::GapPercent, Operator::Lte, -2.0),
                cond(Field::VolumeToday, Operator::Gt, 0.0),
            ],
            Field::GapPercent,
            false,
        ),
        // Stocks running up near the high of day with volume behind them.
        // Thresholds stay loose enough to include large caps.
        category(
            "momentum_up",
            "Momentum Up",
            vec![
                cond(Field::PriceFromIntradayHigh, Operator::Gte, -1.0),
                cond(Field::ChangePercent, Operator::Gte, 1.0),
                cond(Field::PriceVsVwap, Operator::Gt, 0.0),
                cond(Field::Rvol, Operator::Gte, 1.5),
                cond(Field::VolumeToday, Operator::Gte, 100_000.0),
            ],
            Field::ChangePercent,
            true,
        ),
        // Mirror of momentum_up for stocks pressing the low of day.
        category(
            "momentum_down",
            "Momentum Down",
            vec![
                cond(Field::PriceFromIntradayLow, Operator::Lte, 1.0),
                cond(Field::ChangePercent, Operator::Lte, -1.0),
                cond(Field::PriceVsVwap, Operator::Lt, 0.0),
                cond(Field::Rvol, Operator::Gte, 1.5),
                cond(Field::VolumeToday, Operator::Gte, 100_000.0),
            ],
            Field::ChangePercent,
            false,
        ),
        category(
            "winners",
            "Winners",
            vec![
                cond(Field::ChangePercent, Operator::Gte, 5.0),
                cond(Field::Rvol, Operator::Gte, 1.5),
            ],
            Field::ChangePercent,
            true,
        ),
        category(
            "losers",
            "Losers",
            vec![
                cond(Field::ChangePercent, Operator::Lte, -5.0),
                cond(Field::Rvol, Operator::Gte, 1.5),
            ],
            Field::ChangePercent,
            false,
        ),
        category(
            "high_volume",
            "High Volume",
            vec![cond(Field::Rvol, Operator::Gte, 2.0)],
            Field::VolumeToday,
            true,
        ),
        category(
            "anomalies",
            "Anomalies",
            vec![cond(Field::TradesZScore, Operator::Gte, 3.0)],
            Field::TradesZScore,
            true,
        ),
        // Price within 0.1% of the intraday high.
        category(
            "new_highs",
            "New Highs",
            vec![
                cond(Field::PriceFromIntradayHigh, Operator::Gte, -0.1),
                cond(Field::VolumeToday, Operator::Gt, 0.0),
            ],
            Field::PriceFromIntradayHigh,
            true,
        ),
        // Price within 0.1% of the intraday low.
        category(
            "new_lows",
            "New Lows",
            vec![
                cond(Field::PriceFromIntradayLow, Operator::Lte, 0.1),
                cond(Field::VolumeToday, Operator::Gt, 0.0),
            ],
            Field::PriceFromIntradayLow,
            false,
        ),
    ]
}

/// Delta channel name for a rule id: system categories publish on the bare
/// category name, user scans on their full rule id.
pub fn channel_for(rule_id: &str) -> &str {
    rule_id.strip_prefix("category:").unwrap_or(rule_id)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::rete::compiler::compile_network;

    #[test]
    fn ten_categories_defined() {
        let rules = all();
        assert_eq!(rules.len(), 10);
        for rule in &rules {
            assert!(rule.id.starts_with("category:"));
            assert_eq!(rule.owner_type, RuleOwner::System);
            assert!(rule.enabled);
            assert!(!rule.conditions.is_empty());
            assert!(rule.sort_field.is_some());
        }
    }

    #[test]
    fn category_ids_are_unique() {
        let rules = all();
        let ids: std::collections::HashSet<&str> =
            rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), rules.len());
    }

    #[test]
    fn system_rules_compile_with_shared_alphas() {
        let rules = all();
        let network = compile_network(&rules);
        assert_eq!(network.system_rules, 10);
        // volume_today > 0 appears in four categories, rvol >= 1.5 in four,
        // volume_today >= 100000 in two — sharing must collapse them.
        let distinct: std::collections::HashSet<&str> = rules
            .iter()
            .flat_map(|r| r.conditions.iter().map(|c| c.key()))
            .collect();
        assert_eq!(network.alpha_nodes.len(), distinct.len());
        assert!(network.alpha_nodes.len() < 10 * 3);
    }

    #[test]
    fn channel_names_strip_category_prefix() {
        assert_eq!(channel_for("category:gappers_up"), "gappers_up");
        assert_eq!(channel_for("user:u1:scan:3"), "user:u1:scan:3");
    }
}
