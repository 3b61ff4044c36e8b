// =============================================================================
// RETE Evaluator — runs enriched tickers through the compiled network
// =============================================================================
//
// Evaluation is a three-step pass per ticker:
//   1. Every alpha node is evaluated exactly once against its field value.
//   2. Every beta node ANDs its parent alpha results.
//   3. Every terminal maps its parent beta result to the rule id.
//
// Absent ticker values never match a comparison; only the explicit null-test
// operators see them as interesting. This pass never suspends.
// =============================================================================

use std::collections::{HashMap, HashSet};

use crate::market_data::{EnrichedTicker, FieldValue};

use super::model::{CondValue, Condition, Operator, ReteNetwork, RuleOwner};

/// Evaluate a single condition against a ticker field value.
pub fn evaluate_condition(value: Option<FieldValue<'_>>, condition: &Condition) -> bool {
    // Null-tests are the only operators that care about absence itself.
    match condition.operator {
        Operator::IsNone => return value.is_none(),
        Operator::NotNone => return value.is_some(),
        _ => {}
    }

    let Some(value) = value else {
        return false;
    };

    match (condition.operator, &condition.value) {
        (Operator::Gt, CondValue::Num(rhs)) => as_num(value).is_some_and(|v| v > *rhs),
        (Operator::Gte, CondValue::Num(rhs)) => as_num(value).is_some_and(|v| v >= *rhs),
        (Operator::Lt, CondValue::Num(rhs)) => as_num(value).is_some_and(|v| v < *rhs),
        (Operator::Lte, CondValue::Num(rhs)) => as_num(value).is_some_and(|v| v <= *rhs),

        (Operator::Eq, rhs) => eq(value, rhs),
        (Operator::Neq, rhs) => !eq(value, rhs),

        (Operator::Between, CondValue::Range(lo, hi)) => {
            as_num(value).is_some_and(|v| *lo <= v && v <= *hi)
        }

        (Operator::In, CondValue::TextList(items)) => {
            as_text(value).is_some_and(|v| items.iter().any(|i| i == v))
        }
        (Operator::NotIn, CondValue::TextList(items)) => {
            as_text(value).is_some_and(|v| !items.iter().any(|i| i == v))
        }
        (Operator::In, CondValue::NumList(items)) => {
            as_num(value).is_some_and(|v| items.contains(&v))
        }
        (Operator::NotIn, CondValue::NumList(items)) => {
            as_num(value).is_some_and(|v| !items.contains(&v))
        }

        // Operator/operand type mismatch cannot match anything.
        _ => false,
    }
}

fn as_num(value: FieldValue<'_>) -> Option<f64> {
    match value {
        FieldValue::Num(v) => Some(v),
        _ => None,
    }
}

fn as_text(value: FieldValue<'_>) -> Option<&str> {
    match value {
        FieldValue::Text(s) => Some(s),
        _ => None,
    }
}

fn eq(value: FieldValue<'_>, rhs: &CondValue) -> bool {
    match (value, rhs) {
        (FieldValue::Num(v), CondValue::Num(r)) => v == *r,
        (FieldValue::Text(v), CondValue::Text(r)) => v == r,
        (FieldValue::Flag(v), CondValue::Flag(r)) => v == *r,
        _ => false,
    }
}

/// Evaluate one ticker against the whole network.
///
/// Returns `{rule_id: matched}` for every rule in the network.
pub fn evaluate_ticker(
    ticker: &EnrichedTicker,
    network: &ReteNetwork,
) -> HashMap<String, bool> {
    // Step 1: every alpha once.
    let mut alpha_results: HashMap<&str, bool> =
        HashMap::with_capacity(network.alpha_nodes.len());
    for (alpha_id, alpha) in &network.alpha_nodes {
        let value = ticker.field(alpha.condition.field);
        alpha_results.insert(alpha_id.as_str(), evaluate_condition(value, &alpha.condition));
    }

    // Step 2: beta = AND of parent alphas.
    let mut beta_results: HashMap<&str, bool> =
        HashMap::with_capacity(network.beta_nodes.len());
    for (beta_id, beta) in &network.beta_nodes {
        let all = beta
            .parent_alphas
            .iter()
            .all(|a| alpha_results.get(a.as_str()).copied().unwrap_or(false));
        beta_results.insert(beta_id.as_str(), all);
    }

    // Step 3: map terminals to rule ids.
    let mut matches = HashMap::with_capacity(network.terminal_nodes.len());
    for terminal in network.terminal_nodes.values() {
        let matched = beta_results
            .get(terminal.parent_beta.as_str())
            .copied()
            .unwrap_or(false);
        matches.insert(terminal.rule.id.clone(), matched);
    }
    matches
}

/// Rule ids that match a ticker.
pub fn matching_rules(ticker: &EnrichedTicker, network: &ReteNetwork) -> HashSet<String> {
    evaluate_ticker(ticker, network)
        .into_iter()
        .filter_map(|(rule_id, matched)| matched.then_some(rule_id))
        .collect()
}

/// Matching rules partitioned by owner:
/// `{"system": {...}, "user:<uid>": {...}, ...}`.
///
/// The `"system"` key is always present, even when empty.
pub fn matching_rules_by_owner(
    ticker: &EnrichedTicker,
    network: &ReteNetwork,
) -> HashMap<String, HashSet<String>> {
    let mut result: HashMap<String, HashSet<String>> = HashMap::new();
    result.insert("system".to_string(), HashSet::new());

    for (rule_id, matched) in evaluate_ticker(ticker, network) {
        if !matched {
            continue;
        }
        let Some(terminal_key) = network.rule_to_terminal.get(&rule_id) else {
            continue;
        };
        let Some(terminal) = network.terminal_nodes.get(terminal_key) else {
            continue;
        };
        let bucket = match terminal.rule.owner_type {
            RuleOwner::System => "system".to_string(),
            RuleOwner::User => {
                let owner = terminal.rule.owner_id.as_deref().unwrap_or("unknown");
                format!("user:{owner}")
            }
        };
        result.entry(bucket).or_default().insert(rule_id);
    }
    result
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Field;
    use crate::rete::compiler::compile_network;
    use crate::rete::model::ScanRule;
    use crate::rete::system_rules;

    fn cond(field: Field, op: Operator, value: CondValue) -> Condition {
        Condition::new(field, op, value)
    }

    fn ticker() -> EnrichedTicker {
        EnrichedTicker {
            symbol: "BBB".into(),
            price: Some(12.0),
            change_percent: Some(3.2),
            gap_percent: Some(1.0),
            volume_today: Some(500_000.0),
            price_from_intraday_high: Some(-0.41),
            price_from_intraday_low: Some(4.0),
            rvol: Some(1.8),
            vwap: Some(11.8),
            price_vs_vwap: Some(1.69),
            sector: Some("Technology".into()),
            ..Default::default()
        }
    }

    #[test]
    fn comparison_operators() {
        let t = ticker();
        let v = t.field(Field::ChangePercent);
        assert!(evaluate_condition(v, &cond(Field::ChangePercent, Operator::Gt, CondValue::Num(3.0))));
        assert!(evaluate_condition(v, &cond(Field::ChangePercent, Operator::Gte, CondValue::Num(3.2))));
        assert!(!evaluate_condition(v, &cond(Field::ChangePercent, Operator::Lt, CondValue::Num(3.2))));
        assert!(evaluate_condition(v, &cond(Field::ChangePercent, Operator::Lte, CondValue::Num(3.2))));
        assert!(evaluate_condition(v, &cond(Field::ChangePercent, Operator::Eq, CondValue::Num(3.2))));
        assert!(evaluate_condition(v, &cond(Field::ChangePercent, Operator::Neq, CondValue::Num(4.0))));
    }

    #[test]
    fn none_values_never_match_comparisons() {
        let t = ticker();
        for op in [Operator::Gt, Operator::Gte, Operator::Lt, Operator::Lte, Operator::Eq, Operator::Neq] {
            assert!(
                !evaluate_condition(t.field(Field::Atr), &cond(Field::Atr, op, CondValue::Num(1.0))),
                "None must not match {op}"
            );
        }
        assert!(!evaluate_condition(
            t.field(Field::Atr),
            &cond(Field::Atr, Operator::Between, CondValue::Range(0.0, 10.0))
        ));
    }

    #[test]
    fn null_test_operators() {
        let t = ticker();
        assert!(evaluate_condition(
            t.field(Field::Atr),
            &cond(Field::Atr, Operator::IsNone, CondValue::Null)
        ));
        assert!(!evaluate_condition(
            t.field(Field::Atr),
            &cond(Field::Atr, Operator::NotNone, CondValue::Null)
        ));
        assert!(evaluate_condition(
            t.field(Field::Price),
            &cond(Field::Price, Operator::NotNone, CondValue::Null)
        ));
    }

    #[test]
    fn between_is_inclusive() {
        let t = ticker();
        let v = t.field(Field::Price);
        assert!(evaluate_condition(v, &cond(Field::Price, Operator::Between, CondValue::Range(12.0, 20.0))));
        assert!(evaluate_condition(v, &cond(Field::Price, Operator::Between, CondValue::Range(5.0, 12.0))));
        assert!(!evaluate_condition(v, &cond(Field::Price, Operator::Between, CondValue::Range(12.01, 20.0))));
    }

    #[test]
    fn membership_operators() {
        let t = ticker();
        let v = t.field(Field::Sector);
        let list = CondValue::TextList(vec!["Energy".into(), "Technology".into()]);
        assert!(evaluate_condition(v, &cond(Field::Sector, Operator::In, list.clone())));
        assert!(!evaluate_condition(v, &cond(Field::Sector, Operator::NotIn, list)));

        let other = CondValue::TextList(vec!["Energy".into()]);
        assert!(!evaluate_condition(v, &cond(Field::Sector, Operator::In, other.clone())));
        assert!(evaluate_condition(v, &cond(Field::Sector, Operator::NotIn, other)));
    }

    #[test]
    fn numeric_membership() {
        let t = ticker();
        let v = t.field(Field::Price);
        let list = CondValue::NumList(vec![10.0, 12.0, 15.0]);
        assert!(evaluate_condition(v, &cond(Field::Price, Operator::In, list.clone())));
        assert!(!evaluate_condition(v, &cond(Field::Price, Operator::NotIn, list)));
    }

    #[test]
    fn rule_matches_iff_all_conditions_hold() {
        let network = compile_network(&system_rules::all());
        let matches = evaluate_ticker(&ticker(), &network);

        // momentum_up: all five conditions hold for this ticker.
        assert_eq!(matches.get("category:momentum_up"), Some(&true));
        // momentum_down: change_percent <= -1 fails.
        assert_eq!(matches.get("category:momentum_down"), Some(&false));
        // Cross-check against direct condition evaluation.
        for (rule_id, matched) in &matches {
            let terminal_key = network.rule_to_terminal.get(rule_id).unwrap();
            let rule = &network.terminal_nodes[terminal_key].rule;
            let direct = rule
                .conditions
                .iter()
                .all(|c| evaluate_condition(ticker().field(c.field), c));
            assert_eq!(direct, *matched, "mismatch for {rule_id}");
        }
    }

    #[test]
    fn owner_partition_groups_rules() {
        let mut rules = system_rules::all();
        rules.push(ScanRule {
            id: "user:u1:scan:1".into(),
            owner_type: RuleOwner::User,
            owner_id: Some("u1".into()),
            name: "cheap movers".into(),
            conditions: vec![cond(Field::Price, Operator::Between, CondValue::Range(5.0, 20.0))],
            enabled: true,
            priority: 0,
            sort_field: Some(Field::ChangePercent),
            sort_descending: true,
        });
        let network = compile_network(&rules);
        let by_owner = matching_rules_by_owner(&ticker(), &network);

        assert!(by_owner["system"].contains("category:momentum_up"));
        assert!(by_owner["user:u1"].contains("user:u1:scan:1"));
    }

    #[test]
    fn owner_partition_always_has_system_bucket() {
        let network = ReteNetwork::default();
        let by_owner = matching_rules_by_owner(&ticker(), &network);
        assert!(by_owner.contains_key("system"));
        assert!(by_owner["system"].is_empty());
    }
}
