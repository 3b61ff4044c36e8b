// =============================================================================
// Rule Model — conditions, scan rules, and the RETE node graph
// =============================================================================
//
// A scan rule is an AND of conditions over enriched ticker fields. Rules
// compile into a discrimination network of three node classes:
//
//   AlphaNode    — one condition, shared by every rule that uses it
//   BetaNode     — one rule, matches iff all parent alphas match
//   TerminalNode — carries the ScanRule reported when its beta matches
//
// Alpha sharing is keyed by the condition's canonical key, computed once at
// construction: `field:op:normalized_value` with fixed-precision numbers and
// sorted lists, so semantically identical conditions collapse to one node.
// =============================================================================

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::market_data::Field;

// =============================================================================
// Operators
// =============================================================================

/// Comparison operator applied by an alpha node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
    Between,
    In,
    NotIn,
    IsNone,
    NotNone,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Between => "between",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::IsNone => "is_none",
            Self::NotNone => "not_none",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Condition values
// =============================================================================

/// Operand carried by a condition. `Null` is used by the null-test operators
/// which take no operand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CondValue {
    Num(f64),
    Text(String),
    Flag(bool),
    Range(f64, f64),
    NumList(Vec<f64>),
    TextList(Vec<String>),
    Null,
}

impl CondValue {
    /// Deterministic string form used in canonical keys. Numbers are printed
    /// with fixed precision and lists are sorted so that equal-meaning values
    /// always produce equal keys.
    fn canonical(&self) -> String {
        match self {
            Self::Num(v) => format!("{v:.4}"),
            Self::Text(s) => s.clone(),
            Self::Flag(b) => b.to_string(),
            Self::Range(lo, hi) => format!("{lo:.4},{hi:.4}"),
            Self::NumList(items) => {
                let mut sorted = items.clone();
                sorted.sort_by(|a, b| a.total_cmp(b));
                sorted
                    .iter()
                    .map(|v| format!("{v:.4}"))
                    .collect::<Vec<_>>()
                    .join(",")
            }
            Self::TextList(items) => {
                let mut sorted = items.clone();
                sorted.sort();
                sorted.join(",")
            }
            Self::Null => String::new(),
        }
    }
}

// =============================================================================
// Condition
// =============================================================================

/// A single `(field, operator, value)` test. The canonical key is computed
/// once here and reused by the compiler for alpha-node sharing.
#[derive(Debug, Clone, Serialize)]
pub struct Condition {
    pub field: Field,
    pub operator: Operator,
    pub value: CondValue,
    key: String,
}

impl Condition {
    pub fn new(field: Field, operator: Operator, value: CondValue) -> Self {
        let key = format!(
            "{}:{}:{}",
            field.name(),
            operator.as_str(),
            value.canonical()
        );
        Self {
            field,
            operator,
            value,
            key,
        }
    }

    /// Canonical key `field:op:normalized_value`. Two conditions with the
    /// same key are semantically identical.
    pub fn key(&self) -> &str {
        &self.key
    }
}

// =============================================================================
// ScanRule
// =============================================================================

/// Who owns a rule: a built-in system category or a user scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOwner {
    System,
    User,
}

/// An owner-tagged AND-of-conditions with a stable id and sort key.
///
/// System rule ids are `category:<name>`; user rule ids are
/// `user:<uid>:scan:<n>`.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRule {
    pub id: String,
    pub owner_type: RuleOwner,
    pub owner_id: Option<String>,
    pub name: String,
    pub conditions: Vec<Condition>,
    pub enabled: bool,
    pub priority: i64,
    pub sort_field: Option<Field>,
    pub sort_descending: bool,
}

// =============================================================================
// Network nodes
// =============================================================================

#[derive(Debug, Clone)]
pub struct AlphaNode {
    pub id: String,
    pub condition: Condition,
    pub children: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct BetaNode {
    pub id: String,
    pub rule_id: String,
    pub parent_alphas: Vec<String>,
    pub children: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct TerminalNode {
    pub id: String,
    pub rule: ScanRule,
    pub parent_beta: String,
}

// =============================================================================
// ReteNetwork
// =============================================================================

/// Compiled rule network plus the indices that keep compilation incremental:
/// `condition_to_alpha` drives alpha sharing and `rule_to_terminal` drives
/// removal and hot-reload lookups.
#[derive(Debug, Clone, Default)]
pub struct ReteNetwork {
    pub alpha_nodes: HashMap<String, AlphaNode>,
    pub beta_nodes: HashMap<String, BetaNode>,
    pub terminal_nodes: HashMap<String, TerminalNode>,
    pub condition_to_alpha: HashMap<String, String>,
    pub rule_to_terminal: HashMap<String, String>,
    pub total_rules: usize,
    pub system_rules: usize,
    pub user_rules: usize,
}

/// Node and rule counts reported on the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStats {
    pub total_rules: usize,
    pub system_rules: usize,
    pub user_rules: usize,
    pub alpha_nodes: usize,
    pub beta_nodes: usize,
    pub terminal_nodes: usize,
}

impl ReteNetwork {
    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            total_rules: self.total_rules,
            system_rules: self.system_rules,
            user_rules: self.user_rules,
            alpha_nodes: self.alpha_nodes.len(),
            beta_nodes: self.beta_nodes.len(),
            terminal_nodes: self.terminal_nodes.len(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_fixed_precision() {
        let c = Condition::new(Field::GapPercent, Operator::Gte, CondValue::Num(2.0));
        assert_eq!(c.key(), "gap_percent:gte:2.0000");
    }

    #[test]
    fn canonical_key_sorts_lists() {
        let a = Condition::new(
            Field::Sector,
            Operator::In,
            CondValue::TextList(vec!["Tech".into(), "Energy".into()]),
        );
        let b = Condition::new(
            Field::Sector,
            Operator::In,
            CondValue::TextList(vec!["Energy".into(), "Tech".into()]),
        );
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn canonical_key_sorts_numeric_lists() {
        let a = Condition::new(
            Field::Price,
            Operator::In,
            CondValue::NumList(vec![10.0, 5.0]),
        );
        assert_eq!(a.key(), "price:in:5.0000,10.0000");
    }

    #[test]
    fn canonical_key_range() {
        let c = Condition::new(
            Field::Price,
            Operator::Between,
            CondValue::Range(5.0, 10.0),
        );
        assert_eq!(c.key(), "price:between:5.0000,10.0000");
    }

    #[test]
    fn identical_conditions_share_keys() {
        let a = Condition::new(Field::Rvol, Operator::Gte, CondValue::Num(1.5));
        let b = Condition::new(Field::Rvol, Operator::Gte, CondValue::Num(1.5));
        assert_eq!(a.key(), b.key());

        let c = Condition::new(Field::Rvol, Operator::Gte, CondValue::Num(2.0));
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn null_test_key_has_empty_operand() {
        let c = Condition::new(Field::Atr, Operator::NotNone, CondValue::Null);
        assert_eq!(c.key(), "atr:not_none:");
    }
}
