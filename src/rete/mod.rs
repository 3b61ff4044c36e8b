// =============================================================================
// RETE Module
// =============================================================================
//
// Shared discrimination network that classifies every enriched ticker
// against the system categories and all user scans in a single pass:
// - model:        conditions, rules, nodes, and the network itself
// - compiler:     full compile + incremental add/remove with alpha sharing
// - evaluator:    the alpha → beta → terminal evaluation pass
// - system_rules: the ten built-in categories
// - user_rules:   stored-filter parameter conversion
// - manager:      lifecycle, hot reload, and the evaluation API

pub mod compiler;
pub mod evaluator;
pub mod manager;
pub mod model;
pub mod system_rules;
pub mod user_rules;

pub use manager::ReteManager;
pub use model::{CondValue, Condition, Operator, ReteNetwork, RuleOwner, ScanRule};
