// =============================================================================
// RETE Compiler — builds and incrementally edits the rule network
// =============================================================================
//
// Compilation shares alpha nodes between rules with identical canonical
// condition keys: if a thousand rules test `price > 1.0`, exactly one alpha
// node exists for that condition and every matching beta hangs off it.
//
// Removal detaches the rule's beta from its parent alphas but keeps alphas
// alive even when they lose their last child. This trades graph hygiene for
// cheap re-adds; long-running processes can recompile to compact.
// =============================================================================

use std::collections::HashSet;

use super::model::{
    AlphaNode, BetaNode, ReteNetwork, RuleOwner, ScanRule, TerminalNode,
};

fn alpha_id(condition_key: &str) -> String {
    format!("alpha:{condition_key}")
}

fn beta_id(rule_id: &str) -> String {
    format!("beta:{rule_id}")
}

fn terminal_id(rule_id: &str) -> String {
    format!("terminal:{rule_id}")
}

/// Compile a rule set into a fresh network. Disabled rules are skipped.
pub fn compile_network(rules: &[ScanRule]) -> ReteNetwork {
    let mut network = ReteNetwork::default();
    for rule in rules {
        if rule.enabled {
            insert_rule(&mut network, rule.clone());
        }
    }
    network
}

/// Add one rule to an existing network. An already-present rule id is
/// replaced (remove then re-add), which is what hot-reload wants.
pub fn add_rule(network: &mut ReteNetwork, rule: ScanRule) {
    if !rule.enabled {
        return;
    }
    if network.rule_to_terminal.contains_key(&rule.id) {
        remove_rule(network, &rule.id);
    }
    insert_rule(network, rule);
}

fn insert_rule(network: &mut ReteNetwork, rule: ScanRule) {
    let mut alpha_ids = Vec::with_capacity(rule.conditions.len());

    for condition in &rule.conditions {
        let key = condition.key().to_string();
        let id = match network.condition_to_alpha.get(&key) {
            Some(existing) => existing.clone(),
            None => {
                let id = alpha_id(&key);
                network.alpha_nodes.insert(
                    id.clone(),
                    AlphaNode {
                        id: id.clone(),
                        condition: condition.clone(),
                        children: HashSet::new(),
                    },
                );
                network.condition_to_alpha.insert(key, id.clone());
                id
            }
        };
        alpha_ids.push(id);
    }

    let beta = beta_id(&rule.id);
    for id in &alpha_ids {
        if let Some(alpha) = network.alpha_nodes.get_mut(id) {
            alpha.children.insert(beta.clone());
        }
    }

    let terminal = terminal_id(&rule.id);
    let mut children = HashSet::new();
    children.insert(terminal.clone());
    network.beta_nodes.insert(
        beta.clone(),
        BetaNode {
            id: beta.clone(),
            rule_id: rule.id.clone(),
            parent_alphas: alpha_ids,
            children,
        },
    );

    network.rule_to_terminal.insert(rule.id.clone(), terminal.clone());

    match rule.owner_type {
        RuleOwner::System => network.system_rules += 1,
        RuleOwner::User => network.user_rules += 1,
    }
    network.total_rules += 1;

    network.terminal_nodes.insert(
        terminal.clone(),
        TerminalNode {
            id: terminal,
            rule,
            parent_beta: beta,
        },
    );
}

/// Remove a rule by id. Returns `false` if the rule was not present.
///
/// Parent alphas are detached but retained even when childless, so a
/// subsequent re-add with the same conditions reuses them.
pub fn remove_rule(network: &mut ReteNetwork, rule_id: &str) -> bool {
    let Some(terminal_key) = network.rule_to_terminal.get(rule_id).cloned() else {
        return false;
    };
    let Some(terminal) = network.terminal_nodes.remove(&terminal_key) else {
        network.rule_to_terminal.remove(rule_id);
        return false;
    };

    if let Some(beta) = network.beta_nodes.remove(&terminal.parent_beta) {
        for alpha_key in &beta.parent_alphas {
            if let Some(alpha) = network.alpha_nodes.get_mut(alpha_key) {
                alpha.children.remove(&beta.id);
            }
        }
    }

    network.rule_to_terminal.remove(rule_id);

    match terminal.rule.owner_type {
        RuleOwner::System => network.system_rules -= 1,
        RuleOwner::User => network.user_rules -= 1,
    }
    network.total_rules -= 1;

    true
}
