// Evaluator for `decision_tree` rules: a recursive node structure where a
// leaf carries `result`/`reason` and an interior node branches on a single
// condition. Traversal records the decision taken at every step.

use serde::Serialize;
use serde_json::Value;

use crate::decision_table::eval_field_op;
use crate::value::{lookup_path, truthy, value_to_string};

/// Result of walking a decision tree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeOutcome {
    pub result: bool,
    pub reason: String,
    /// Human-readable decisions taken on the way down.
    pub path: Vec<String>,
    /// The node traversal stopped at.
    pub final_node: Value,
}

/// Traverse a decision tree against a context.
pub fn traverse_tree(tree: &Value, context: &Value) -> TreeOutcome {
    walk(tree, context, Vec::new())
}

fn walk(node: &Value, context: &Value, path: Vec<String>) -> TreeOutcome {
    // Leaf nodes carry a result.
    if let Some(result) = node.get("result") {
        let reason = node
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("Leaf node reached")
            .to_string();
        return TreeOutcome {
            result: truthy(result),
            reason,
            path,
            final_node: node.clone(),
        };
    }

    let condition = node.get("condition").cloned().unwrap_or(Value::Null);
    let field = condition
        .get("field")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let operator = condition
        .get("operator")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let value = condition.get("value").cloned().unwrap_or(Value::Null);

    let field_value = lookup_path(context, field);
    let met = eval_field_op(field_value, operator, &value);

    let branch_key = if met { "true_branch" } else { "false_branch" };
    let Some(next) = node.get(branch_key) else {
        return TreeOutcome {
            result: false,
            reason: format!("No {branch_key} found at node"),
            path,
            final_node: node.clone(),
        };
    };

    let mut next_path = path;
    next_path.push(format!(
        "Condition: {field} {operator} {} = {met}",
        value_to_string(&value)
    ));

    walk(next, context, next_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn risk_tree() -> Value {
        json!({
            "condition": {"field": "transaction.amount", "operator": ">", "value": 10000},
            "true_branch": {
                "condition": {"field": "transaction.country", "operator": "=", "value": "IR"},
                "true_branch": {"result": false, "reason": "Sanctioned destination"},
                "false_branch": {"result": true, "reason": "Large but allowed"},
            },
            "false_branch": {"result": true, "reason": "Below review threshold"},
        })
    }

    #[test]
    fn traversal_reaches_the_expected_leaf() {
        let tree = risk_tree();

        let outcome = traverse_tree(&tree, &json!({"transaction": {"amount": 25000, "country": "IR"}}));
        assert!(!outcome.result);
        assert_eq!(outcome.reason, "Sanctioned destination");
        assert_eq!(outcome.path.len(), 2);
        assert_eq!(
            outcome.path[0],
            "Condition: transaction.amount > 10000 = true"
        );

        let outcome = traverse_tree(&tree, &json!({"transaction": {"amount": 50, "country": "IR"}}));
        assert!(outcome.result);
        assert_eq!(outcome.reason, "Below review threshold");
        assert_eq!(outcome.path.len(), 1);
    }

    #[test]
    fn missing_branch_fails_with_reason() {
        let tree = json!({
            "condition": {"field": "x", "operator": "=", "value": 1},
            "true_branch": {"result": true},
        });

        let outcome = traverse_tree(&tree, &json!({"x": 2}));
        assert!(!outcome.result);
        assert_eq!(outcome.reason, "No false_branch found at node");
    }

    #[test]
    fn leaf_without_reason_uses_default() {
        let outcome = traverse_tree(&json!({"result": true}), &json!({}));
        assert!(outcome.result);
        assert_eq!(outcome.reason, "Leaf node reached");
        assert!(outcome.path.is_empty());
    }
}
