// Evaluator for `decision_table` rules: a flat condition matrix that fires
// only when every row is satisfied, recording the actions that apply.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::value::{compare_values, lookup_path, value_to_string, values_equal};

/// Parsed `definition.table` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableDefinition {
    #[serde(default)]
    pub conditions: Vec<TableCondition>,
    #[serde(default)]
    pub actions: Vec<Value>,
}

/// One condition row: dotted field path, operator name, reference value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCondition {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

/// Result of evaluating a decision table.
#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    pub result: bool,
    pub reason: String,
    pub details: Value,
}

/// Evaluate a decision table against a context.
pub fn evaluate_table(table: &TableDefinition, context: &Value) -> TableOutcome {
    let mut all_met = true;
    let mut condition_results = Vec::with_capacity(table.conditions.len());

    for condition in &table.conditions {
        let field_value = lookup_path(context, &condition.field).cloned();
        let met = eval_field_op(field_value.as_ref(), &condition.operator, &condition.value);

        condition_results.push(json!({
            "field": condition.field,
            "operator": condition.operator,
            "value": condition.value,
            "field_value": field_value,
            "met": met,
        }));

        if !met {
            all_met = false;
        }
    }

    let mut action_results = Vec::new();
    if all_met {
        for action in &table.actions {
            let action_type = action.get("result").cloned().unwrap_or(Value::Bool(false));
            let reason = action
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("Decision table action");
            action_results.push(json!({
                "type": action_type,
                "reason": reason,
            }));
        }
    }

    TableOutcome {
        result: all_met,
        reason: if all_met {
            "Decision table conditions met".to_string()
        } else {
            "Decision table conditions not met".to_string()
        },
        details: json!({
            "conditions": condition_results,
            "actions": action_results,
        }),
    }
}

/// Apply a named operator to a field value. Unknown operators and type
/// mismatches are `false`, never errors.
pub fn eval_field_op(field_value: Option<&Value>, operator: &str, value: &Value) -> bool {
    use std::cmp::Ordering;

    let field_value = field_value.unwrap_or(&Value::Null);

    match operator {
        "=" => values_equal(field_value, value),
        "!=" => !values_equal(field_value, value),
        ">" | "exceeds" => compare_values(field_value, value) == Some(Ordering::Greater),
        ">=" => matches!(
            compare_values(field_value, value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "<" => compare_values(field_value, value) == Some(Ordering::Less),
        "<=" => matches!(
            compare_values(field_value, value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        "contains" => value_to_string(field_value).contains(&value_to_string(value)),
        _ => false,
    }
}
