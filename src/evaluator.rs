// Evaluator for parsed DSL rules. Pure over (AST, context): the context is
// never mutated and every internal failure is converted into a failed
// outcome rather than an error, so one bad rule can never abort a bundle
// run.

use chrono::{Duration, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

use crate::ast::{
    ActionNode, BoolOp, CompareOp, Condition, Consequence, PatternOp, RuleAst, RuleBody,
    TemporalOp, ValueNode,
};
use crate::value::{
    compare_values, resolve_path, truthy, value_as_datetime, value_as_seconds, value_to_string,
    values_equal,
};

/// Outcome of evaluating one rule against a context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalOutcome {
    pub result: bool,
    pub reason: String,
    pub details: Value,
}

/// Evaluator for DSL rule ASTs.
#[derive(Debug, Default)]
pub struct DslEvaluator;

impl DslEvaluator {
    pub fn new() -> Self {
        DslEvaluator
    }

    /// Evaluate a rule. If the condition does not hold the rule is
    /// inapplicable and passes with reason `Condition not met`.
    pub fn evaluate(&self, rule: &RuleAst, context: &Value) -> EvalOutcome {
        match evaluate_rule(rule, context) {
            Ok(outcome) => outcome,
            Err(message) => EvalOutcome {
                result: false,
                reason: format!("Evaluation error: {message}"),
                details: json!({ "error": message }),
            },
        }
    }
}

struct Eval {
    result: bool,
    details: Value,
}

type EvalResult = std::result::Result<Eval, String>;

fn evaluate_rule(rule: &RuleAst, context: &Value) -> std::result::Result<EvalOutcome, String> {
    let condition = eval_condition(&rule.condition, context)?;

    if !condition.result {
        return Ok(EvalOutcome {
            result: true,
            reason: "Condition not met".to_string(),
            details: condition.details,
        });
    }

    match &rule.body {
        RuleBody::Consequence { consequence } => {
            let outcome = eval_consequence(consequence, context)?;
            let reason = outcome
                .details
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("Consequence evaluated")
                .to_string();
            Ok(EvalOutcome {
                result: outcome.result,
                reason,
                details: json!({
                    "condition": condition.details,
                    "consequence": outcome.details,
                }),
            })
        }
        RuleBody::Action { action } => {
            let descriptor = eval_action(action, context);
            let reason = format!("Action executed: {}", action.action_type.keyword());
            Ok(EvalOutcome {
                result: true,
                reason,
                details: json!({
                    "condition": condition.details,
                    "action": descriptor,
                }),
            })
        }
    }
}

fn eval_condition(condition: &Condition, context: &Value) -> EvalResult {
    match condition {
        Condition::SimpleCondition {
            left,
            operator,
            right,
            ..
        } => {
            let left_value = resolve_path(context, &left.name);
            let right_value = resolve_value(right, context);
            let result = apply_compare(*operator, &left_value, &right_value);
            Ok(Eval {
                result,
                details: json!({
                    "result": result,
                    "left": left_value,
                    "operator": operator.symbol(),
                    "right": right_value,
                }),
            })
        }
        Condition::ListCondition {
            variable, values, ..
        } => {
            let value = resolve_path(context, &variable.name);
            let list: Vec<Value> = values.iter().map(|v| resolve_value(v, context)).collect();
            let result = list.iter().any(|item| values_equal(&value, item));
            Ok(Eval {
                result,
                details: json!({
                    "result": result,
                    "variable": value,
                    "list": list,
                }),
            })
        }
        Condition::PatternCondition {
            variable,
            operator,
            pattern,
            ..
        } => {
            let text = value_to_string(&resolve_path(context, &variable.name));
            let pattern_text = value_to_string(&resolve_value(pattern, context));
            let result = match operator {
                PatternOp::Contains => text.contains(&pattern_text),
                PatternOp::Matches => match Regex::new(&pattern_text) {
                    Ok(re) => re.is_match(&text),
                    Err(_) => false,
                },
            };
            Ok(Eval {
                result,
                details: json!({
                    "result": result,
                    "variable": text,
                    "pattern": pattern_text,
                    "operator": operator,
                }),
            })
        }
        Condition::TemporalCondition {
            variable,
            operator,
            value,
            ..
        } => {
            let variable_value = resolve_path(context, &variable.name);
            let bound = resolve_value(value, context);
            let result = eval_temporal(*operator, &variable_value, &bound)?;
            Ok(Eval {
                result,
                details: json!({
                    "result": result,
                    "variable": variable_value,
                    "operator": operator,
                    "value": bound,
                }),
            })
        }
        Condition::CompoundCondition {
            left,
            operator,
            right,
            ..
        } => {
            let left_eval = eval_condition(left, context)?;
            // Short-circuit: the right side is only evaluated when it can
            // still change the outcome.
            let (result, right_details) = match operator {
                BoolOp::And if !left_eval.result => (false, Value::Null),
                BoolOp::Or if left_eval.result => (true, Value::Null),
                _ => {
                    let right_eval = eval_condition(right, context)?;
                    (right_eval.result, right_eval.details)
                }
            };
            Ok(Eval {
                result,
                details: json!({
                    "result": result,
                    "left": left_eval.details,
                    "right": right_details,
                    "operator": operator,
                }),
            })
        }
        Condition::NotCondition { condition, .. } => {
            let inner = eval_condition(condition, context)?;
            Ok(Eval {
                result: !inner.result,
                details: json!({
                    "result": !inner.result,
                    "inner": inner.details,
                }),
            })
        }
        Condition::VariableCondition { variable, .. } => {
            let value = resolve_path(context, &variable.name);
            let result = truthy(&value);
            Ok(Eval {
                result,
                details: json!({
                    "result": result,
                    "variable": value,
                }),
            })
        }
    }
}

fn eval_consequence(consequence: &Consequence, context: &Value) -> EvalResult {
    match consequence {
        Consequence::Requirement {
            keyword, variable, ..
        } => {
            let value = resolve_path(context, &variable.name);
            let result = truthy(&value);
            Ok(Eval {
                result,
                details: json!({
                    "result": result,
                    "variable": value,
                    "requirement": keyword,
                }),
            })
        }
        Consequence::Constraint {
            variable,
            operator,
            value,
            ..
        } => {
            let variable_value = resolve_path(context, &variable.name);
            let bound = resolve_value(value, context);
            let result = apply_compare(*operator, &variable_value, &bound);
            Ok(Eval {
                result,
                details: json!({
                    "result": result,
                    "variable": variable_value,
                    "operator": operator.symbol(),
                    "value": bound,
                }),
            })
        }
        Consequence::InConstraint {
            variable,
            values,
            negated,
            ..
        } => {
            let value = resolve_path(context, &variable.name);
            let list: Vec<Value> = values.iter().map(|v| resolve_value(v, context)).collect();
            let contained = list.iter().any(|item| values_equal(&value, item));
            let result = if *negated { !contained } else { contained };
            Ok(Eval {
                result,
                details: json!({
                    "result": result,
                    "variable": value,
                    "list": list,
                }),
            })
        }
        Consequence::BetweenConstraint {
            variable,
            lower,
            upper,
            ..
        } => {
            let value = resolve_path(context, &variable.name);
            let lower_value = resolve_value(lower, context);
            let upper_value = resolve_value(upper, context);
            let result = compare_values(&lower_value, &value)
                .is_some_and(|ord| ord != std::cmp::Ordering::Greater)
                && compare_values(&value, &upper_value)
                    .is_some_and(|ord| ord != std::cmp::Ordering::Greater);
            Ok(Eval {
                result,
                details: json!({
                    "result": result,
                    "variable": value,
                    "lower": lower_value,
                    "upper": upper_value,
                }),
            })
        }
        Consequence::BooleanLiteral { value, .. } => Ok(Eval {
            result: *value,
            details: json!({
                "result": value,
                "reason": "Boolean literal",
            }),
        }),
        Consequence::VariableExpression { variable, .. } => {
            let value = resolve_path(context, &variable.name);
            let result = truthy(&value);
            Ok(Eval {
                result,
                details: json!({
                    "result": result,
                    "reason": format!("Variable expression: {}", value_to_string(&value)),
                    "variable": value,
                }),
            })
        }
        Consequence::NotExpression { expression, .. } => {
            let inner = eval_consequence(expression, context)?;
            Ok(Eval {
                result: !inner.result,
                details: json!({
                    "result": !inner.result,
                    "inner": inner.details,
                }),
            })
        }
        Consequence::CompoundExpression {
            left,
            operator,
            right,
            ..
        } => {
            let left_eval = eval_consequence(left, context)?;
            let (result, right_details) = match operator {
                BoolOp::And if !left_eval.result => (false, Value::Null),
                BoolOp::Or if left_eval.result => (true, Value::Null),
                _ => {
                    let right_eval = eval_consequence(right, context)?;
                    (right_eval.result, right_eval.details)
                }
            };
            Ok(Eval {
                result,
                details: json!({
                    "result": result,
                    "left": left_eval.details,
                    "right": right_details,
                    "operator": operator,
                }),
            })
        }
    }
}

fn eval_action(action: &ActionNode, context: &Value) -> Value {
    let value = resolve_path(context, &action.variable.name);
    json!({
        "action_type": action.action_type.keyword(),
        "variable": value,
        "executed": true,
    })
}

/// Materialize a value node, resolving variable references against the
/// context.
fn resolve_value(node: &ValueNode, context: &Value) -> Value {
    match node {
        ValueNode::StringValue { value, .. } => Value::String(value.clone()),
        ValueNode::NumberValue { value, .. } => Value::Number(value.clone()),
        ValueNode::BooleanValue { value, .. } => Value::Bool(*value),
        ValueNode::DatetimeValue { value, .. } => Value::String(value.clone()),
        ValueNode::Variable { name, .. } => resolve_path(context, name),
    }
}

fn eval_temporal(
    operator: TemporalOp,
    variable_value: &Value,
    bound: &Value,
) -> std::result::Result<bool, String> {
    let variable_dt = value_as_datetime(variable_value);
    let bound_dt = value_as_datetime(bound);

    match operator {
        // Raw comparison only applies when neither side is a timestamp;
        // a timestamp against a non-timestamp has no meaningful order.
        TemporalOp::Before => match (variable_dt, bound_dt) {
            (Some(var), Some(bound)) => Ok(var < bound),
            (None, None) => raw_ordering(variable_value, bound)
                .map(|ord| ord == std::cmp::Ordering::Less),
            _ => Err(mixed_temporal_operands(variable_value, bound)),
        },
        TemporalOp::After => match (variable_dt, bound_dt) {
            (Some(var), Some(bound)) => Ok(var > bound),
            (None, None) => raw_ordering(variable_value, bound)
                .map(|ord| ord == std::cmp::Ordering::Greater),
            _ => Err(mixed_temporal_operands(variable_value, bound)),
        },
        TemporalOp::Within => match value_as_seconds(bound) {
            Some(seconds) => {
                let var = variable_dt.ok_or_else(|| {
                    format!(
                        "cannot interpret {} as a timestamp",
                        value_to_string(variable_value)
                    )
                })?;
                let elapsed = Utc::now().signed_duration_since(var);
                Ok(elapsed.num_milliseconds() as f64 / 1000.0 <= seconds)
            }
            None => Ok(false),
        },
        TemporalOp::ExpiresAfter => match value_as_seconds(bound) {
            Some(seconds) => {
                let var = variable_dt.ok_or_else(|| {
                    format!(
                        "cannot interpret {} as a timestamp",
                        value_to_string(variable_value)
                    )
                })?;
                let horizon = Utc::now() + Duration::milliseconds((seconds * 1000.0) as i64);
                Ok(var > horizon)
            }
            None => Ok(false),
        },
    }
}

fn raw_ordering(
    left: &Value,
    right: &Value,
) -> std::result::Result<std::cmp::Ordering, String> {
    compare_values(left, right).ok_or_else(|| {
        format!(
            "cannot compare {} with {}",
            value_to_string(left),
            value_to_string(right)
        )
    })
}

fn mixed_temporal_operands(left: &Value, right: &Value) -> String {
    format!(
        "cannot compare {} with {}",
        value_to_string(left),
        value_to_string(right)
    )
}

fn apply_compare(operator: CompareOp, left: &Value, right: &Value) -> bool {
    use std::cmp::Ordering;

    match operator {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Gt => compare_values(left, right) == Some(Ordering::Greater),
        CompareOp::Ge => {
            matches!(compare_values(left, right), Some(Ordering::Greater | Ordering::Equal))
        }
        CompareOp::Lt => compare_values(left, right) == Some(Ordering::Less),
        CompareOp::Le => {
            matches!(compare_values(left, right), Some(Ordering::Less | Ordering::Equal))
        }
        CompareOp::Like => like_match(&value_to_string(left), &value_to_string(right)),
    }
}

/// SQL-style pattern match: `%` is any run of characters, `_` any single
/// character; the pattern is anchored to the full string.
fn like_match(text: &str, pattern: &str) -> bool {
    let mut translated = String::with_capacity(pattern.len() + 4);
    translated.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => translated.push_str(".*"),
            '_' => translated.push('.'),
            other => translated.push(other),
        }
    }
    translated.push('$');

    match Regex::new(&translated) {
        Ok(re) => re.is_match(text),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use chrono::SecondsFormat;
    use serde_json::json;

    fn run(dsl: &str, context: Value) -> EvalOutcome {
        let ast = parse(dsl).unwrap();
        DslEvaluator::new().evaluate(&ast, &context)
    }

    #[test]
    fn condition_not_met_passes_rule() {
        let outcome = run(
            "WHEN user.age >= 18 THEN MUST account.is_active = TRUE",
            json!({"user": {"age": 16}, "account": {"is_active": false}}),
        );
        assert!(outcome.result);
        assert_eq!(outcome.reason, "Condition not met");
    }

    #[test]
    fn consent_conjunction_passes() {
        let outcome = run(
            "WHEN consent.processing_data THEN MUST consent.given = TRUE \
             AND consent.specific = TRUE AND consent.informed = TRUE",
            json!({"consent": {
                "processing_data": true,
                "given": true,
                "specific": true,
                "informed": true,
            }}),
        );
        assert!(outcome.result);
    }

    #[test]
    fn failed_constraint_fails_rule() {
        let outcome = run(
            "WHEN user.age >= 18 THEN MUST account.is_active = TRUE",
            json!({"user": {"age": 25}, "account": {"is_active": false}}),
        );
        assert!(!outcome.result);
    }

    #[test]
    fn action_records_descriptor() {
        let outcome = run(
            "WHEN transaction.amount > 10000 AND transaction.country IN ['IR', 'KP', 'SY'] \
             THEN DO FLAG transaction",
            json!({"transaction": {"amount": 25000, "country": "IR"}}),
        );
        assert!(outcome.result);
        assert_eq!(outcome.reason, "Action executed: FLAG");
        assert_eq!(outcome.details["action"]["action_type"], json!("FLAG"));
        assert_eq!(outcome.details["action"]["executed"], json!(true));
    }

    #[test]
    fn regex_match_enforces_consequence() {
        let outcome = run(
            r"WHEN email MATCHES '.*@bank\.com' THEN MUST user.is_verified = TRUE",
            json!({"email": "x@bank.com", "user": {"is_verified": false}}),
        );
        assert!(!outcome.result);
    }

    #[test]
    fn invalid_regex_is_false_not_error() {
        let outcome = run(
            "WHEN email MATCHES '[unclosed' THEN MUST user.is_verified = TRUE",
            json!({"email": "x@bank.com", "user": {"is_verified": false}}),
        );
        // Condition is false, so the rule is inapplicable.
        assert!(outcome.result);
        assert_eq!(outcome.reason, "Condition not met");
    }

    #[test]
    fn like_translates_sql_wildcards() {
        assert!(like_match("alice@example.com", "%@example.com"));
        assert!(like_match("card-1234", "card-12_4"));
        assert!(!like_match("alice@other.org", "%@example.com"));

        let outcome = run(
            "WHEN account.id LIKE 'ACC-%' THEN MUST account.verified = TRUE",
            json!({"account": {"id": "ACC-991", "verified": true}}),
        );
        assert!(outcome.result);
    }

    #[test]
    fn missing_variables_resolve_to_null_and_fail_comparisons() {
        let outcome = run(
            "WHEN user.age > 18 THEN MUST user.cleared = TRUE",
            json!({"other": 1}),
        );
        assert!(outcome.result);
        assert_eq!(outcome.reason, "Condition not met");
    }

    #[test]
    fn temporal_within_accepts_recent_timestamps() {
        let recent = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false);
        let outcome = run(
            "WHEN consent.date WITHIN 30 DAYS THEN MUST consent.valid = TRUE",
            json!({"consent": {"date": recent, "valid": true}}),
        );
        assert!(outcome.result);
        assert_ne!(outcome.reason, "Condition not met");
    }

    #[test]
    fn temporal_before_compares_timestamps() {
        let outcome = run(
            "WHEN record.ts BEFORE '2030-01-01T00:00:00+00:00' THEN MUST record.ok = TRUE",
            json!({"record": {"ts": "2024-06-01T00:00:00+00:00", "ok": true}}),
        );
        assert!(outcome.result);
        assert_ne!(outcome.reason, "Condition not met");
    }

    #[test]
    fn unparseable_temporal_operands_become_eval_errors() {
        let outcome = run(
            "WHEN record.ts BEFORE '2030-01-01T00:00:00+00:00' THEN MUST record.ok = TRUE",
            json!({"record": {"ts": 12, "ok": true}}),
        );
        assert!(!outcome.result);
        assert!(outcome.reason.starts_with("Evaluation error:"));
    }

    #[test]
    fn timestamp_against_non_timestamp_string_is_an_eval_error() {
        // The bound parses as a timestamp, the variable does not.
        let outcome = run(
            "WHEN record.ts BEFORE '2030-01-01T00:00:00+00:00' THEN MUST record.ok = TRUE",
            json!({"record": {"ts": "not-a-date", "ok": true}}),
        );
        assert!(!outcome.result);
        assert!(outcome.reason.starts_with("Evaluation error:"));

        // And the other way around.
        let outcome = run(
            "WHEN record.ts AFTER 'not-a-date' THEN MUST record.ok = TRUE",
            json!({"record": {"ts": "2025-06-01T00:00:00+00:00", "ok": true}}),
        );
        assert!(!outcome.result);
        assert!(outcome.reason.starts_with("Evaluation error:"));
    }

    #[test]
    fn two_non_timestamp_strings_fall_back_to_raw_comparison() {
        let outcome = run(
            "WHEN record.label BEFORE 'beta' THEN MUST record.ok = TRUE",
            json!({"record": {"label": "alpha", "ok": true}}),
        );
        assert!(outcome.result);
        assert_ne!(outcome.reason, "Condition not met");

        let outcome = run(
            "WHEN record.label BEFORE 'beta' THEN MUST record.ok = TRUE",
            json!({"record": {"label": "gamma", "ok": true}}),
        );
        assert!(outcome.result);
        assert_eq!(outcome.reason, "Condition not met");
    }

    #[test]
    fn requirement_resolves_truthiness() {
        let pass = run(
            "IF order.total > 0 THEN REQUIRE order.approved",
            json!({"order": {"total": 10, "approved": true}}),
        );
        assert!(pass.result);

        let fail = run(
            "IF order.total > 0 THEN REQUIRE order.approved",
            json!({"order": {"total": 10, "approved": false}}),
        );
        assert!(!fail.result);
    }

    #[test]
    fn not_in_constraint_rejects_membership() {
        let outcome = run(
            "WHEN payment.settled THEN MUST payment.country IN NOT ['KP', 'IR']",
            json!({"payment": {"settled": true, "country": "IR"}}),
        );
        assert!(!outcome.result);
    }

    #[test]
    fn between_is_inclusive() {
        let ctx = |v: i64| json!({"score": {"known": true, "value": v}});
        let dsl = "WHEN score.known THEN MUST score.value BETWEEN 0 AND 100";
        assert!(run(dsl, ctx(0)).result);
        assert!(run(dsl, ctx(100)).result);
        assert!(!run(dsl, ctx(101)).result);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let ast = parse("WHEN a.n > 1 THEN MUST a.ok = TRUE").unwrap();
        let ctx = json!({"a": {"n": 5, "ok": true}});
        let evaluator = DslEvaluator::new();
        assert_eq!(evaluator.evaluate(&ast, &ctx), evaluator.evaluate(&ast, &ctx));
    }
}
