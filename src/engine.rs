// Rule engine: executes every rule of a DecisionBundle against one
// execution context, dispatching to the evaluator matching the rule type
// (DSL, expression, decision table, decision tree, or a registered custom
// handler). Outcomes are memoized per (rule id, visible context data); a
// rule failure never aborts the run.

use std::collections::HashMap;

use log::{debug, info};
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::bundle::{DecisionBundle, Rule};
use crate::canonical::{canonicalize, md5_hex, utc_now_iso};
use crate::decision_table::{evaluate_table, TableDefinition};
use crate::decision_tree::traverse_tree;
use crate::error::{GlassBoxError, Result};
use crate::evaluator::DslEvaluator;
use crate::expression::ExpressionEvaluator;
use crate::parser::DslParser;

/// Snapshot of inputs for one bundle execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub timestamp: String,
    pub data: Value,
    pub variables: Map<String, Value>,
    pub results: Vec<Value>,
    pub errors: Vec<Value>,
    pub metadata: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(data: Value) -> Self {
        ExecutionContext::with_variables(data, Map::new())
    }

    pub fn with_variables(data: Value, variables: Map<String, Value>) -> Self {
        ExecutionContext {
            execution_id: Uuid::new_v4().to_string(),
            timestamp: utc_now_iso(),
            data,
            variables,
            results: Vec::new(),
            errors: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Data rules can see: `variables` merged over `data`. This is also
    /// the cache-key input, so the per-run `_execution` envelope is
    /// deliberately absent.
    pub fn visible_data(&self) -> Value {
        let mut merged = self
            .data
            .as_object()
            .cloned()
            .unwrap_or_default();
        for (key, value) in &self.variables {
            merged.insert(key.clone(), value.clone());
        }
        Value::Object(merged)
    }

    /// Visible data plus the `_execution` envelope handed to evaluators.
    pub fn context_data(&self) -> Value {
        let mut data = self.visible_data();
        if let Some(map) = data.as_object_mut() {
            map.insert(
                "_execution".to_string(),
                json!({
                    "id": self.execution_id,
                    "timestamp": self.timestamp,
                }),
            );
        }
        data
    }

    /// Full snapshot of the context: execution envelope, inputs, and the
    /// results and errors accumulated so far.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn add_result(&mut self, result: Value) {
        self.results.push(result);
    }

    pub fn add_error(&mut self, error: Value) {
        self.errors.push(error);
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

/// Evaluator outcome for one rule, as produced by the dispatched
/// evaluator or a custom handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleOutcome {
    pub result: bool,
    pub reason: String,
    pub details: Value,
    pub confidence: f64,
}

/// One rule's entry in an execution report.
#[derive(Debug, Clone, Serialize)]
pub struct RuleResult {
    pub rule_id: String,
    pub rule_name: String,
    pub rule_type: String,
    pub timestamp: String,
    pub result: bool,
    pub reason: String,
    pub details: Value,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub cached: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Aggregate result of executing a bundle.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub bundle_id: String,
    pub bundle_name: String,
    pub execution_id: String,
    pub timestamp: String,
    pub rules_executed: usize,
    pub rules_passed: usize,
    pub rules_failed: usize,
    pub rule_results: Vec<RuleResult>,
    pub overall_result: bool,
}

/// Cache size exposure.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cache_size: usize,
    pub cache_enabled: bool,
}

/// Custom evaluator registered for a rule-type tag.
pub type RuleHandler = Box<dyn Fn(&Rule, &ExecutionContext) -> Result<RuleOutcome>>;

pub struct RuleEngine {
    dsl_parser: DslParser,
    dsl_evaluator: DslEvaluator,
    expression_evaluator: ExpressionEvaluator,
    handlers: HashMap<String, RuleHandler>,
    cache: HashMap<String, RuleOutcome>,
}

impl RuleEngine {
    pub fn new() -> Self {
        RuleEngine {
            dsl_parser: DslParser::new(),
            dsl_evaluator: DslEvaluator::new(),
            expression_evaluator: ExpressionEvaluator::new(),
            handlers: HashMap::new(),
            cache: HashMap::new(),
        }
    }

    /// Register a custom evaluator for a rule-type tag.
    pub fn register_handler(
        &mut self,
        rule_type: impl Into<String>,
        handler: impl Fn(&Rule, &ExecutionContext) -> Result<RuleOutcome> + 'static,
    ) {
        self.handlers.insert(rule_type.into(), Box::new(handler));
    }

    /// Execute every rule of the bundle in declaration order. Per-rule
    /// failures become failed results; the run always completes.
    pub fn execute_bundle(
        &mut self,
        bundle: &DecisionBundle,
        context: &mut ExecutionContext,
    ) -> ExecutionReport {
        info!(
            "executing bundle {} ({} rules)",
            bundle.metadata.id,
            bundle.rules.len()
        );

        let mut report = ExecutionReport {
            bundle_id: bundle.metadata.id.clone(),
            bundle_name: bundle.metadata.name.clone(),
            execution_id: context.execution_id.clone(),
            timestamp: context.timestamp.clone(),
            rules_executed: 0,
            rules_passed: 0,
            rules_failed: 0,
            rule_results: Vec::with_capacity(bundle.rules.len()),
            overall_result: true,
        };

        for rule in &bundle.rules {
            let rule_result = match self.execute_rule(rule, context) {
                Ok(result) => result,
                Err(err) => {
                    let message = err.to_string();
                    context.add_error(json!({
                        "rule_id": rule.id,
                        "error": message,
                        "timestamp": utc_now_iso(),
                    }));
                    RuleResult {
                        rule_id: rule.id.clone(),
                        rule_name: rule.name.clone(),
                        rule_type: rule.rule_type.clone(),
                        timestamp: utc_now_iso(),
                        result: false,
                        reason: message.clone(),
                        details: Value::Null,
                        confidence: 1.0,
                        error: Some(message),
                        cached: false,
                    }
                }
            };

            report.rules_executed += 1;
            if rule_result.result {
                report.rules_passed += 1;
            } else {
                report.rules_failed += 1;
                report.overall_result = false;
            }
            report.rule_results.push(rule_result);
        }

        info!(
            "bundle {} finished: {}/{} passed",
            bundle.metadata.id, report.rules_passed, report.rules_executed
        );
        report
    }

    /// Execute a single rule, consulting the outcome cache first.
    pub fn execute_rule(
        &mut self,
        rule: &Rule,
        context: &mut ExecutionContext,
    ) -> Result<RuleResult> {
        let cache_key = self.cache_key(rule, context);

        if let Some(cached) = self.cache.get(&cache_key) {
            debug!("cache hit for rule {}", rule.id);
            return Ok(RuleResult {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                rule_type: rule.rule_type.clone(),
                timestamp: utc_now_iso(),
                result: cached.result,
                reason: cached.reason.clone(),
                details: cached.details.clone(),
                confidence: cached.confidence,
                error: None,
                cached: true,
            });
        }

        let outcome = match rule.rule_type.as_str() {
            "dsl" => self.execute_dsl_rule(rule, context),
            "expression" => self.execute_expression_rule(rule, context),
            "decision_table" => self.execute_decision_table_rule(rule, context),
            "decision_tree" => self.execute_decision_tree_rule(rule, context),
            other => match self.handlers.get(other) {
                Some(handler) => handler(rule, context),
                None => Err(GlassBoxError::rule_execution(
                    format!("Unsupported rule type: {other}"),
                    Some(&rule.id),
                )),
            },
        }
        .map_err(|err| tag_rule(err, &rule.id, context.to_value()))?;

        self.cache.insert(cache_key, outcome.clone());

        let result = RuleResult {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            rule_type: rule.rule_type.clone(),
            timestamp: utc_now_iso(),
            result: outcome.result,
            reason: outcome.reason,
            details: outcome.details,
            confidence: outcome.confidence,
            error: None,
            cached: false,
        };

        context.add_result(serde_json::to_value(&result)?);
        Ok(result)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            cache_size: self.cache.len(),
            cache_enabled: true,
        }
    }

    /// Cache key: MD5 over the rule id and the canonical visible data.
    /// Timestamps and the execution id are excluded, so byte-identical
    /// inputs share outcomes across runs.
    fn cache_key(&self, rule: &Rule, context: &ExecutionContext) -> String {
        md5_hex(&format!(
            "{}:{}",
            rule.id,
            canonicalize(&context.visible_data())
        ))
    }

    fn execute_dsl_rule(&self, rule: &Rule, context: &ExecutionContext) -> Result<RuleOutcome> {
        let dsl_text = rule
            .definition
            .get("dsl")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                GlassBoxError::rule_execution("DSL rule missing DSL text", Some(&rule.id))
            })?;

        let ast = self.dsl_parser.parse(dsl_text).map_err(|err| {
            GlassBoxError::rule_execution(format!("DSL parsing failed: {err}"), Some(&rule.id))
        })?;

        let evaluation = self.dsl_evaluator.evaluate(&ast, &context.context_data());
        let parameters = rule
            .definition
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| json!({}));

        Ok(RuleOutcome {
            result: evaluation.result,
            reason: evaluation.reason.clone(),
            details: json!({
                "dsl_text": dsl_text,
                "ast": ast,
                "evaluation": evaluation,
                "parameters": parameters,
            }),
            confidence: 1.0,
        })
    }

    fn execute_expression_rule(
        &self,
        rule: &Rule,
        context: &ExecutionContext,
    ) -> Result<RuleOutcome> {
        let expression = rule
            .definition
            .get("expression")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                GlassBoxError::rule_execution("Expression rule missing expression", Some(&rule.id))
            })?;

        let variables = rule
            .definition
            .get("variables")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let outcome = self
            .expression_evaluator
            .evaluate(expression, &variables, &context.context_data())?;

        Ok(RuleOutcome {
            result: outcome.result,
            reason: format!("Expression evaluated to: {}", outcome.value_text),
            details: json!({
                "expression": expression,
                "evaluated_expression": outcome.substituted,
                "variables": variables,
            }),
            confidence: 1.0,
        })
    }

    fn execute_decision_table_rule(
        &self,
        rule: &Rule,
        context: &ExecutionContext,
    ) -> Result<RuleOutcome> {
        let table_value = rule.definition.get("table").cloned().ok_or_else(|| {
            GlassBoxError::rule_execution("Decision table rule missing table", Some(&rule.id))
        })?;

        let table: TableDefinition = serde_json::from_value(table_value.clone()).map_err(|err| {
            GlassBoxError::rule_execution(format!("Invalid decision table: {err}"), Some(&rule.id))
        })?;

        let outcome = evaluate_table(&table, &context.context_data());
        let mut details = outcome.details;
        if let Some(map) = details.as_object_mut() {
            map.insert("table".to_string(), table_value);
        }

        Ok(RuleOutcome {
            result: outcome.result,
            reason: outcome.reason,
            details,
            confidence: 1.0,
        })
    }

    fn execute_decision_tree_rule(
        &self,
        rule: &Rule,
        context: &ExecutionContext,
    ) -> Result<RuleOutcome> {
        let tree = rule.definition.get("tree").cloned().ok_or_else(|| {
            GlassBoxError::rule_execution("Decision tree rule missing tree", Some(&rule.id))
        })?;

        let outcome = traverse_tree(&tree, &context.context_data());

        Ok(RuleOutcome {
            result: outcome.result,
            reason: outcome.reason,
            details: json!({
                "tree": tree,
                "path": outcome.path,
                "final_node": outcome.final_node,
            }),
            confidence: 1.0,
        })
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Attach the rule id and a context snapshot to an execution error that
/// lacks them.
fn tag_rule(err: GlassBoxError, rule_id: &str, snapshot: Value) -> GlassBoxError {
    match err {
        GlassBoxError::RuleExecution {
            message,
            rule_id: id,
            context,
        } => GlassBoxError::RuleExecution {
            message,
            rule_id: id.or_else(|| Some(rule_id.to_string())),
            context: context.or(Some(snapshot)),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::DecisionBundleBuilder;
    use serde_json::json;

    fn dsl_rule(id: &str, dsl: &str) -> Rule {
        Rule {
            id: id.to_string(),
            name: format!("rule {id}"),
            rule_type: "dsl".to_string(),
            definition: json!({ "dsl": dsl }),
            description: None,
            severity: None,
            category: None,
        }
    }

    fn bundle_with(rules: Vec<Rule>) -> DecisionBundle {
        let mut builder = DecisionBundleBuilder::new()
            .name("Engine Test")
            .description("engine tests")
            .jurisdiction("TEST");
        for rule in rules {
            builder = builder.add_rule(rule);
        }
        builder.build().unwrap()
    }

    #[test]
    fn context_merges_variables_over_data() {
        let mut variables = Map::new();
        variables.insert("limit".to_string(), json!(100));
        variables.insert("user".to_string(), json!({"age": 99}));

        let context =
            ExecutionContext::with_variables(json!({"user": {"age": 30}, "region": "EU"}), variables);

        let visible = context.visible_data();
        assert_eq!(visible["limit"], json!(100));
        assert_eq!(visible["user"]["age"], json!(99));
        assert_eq!(visible["region"], json!("EU"));
        assert!(visible.get("_execution").is_none());

        let full = context.context_data();
        assert_eq!(
            full["_execution"]["id"],
            json!(context.execution_id.clone())
        );
    }

    #[test]
    fn executes_dsl_bundle() {
        let bundle = bundle_with(vec![dsl_rule(
            "rule-dsl-001",
            "WHEN user.age >= 18 THEN MUST account.is_active = TRUE",
        )]);
        let mut context =
            ExecutionContext::new(json!({"user": {"age": 25}, "account": {"is_active": true}}));

        let mut engine = RuleEngine::new();
        let report = engine.execute_bundle(&bundle, &mut context);

        assert_eq!(report.rules_executed, 1);
        assert_eq!(report.rules_passed, 1);
        assert_eq!(report.rules_failed, 0);
        assert!(report.overall_result);
        assert_eq!(context.results.len(), 1);
    }

    #[test]
    fn second_execution_hits_the_cache() {
        let rule = dsl_rule("rule-c", "WHEN a.n > 1 THEN MUST a.ok = TRUE");
        let mut engine = RuleEngine::new();

        let mut first_ctx = ExecutionContext::new(json!({"a": {"n": 5, "ok": true}}));
        let first = engine.execute_rule(&rule, &mut first_ctx).unwrap();
        assert!(!first.cached);

        // A different context with byte-identical visible data still hits.
        let mut second_ctx = ExecutionContext::new(json!({"a": {"n": 5, "ok": true}}));
        let second = engine.execute_rule(&rule, &mut second_ctx).unwrap();
        assert!(second.cached);
        assert_eq!(second.result, first.result);
        assert_eq!(engine.cache_stats().cache_size, 1);

        engine.clear_cache();
        assert_eq!(engine.cache_stats().cache_size, 0);
    }

    #[test]
    fn failing_rule_fails_bundle_but_run_continues() {
        let bundle = bundle_with(vec![
            dsl_rule("r-bad", "WHEN user.age >= 18 THEN MUST account.is_active = TRUE"),
            dsl_rule("r-good", "WHEN user.age >= 18 THEN MUST user.registered = TRUE"),
        ]);
        let mut context = ExecutionContext::new(
            json!({"user": {"age": 30, "registered": true}, "account": {"is_active": false}}),
        );

        let report = RuleEngine::new().execute_bundle(&bundle, &mut context);
        assert_eq!(report.rules_executed, 2);
        assert_eq!(report.rules_failed, 1);
        assert_eq!(report.rules_passed, 1);
        assert!(!report.overall_result);
    }

    #[test]
    fn broken_rule_becomes_error_result() {
        let bundle = bundle_with(vec![
            Rule {
                id: "r-broken".to_string(),
                name: "broken".to_string(),
                rule_type: "dsl".to_string(),
                definition: json!({"dsl": "THIS IS NOT DSL"}),
                description: None,
                severity: None,
                category: None,
            },
            dsl_rule("r-fine", "WHEN x THEN MUST y = TRUE"),
        ]);
        let mut context = ExecutionContext::new(json!({"x": true, "y": true}));

        let report = RuleEngine::new().execute_bundle(&bundle, &mut context);
        assert_eq!(report.rules_executed, 2);
        assert!(!report.overall_result);
        assert!(report.rule_results[0].error.is_some());
        assert!(report.rule_results[0]
            .reason
            .contains("DSL parsing failed"));
        assert!(report.rule_results[1].result);
        assert_eq!(context.errors.len(), 1);
    }

    #[test]
    fn expression_rule_executes() {
        let bundle = bundle_with(vec![Rule {
            id: "rule-expr-001".to_string(),
            name: "expr".to_string(),
            rule_type: "expression".to_string(),
            definition: json!({
                "expression": "user.age >= 18 and account.is_active == true",
                "variables": {"user.age": "number", "account.is_active": "boolean"},
            }),
            description: None,
            severity: None,
            category: None,
        }]);
        let mut context =
            ExecutionContext::new(json!({"user": {"age": 25}, "account": {"is_active": true}}));

        let report = RuleEngine::new().execute_bundle(&bundle, &mut context);
        assert_eq!(report.rules_passed, 1);
        assert!(report.overall_result);
    }

    #[test]
    fn table_and_tree_rules_execute() {
        let table_rule = Rule {
            id: "r-table".to_string(),
            name: "table".to_string(),
            rule_type: "decision_table".to_string(),
            definition: json!({"table": {
                "conditions": [
                    {"field": "transaction.amount", "operator": "exceeds", "value": 10000},
                ],
                "actions": [{"result": true, "reason": "review"}],
            }}),
            description: None,
            severity: None,
            category: None,
        };
        let tree_rule = Rule {
            id: "r-tree".to_string(),
            name: "tree".to_string(),
            rule_type: "decision_tree".to_string(),
            definition: json!({"tree": {
                "condition": {"field": "transaction.amount", "operator": ">", "value": 10000},
                "true_branch": {"result": true, "reason": "large"},
                "false_branch": {"result": false, "reason": "small"},
            }}),
            description: None,
            severity: None,
            category: None,
        };

        let bundle = bundle_with(vec![table_rule, tree_rule]);
        let mut context = ExecutionContext::new(json!({"transaction": {"amount": 25000}}));

        let report = RuleEngine::new().execute_bundle(&bundle, &mut context);
        assert_eq!(report.rules_passed, 2);
        assert!(report.overall_result);
    }

    #[test]
    fn unknown_type_requires_registered_handler() {
        let custom = Rule {
            id: "r-custom".to_string(),
            name: "custom".to_string(),
            rule_type: "external".to_string(),
            definition: json!({}),
            description: None,
            severity: None,
            category: None,
        };
        let mut context = ExecutionContext::new(json!({}));

        let mut engine = RuleEngine::new();
        let err = engine.execute_rule(&custom, &mut context).unwrap_err();
        assert!(err.to_string().contains("Unsupported rule type: external"));
        match &err {
            GlassBoxError::RuleExecution {
                rule_id, context, ..
            } => {
                assert_eq!(rule_id.as_deref(), Some("r-custom"));
                let snapshot = context.as_ref().unwrap();
                assert!(snapshot.get("execution_id").is_some());
            }
            other => panic!("unexpected error kind: {other:?}"),
        }

        engine.register_handler("external", |_rule, _context| {
            Ok(RuleOutcome {
                result: true,
                reason: "handled externally".to_string(),
                details: Value::Null,
                confidence: 0.5,
            })
        });
        let result = engine.execute_rule(&custom, &mut context).unwrap();
        assert!(result.result);
        assert_eq!(result.reason, "handled externally");
    }
}
