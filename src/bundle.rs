// DecisionBundle model: the portable artifact bundling rules, decisions,
// evidence and audit metadata. External data is validated field by field
// before it becomes a typed bundle, so every shape violation reports the
// offending path (`rules[3].type`, `metadata.domain`, …).

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::canonical::{parse_iso, utc_now_iso};
use crate::error::{GlassBoxError, Result};

/// Bundle format version this SDK understands.
pub const BUNDLE_VERSION: &str = "1.0";

/// Allowed values of `metadata.domain`.
pub const VALID_DOMAINS: &[&str] = &["finance", "health", "esg", "general"];

/// Allowed values of `rule.type`.
pub const VALID_RULE_TYPES: &[&str] = &["dsl", "expression", "decision_table", "decision_tree"];

/// Regulatory domain a bundle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Finance,
    Health,
    Esg,
    General,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Domain::Finance => "finance",
            Domain::Health => "health",
            Domain::Esg => "esg",
            Domain::General => "general",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for Domain {
    type Err = GlassBoxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "finance" => Ok(Domain::Finance),
            "health" => Ok(Domain::Health),
            "esg" => Ok(Domain::Esg),
            "general" => Ok(Domain::General),
            other => Err(GlassBoxError::validation_field(
                format!("Invalid domain: {other}"),
                "metadata.domain",
            )),
        }
    }
}

/// Bundle metadata block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created: String,
    pub jurisdiction: String,
    pub domain: Domain,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single rule. `rule_type` stays a string so registered custom handler
/// tags can flow through `RuleEngine::execute_rule`; bundle validation
/// still restricts bundled rules to the four standard types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: String,
    pub definition: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// A recorded decision made by a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    #[serde(rename = "ruleId")]
    pub rule_id: String,
    pub input: Value,
    pub output: Value,
    pub timestamp: String,
}

/// Audit header embedded in a bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditHeader {
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub modified: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub trail: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A validated DecisionBundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionBundle {
    pub version: String,
    pub metadata: BundleMetadata,
    pub rules: Vec<Rule>,
    pub decisions: Vec<Decision>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditHeader>,
}

impl DecisionBundle {
    /// Build a bundle from raw JSON, validating before deserialization.
    pub fn from_value(value: Value) -> Result<DecisionBundle> {
        validate_bundle_value(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Build a bundle from a JSON string.
    pub fn from_json(json: &str) -> Result<DecisionBundle> {
        let value: Value = serde_json::from_str(json)?;
        DecisionBundle::from_value(value)
    }

    /// Load a bundle from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<DecisionBundle> {
        let text = std::fs::read_to_string(path)?;
        DecisionBundle::from_json(&text)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn rule_by_id(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.id == rule_id)
    }

    pub fn decisions_for_rule(&self, rule_id: &str) -> Vec<&Decision> {
        self.decisions
            .iter()
            .filter(|decision| decision.rule_id == rule_id)
            .collect()
    }

    pub fn evidence_by_id(&self, evidence_id: &str) -> Option<&Value> {
        self.evidence
            .iter()
            .find(|item| item.get("id").and_then(Value::as_str) == Some(evidence_id))
    }
}

/// Validate raw bundle JSON, reporting the first violation with its field
/// path.
pub fn validate_bundle_value(value: &Value) -> Result<()> {
    for field in ["version", "metadata", "rules", "decisions"] {
        if value.get(field).is_none() {
            return Err(GlassBoxError::validation_field(
                format!("Missing required field: {field}"),
                field,
            ));
        }
    }

    let version = value.get("version").and_then(Value::as_str).unwrap_or("");
    if version != BUNDLE_VERSION {
        return Err(GlassBoxError::validation_field(
            format!("Unsupported version: {version}"),
            "version",
        ));
    }

    let metadata = value
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            GlassBoxError::validation_field("metadata must be an object", "metadata")
        })?;

    for field in ["id", "name", "description", "created", "jurisdiction", "domain"] {
        if !metadata.contains_key(field) {
            return Err(GlassBoxError::validation_field(
                format!("Missing required metadata field: {field}"),
                format!("metadata.{field}"),
            ));
        }
    }

    let domain = metadata.get("domain").and_then(Value::as_str).unwrap_or("");
    if !VALID_DOMAINS.contains(&domain) {
        return Err(GlassBoxError::validation_field(
            format!("Invalid domain: {domain}"),
            "metadata.domain",
        ));
    }

    let created = metadata.get("created").and_then(Value::as_str).unwrap_or("");
    if parse_iso(created).is_none() {
        return Err(GlassBoxError::validation_field(
            format!("Invalid created timestamp: {created}"),
            "metadata.created",
        ));
    }

    let rules = value.get("rules").and_then(Value::as_array).ok_or_else(|| {
        GlassBoxError::validation_field("rules must be an array", "rules")
    })?;
    for (index, rule) in rules.iter().enumerate() {
        validate_rule_value(rule, index)?;
    }

    let decisions = value
        .get("decisions")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            GlassBoxError::validation_field("decisions must be an array", "decisions")
        })?;
    for (index, decision) in decisions.iter().enumerate() {
        validate_decision_value(decision, index)?;
    }

    Ok(())
}

fn validate_rule_value(rule: &Value, index: usize) -> Result<()> {
    for field in ["id", "name", "type", "definition"] {
        if rule.get(field).is_none() {
            return Err(GlassBoxError::validation_field(
                format!("Missing required rule field: {field}"),
                format!("rules[{index}].{field}"),
            ));
        }
    }

    let rule_type = rule.get("type").and_then(Value::as_str).unwrap_or("");
    if !VALID_RULE_TYPES.contains(&rule_type) {
        return Err(GlassBoxError::validation_field(
            format!("Invalid rule type: {rule_type}"),
            format!("rules[{index}].type"),
        ));
    }

    Ok(())
}

fn validate_decision_value(decision: &Value, index: usize) -> Result<()> {
    for field in ["id", "ruleId", "input", "output", "timestamp"] {
        if decision.get(field).is_none() {
            return Err(GlassBoxError::validation_field(
                format!("Missing required decision field: {field}"),
                format!("decisions[{index}].{field}"),
            ));
        }
    }

    if decision
        .get("output")
        .and_then(|output| output.get("result"))
        .is_none()
    {
        return Err(GlassBoxError::validation_field(
            "Missing output.result",
            format!("decisions[{index}].output.result"),
        ));
    }

    Ok(())
}

/// Fluent builder for constructing bundles programmatically. Mutations are
/// mirrored into the audit header trail.
#[derive(Debug)]
pub struct DecisionBundleBuilder {
    bundle: DecisionBundle,
}

impl DecisionBundleBuilder {
    pub fn new() -> Self {
        let now = utc_now_iso();
        DecisionBundleBuilder {
            bundle: DecisionBundle {
                version: BUNDLE_VERSION.to_string(),
                metadata: BundleMetadata {
                    id: Uuid::new_v4().to_string(),
                    name: String::new(),
                    description: String::new(),
                    created: now.clone(),
                    jurisdiction: String::new(),
                    domain: Domain::General,
                    author: None,
                    tags: Vec::new(),
                    extra: Map::new(),
                },
                rules: Vec::new(),
                decisions: Vec::new(),
                evidence: Vec::new(),
                audit: Some(AuditHeader {
                    created: now.clone(),
                    modified: now,
                    version: BUNDLE_VERSION.to_string(),
                    trail: Vec::new(),
                    extra: Map::new(),
                }),
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.bundle.metadata.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.bundle.metadata.description = description.into();
        self
    }

    pub fn jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.bundle.metadata.jurisdiction = jurisdiction.into();
        self
    }

    pub fn domain(mut self, domain: Domain) -> Self {
        self.bundle.metadata.domain = domain;
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.bundle.metadata.author = Some(author.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.bundle.metadata.tags.contains(&tag) {
            self.bundle.metadata.tags.push(tag);
        }
        self
    }

    pub fn add_rule(mut self, rule: Rule) -> Self {
        let note = format!("Added rule: {}", rule.id);
        self.bundle.rules.push(rule);
        self.record("rule_added", &note);
        self
    }

    pub fn add_decision(mut self, decision: Decision) -> Self {
        let note = format!("Added decision: {}", decision.id);
        self.bundle.decisions.push(decision);
        self.record("decision_added", &note);
        self
    }

    pub fn add_evidence(mut self, evidence: Value) -> Self {
        let note = format!(
            "Added evidence: {}",
            evidence
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
        );
        self.bundle.evidence.push(evidence);
        self.record("evidence_added", &note);
        self
    }

    fn record(&mut self, action: &str, reason: &str) {
        let now = utc_now_iso();
        if let Some(audit) = self.bundle.audit.as_mut() {
            audit.modified = now.clone();
            audit.trail.push(serde_json::json!({
                "timestamp": now,
                "action": action,
                "user": "builder",
                "details": { "reason": reason },
            }));
        }
    }

    /// Validate and return the bundle.
    pub fn build(self) -> Result<DecisionBundle> {
        let value = serde_json::to_value(&self.bundle)?;
        validate_bundle_value(&value)?;
        Ok(self.bundle)
    }
}

impl Default for DecisionBundleBuilder {
    fn default() -> Self {
        Self::new()
    }
}
