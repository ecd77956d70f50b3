// Single error taxonomy for the whole SDK. Every failure carries a kind
// plus whatever context the failing layer knows about (field path, source
// position, rule id, record id).

use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GlassBoxError>;

#[derive(Debug, Error)]
pub enum GlassBoxError {
    /// Bad bundle shape or enum value.
    #[error("Validation Error{}: {message}", fmt_label("Field", .field))]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Tokenizer or parser failure.
    #[error("DSL Parser Error{}: {message}", fmt_position(.line, .column))]
    DslParser {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    /// Evaluator or dispatch failure. `context` carries a snapshot of the
    /// execution context the failure happened under.
    #[error("Rule Execution Error{}: {message}", fmt_label("Rule", .rule_id))]
    RuleExecution {
        message: String,
        rule_id: Option<String>,
        context: Option<Value>,
    },

    /// Missing, duplicate, or integrity-violating evidence.
    #[error("Evidence Error{}: {message}", fmt_label("ID", .evidence_id))]
    Evidence {
        message: String,
        evidence_id: Option<String>,
    },

    /// Missing entry or bundle integrity failure.
    #[error("Audit Error{}: {message}", fmt_label("ID", .audit_id))]
    Audit {
        message: String,
        audit_id: Option<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GlassBoxError {
    pub fn validation(message: impl Into<String>) -> Self {
        GlassBoxError::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        GlassBoxError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn dsl(message: impl Into<String>) -> Self {
        GlassBoxError::DslParser {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn dsl_at(message: impl Into<String>, line: usize, column: usize) -> Self {
        GlassBoxError::DslParser {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }

    pub fn rule_execution(message: impl Into<String>, rule_id: Option<&str>) -> Self {
        GlassBoxError::RuleExecution {
            message: message.into(),
            rule_id: rule_id.map(str::to_string),
            context: None,
        }
    }

    pub fn rule_execution_with_context(
        message: impl Into<String>,
        rule_id: Option<&str>,
        context: Value,
    ) -> Self {
        GlassBoxError::RuleExecution {
            message: message.into(),
            rule_id: rule_id.map(str::to_string),
            context: Some(context),
        }
    }

    pub fn evidence(message: impl Into<String>) -> Self {
        GlassBoxError::Evidence {
            message: message.into(),
            evidence_id: None,
        }
    }

    pub fn evidence_id(message: impl Into<String>, evidence_id: impl Into<String>) -> Self {
        GlassBoxError::Evidence {
            message: message.into(),
            evidence_id: Some(evidence_id.into()),
        }
    }

    pub fn audit(message: impl Into<String>) -> Self {
        GlassBoxError::Audit {
            message: message.into(),
            audit_id: None,
        }
    }

    pub fn audit_id(message: impl Into<String>, audit_id: impl Into<String>) -> Self {
        GlassBoxError::Audit {
            message: message.into(),
            audit_id: Some(audit_id.into()),
        }
    }
}

fn fmt_label(label: &str, value: &Option<String>) -> String {
    match value {
        Some(v) => format!(" ({label}: {v})"),
        None => String::new(),
    }
}

fn fmt_position(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(l), Some(c)) => format!(" at line {l}, column {c}"),
        _ => String::new(),
    }
}
