// Abstract syntax tree for the compliance DSL. One variant per grammar
// production, each carrying the character offset of its leading token so
// diagnostics and serialized ASTs can point back into the source.

use serde::Serialize;
use serde_json::Number;

/// A dotted variable reference (`transaction.amount`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableRef {
    pub name: String,
    pub pos: usize,
}

/// Comparison operators shared by simple conditions and constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompareOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "LIKE")]
    Like,
}

impl CompareOp {
    pub fn from_symbol(symbol: &str) -> Option<CompareOp> {
        match symbol {
            "=" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            "LIKE" => Some(CompareOp::Like),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PatternOp {
    Contains,
    Matches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TemporalOp {
    #[serde(rename = "BEFORE")]
    Before,
    #[serde(rename = "AFTER")]
    After,
    #[serde(rename = "WITHIN")]
    Within,
    #[serde(rename = "EXPIRES")]
    ExpiresAfter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequirementKind {
    Require,
    Ensure,
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Flag,
    Alert,
    Block,
    Allow,
    Log,
    Notify,
}

impl ActionType {
    pub fn from_keyword(word: &str) -> Option<ActionType> {
        match word {
            "FLAG" => Some(ActionType::Flag),
            "ALERT" => Some(ActionType::Alert),
            "BLOCK" => Some(ActionType::Block),
            "ALLOW" => Some(ActionType::Allow),
            "LOG" => Some(ActionType::Log),
            "NOTIFY" => Some(ActionType::Notify),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            ActionType::Flag => "FLAG",
            ActionType::Alert => "ALERT",
            ActionType::Block => "BLOCK",
            ActionType::Allow => "ALLOW",
            ActionType::Log => "LOG",
            ActionType::Notify => "NOTIFY",
        }
    }
}

/// Literal or variable value position in the grammar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueNode {
    StringValue { value: String, pos: usize },
    NumberValue { value: Number, pos: usize },
    BooleanValue { value: bool, pos: usize },
    DatetimeValue { value: String, pos: usize },
    Variable { name: String, pos: usize },
}

/// Conditions appearing after `WHEN` / `IF`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    SimpleCondition {
        left: VariableRef,
        operator: CompareOp,
        right: ValueNode,
        pos: usize,
    },
    ListCondition {
        variable: VariableRef,
        values: Vec<ValueNode>,
        pos: usize,
    },
    PatternCondition {
        variable: VariableRef,
        operator: PatternOp,
        pattern: ValueNode,
        pos: usize,
    },
    TemporalCondition {
        variable: VariableRef,
        operator: TemporalOp,
        value: ValueNode,
        pos: usize,
    },
    CompoundCondition {
        left: Box<Condition>,
        operator: BoolOp,
        right: Box<Condition>,
        pos: usize,
    },
    NotCondition {
        condition: Box<Condition>,
        pos: usize,
    },
    VariableCondition {
        variable: VariableRef,
        pos: usize,
    },
}

/// Consequences appearing after `THEN [MUST|SHOULD]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Consequence {
    Requirement {
        keyword: RequirementKind,
        variable: VariableRef,
        pos: usize,
    },
    Constraint {
        variable: VariableRef,
        operator: CompareOp,
        value: ValueNode,
        pos: usize,
    },
    InConstraint {
        variable: VariableRef,
        values: Vec<ValueNode>,
        negated: bool,
        pos: usize,
    },
    BetweenConstraint {
        variable: VariableRef,
        lower: ValueNode,
        upper: ValueNode,
        pos: usize,
    },
    BooleanLiteral {
        value: bool,
        pos: usize,
    },
    VariableExpression {
        variable: VariableRef,
        pos: usize,
    },
    NotExpression {
        expression: Box<Consequence>,
        pos: usize,
    },
    CompoundExpression {
        left: Box<Consequence>,
        operator: BoolOp,
        right: Box<Consequence>,
        pos: usize,
    },
}

/// Actions appearing after `THEN DO`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionNode {
    pub action_type: ActionType,
    pub variable: VariableRef,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleBody {
    Consequence { consequence: Consequence },
    Action { action: ActionNode },
}

/// A fully parsed rule: condition plus consequence or action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleAst {
    pub condition: Condition,
    pub body: RuleBody,
}
