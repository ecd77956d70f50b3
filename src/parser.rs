// Recursive-descent parser for the compliance DSL. The token cursor is a
// small peek buffer; productions are decided by parsing the leading
// variable once and branching on the next token, so no backtracking is
// ever needed.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Number;

use crate::ast::{
    ActionNode, ActionType, BoolOp, CompareOp, Condition, Consequence, PatternOp, RequirementKind,
    RuleAst, RuleBody, TemporalOp, ValueNode, VariableRef,
};
use crate::error::{GlassBoxError, Result};
use crate::tokenizer::{tokenize, Token, TokenKind};

/// Parser front-end for DSL rule text.
#[derive(Debug, Default)]
pub struct DslParser;

impl DslParser {
    pub fn new() -> Self {
        DslParser
    }

    /// Parse a DSL rule into an AST. The entire input must be consumed.
    pub fn parse(&self, text: &str) -> Result<RuleAst> {
        parse(text)
    }
}

/// Parse a DSL rule into an AST.
pub fn parse(text: &str) -> Result<RuleAst> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(GlassBoxError::dsl("Empty DSL rule"));
    }

    let tokens = tokenize(trimmed)?;
    let mut cursor = Cursor::new(tokens);
    let rule = cursor.parse_rule()?;

    if let Some(token) = cursor.peek() {
        return Err(GlassBoxError::dsl(format!(
            "Unexpected token: {}",
            token.text
        )));
    }

    Ok(rule)
}

struct Cursor {
    tokens: Vec<Token>,
    index: usize,
}

impl Cursor {
    fn new(tokens: Vec<Token>) -> Self {
        Cursor { tokens, index: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.index);
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn expect_keyword(&mut self, word: &str) -> Result<()> {
        match self.tokens.get(self.index) {
            Some(token) if token.is_keyword(word) => {
                self.index += 1;
                Ok(())
            }
            Some(token) => Err(GlassBoxError::dsl(format!(
                "Expected {word}, got {}",
                token.text
            ))),
            None => Err(GlassBoxError::dsl(format!(
                "Expected {word}, got end of input"
            ))),
        }
    }

    fn expect_symbol(&mut self, sym: char) -> Result<()> {
        match self.tokens.get(self.index) {
            Some(token) if token.is_symbol(sym) => {
                self.index += 1;
                Ok(())
            }
            Some(token) => Err(GlassBoxError::dsl(format!(
                "Expected {sym}, got {}",
                token.text
            ))),
            None => Err(GlassBoxError::dsl(format!(
                "Expected {sym}, got end of input"
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Rule := CondClause (ConseqClause | ActionClause)
    // ------------------------------------------------------------------

    fn parse_rule(&mut self) -> Result<RuleAst> {
        let condition = self.parse_condition_clause()?;

        self.expect_keyword("THEN")?;

        if self.peek().is_some_and(|t| t.is_keyword("DO")) {
            self.advance();
            let action = self.parse_action()?;
            return Ok(RuleAst {
                condition,
                body: RuleBody::Action { action },
            });
        }

        // Optional MUST / SHOULD modality.
        if self
            .peek()
            .is_some_and(|t| t.is_keyword("MUST") || t.is_keyword("SHOULD"))
        {
            self.advance();
        }

        let consequence = self.parse_consequence()?;
        Ok(RuleAst {
            condition,
            body: RuleBody::Consequence { consequence },
        })
    }

    fn parse_condition_clause(&mut self) -> Result<Condition> {
        match self.peek() {
            Some(token) if token.is_keyword("WHEN") || token.is_keyword("IF") => {
                self.advance();
                self.parse_condition()
            }
            _ => Err(GlassBoxError::dsl("Expected WHEN or IF")),
        }
    }

    // ------------------------------------------------------------------
    // Conditions
    // ------------------------------------------------------------------

    /// Parse a condition, folding `AND` / `OR` chains left-associatively.
    fn parse_condition(&mut self) -> Result<Condition> {
        let mut node = self.parse_condition_primary()?;

        while let Some(op) = self.peek_bool_op() {
            let pos = self.current_pos();
            self.advance();
            let right = self.parse_condition_primary()?;
            node = Condition::CompoundCondition {
                left: Box::new(node),
                operator: op,
                right: Box::new(right),
                pos,
            };
        }

        Ok(node)
    }

    fn parse_condition_primary(&mut self) -> Result<Condition> {
        let pos = self.current_pos();

        if self.peek().is_some_and(|t| t.is_keyword("NOT")) {
            self.advance();
            let condition = self.parse_condition_primary()?;
            return Ok(Condition::NotCondition {
                condition: Box::new(condition),
                pos,
            });
        }

        if self.peek().is_some_and(|t| t.is_symbol('(')) {
            self.advance();
            let condition = self.parse_condition()?;
            self.expect_symbol(')')?;
            return Ok(condition);
        }

        let variable = self.parse_variable()?;

        match self.peek() {
            Some(token) if token.kind == TokenKind::Operator => {
                let operator = self.parse_compare_op()?;
                let right = self.parse_value()?;
                Ok(Condition::SimpleCondition {
                    left: variable,
                    operator,
                    right,
                    pos,
                })
            }
            Some(token) if token.is_keyword("IN") => {
                self.advance();
                let values = self.parse_list()?;
                Ok(Condition::ListCondition {
                    variable,
                    values,
                    pos,
                })
            }
            Some(token) if token.is_keyword("CONTAINS") || token.is_keyword("MATCHES") => {
                let operator = if token.is_keyword("CONTAINS") {
                    PatternOp::Contains
                } else {
                    PatternOp::Matches
                };
                self.advance();
                let pattern = self.parse_value()?;
                Ok(Condition::PatternCondition {
                    variable,
                    operator,
                    pattern,
                    pos,
                })
            }
            Some(token) if temporal_op(token).is_some() => {
                let operator = temporal_op(token).unwrap_or(TemporalOp::Before);
                self.advance();
                if operator == TemporalOp::ExpiresAfter {
                    self.expect_keyword("AFTER")?;
                }
                let value = self.parse_temporal_value()?;
                Ok(Condition::TemporalCondition {
                    variable,
                    operator,
                    value,
                    pos,
                })
            }
            _ => Ok(Condition::VariableCondition { variable, pos }),
        }
    }

    // ------------------------------------------------------------------
    // Consequences
    // ------------------------------------------------------------------

    /// Parse a consequence, folding `AND` / `OR` chains left-associatively.
    fn parse_consequence(&mut self) -> Result<Consequence> {
        let mut node = self.parse_consequence_primary()?;

        while let Some(op) = self.peek_bool_op() {
            let pos = self.current_pos();
            self.advance();
            let right = self.parse_consequence_primary()?;
            node = Consequence::CompoundExpression {
                left: Box::new(node),
                operator: op,
                right: Box::new(right),
                pos,
            };
        }

        Ok(node)
    }

    fn parse_consequence_primary(&mut self) -> Result<Consequence> {
        let pos = self.current_pos();

        match self.peek() {
            Some(token) if requirement_kind(token).is_some() => {
                let keyword = requirement_kind(token).unwrap_or(RequirementKind::Require);
                self.advance();
                let variable = self.parse_variable()?;
                Ok(Consequence::Requirement {
                    keyword,
                    variable,
                    pos,
                })
            }
            Some(token) if token.is_keyword("TRUE") || token.is_keyword("FALSE") => {
                let value = token.is_keyword("TRUE");
                self.advance();
                Ok(Consequence::BooleanLiteral { value, pos })
            }
            Some(token) if token.is_keyword("NOT") => {
                self.advance();
                let expression = self.parse_consequence_primary()?;
                Ok(Consequence::NotExpression {
                    expression: Box::new(expression),
                    pos,
                })
            }
            Some(token) if token.kind == TokenKind::Identifier => {
                let variable = self.parse_variable()?;
                self.parse_constraint_tail(variable, pos)
            }
            Some(token) => Err(GlassBoxError::dsl(format!(
                "Expected consequence, got {}",
                token.text
            ))),
            None => Err(GlassBoxError::dsl(
                "Expected consequence, got end of input",
            )),
        }
    }

    /// After a leading variable: constraint forms, or a bare variable used
    /// as a boolean expression.
    fn parse_constraint_tail(&mut self, variable: VariableRef, pos: usize) -> Result<Consequence> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Operator => {
                let operator = self.parse_compare_op()?;
                let value = self.parse_value()?;
                Ok(Consequence::Constraint {
                    variable,
                    operator,
                    value,
                    pos,
                })
            }
            Some(token) if token.is_keyword("IN") => {
                self.advance();
                let negated = self.peek().is_some_and(|t| t.is_keyword("NOT"));
                if negated {
                    self.advance();
                }
                let values = self.parse_list()?;
                Ok(Consequence::InConstraint {
                    variable,
                    values,
                    negated,
                    pos,
                })
            }
            Some(token) if token.is_keyword("BETWEEN") => {
                self.advance();
                let lower = self.parse_value()?;
                self.expect_keyword("AND")?;
                let upper = self.parse_value()?;
                Ok(Consequence::BetweenConstraint {
                    variable,
                    lower,
                    upper,
                    pos,
                })
            }
            _ => Ok(Consequence::VariableExpression { variable, pos }),
        }
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    fn parse_action(&mut self) -> Result<ActionNode> {
        let pos = self.current_pos();
        let action_type = match self.peek() {
            Some(token) if token.kind == TokenKind::Keyword => {
                match ActionType::from_keyword(&token.text) {
                    Some(action) => {
                        self.advance();
                        action
                    }
                    None => {
                        return Err(GlassBoxError::dsl(format!(
                            "Expected action, got {}",
                            token.text
                        )))
                    }
                }
            }
            Some(token) => {
                return Err(GlassBoxError::dsl(format!(
                    "Expected action, got {}",
                    token.text
                )))
            }
            None => return Err(GlassBoxError::dsl("Expected action, got end of input")),
        };

        let variable = self.parse_variable()?;
        Ok(ActionNode {
            action_type,
            variable,
            pos,
        })
    }

    // ------------------------------------------------------------------
    // Terminals
    // ------------------------------------------------------------------

    fn parse_variable(&mut self) -> Result<VariableRef> {
        let pos = self.current_pos();
        let mut parts: Vec<String> = Vec::new();

        while let Some(token) = self.peek() {
            if token.kind != TokenKind::Identifier {
                break;
            }
            parts.push(token.text.clone());
            self.advance();

            if self.peek().is_some_and(|t| t.is_symbol('.')) {
                self.advance();
                if !self.peek().is_some_and(|t| t.kind == TokenKind::Identifier) {
                    return Err(GlassBoxError::dsl("Expected identifier after '.'"));
                }
            } else {
                break;
            }
        }

        if parts.is_empty() {
            return Err(GlassBoxError::dsl("Expected variable"));
        }

        Ok(VariableRef {
            name: parts.join("."),
            pos,
        })
    }

    fn parse_compare_op(&mut self) -> Result<CompareOp> {
        match self.advance() {
            Some(token) if token.kind == TokenKind::Operator => {
                CompareOp::from_symbol(&token.text).ok_or_else(|| {
                    GlassBoxError::dsl(format!("Unknown operator: {}", token.text))
                })
            }
            Some(token) => Err(GlassBoxError::dsl(format!(
                "Expected operator, got {}",
                token.text
            ))),
            None => Err(GlassBoxError::dsl("Expected operator, got end of input")),
        }
    }

    fn parse_value(&mut self) -> Result<ValueNode> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Str => {
                let pos = token.pos;
                let text = token.text.clone();
                self.advance();
                if looks_like_datetime(&text) {
                    Ok(ValueNode::DatetimeValue { value: text, pos })
                } else {
                    Ok(ValueNode::StringValue { value: text, pos })
                }
            }
            Some(token) if token.kind == TokenKind::Number => {
                let pos = token.pos;
                let text = token.text.clone();
                self.advance();
                parse_number_literal(&text, pos)
            }
            Some(token) if token.is_keyword("TRUE") || token.is_keyword("FALSE") => {
                let pos = token.pos;
                let value = token.is_keyword("TRUE");
                self.advance();
                Ok(ValueNode::BooleanValue { value, pos })
            }
            Some(token) if token.kind == TokenKind::Identifier => {
                let variable = self.parse_variable()?;
                Ok(ValueNode::Variable {
                    name: variable.name,
                    pos: variable.pos,
                })
            }
            Some(token) => Err(GlassBoxError::dsl(format!(
                "Expected value, got {}",
                token.text
            ))),
            None => Err(GlassBoxError::dsl("Expected value, got end of input")),
        }
    }

    /// A temporal value may carry a trailing time unit which scales a
    /// numeric literal to seconds (`WITHIN 30 DAYS`).
    fn parse_temporal_value(&mut self) -> Result<ValueNode> {
        let value = self.parse_value()?;

        if let Some(token) = self.peek() {
            if token.kind == TokenKind::TimeUnit {
                if let ValueNode::NumberValue { value: number, pos } = &value {
                    let seconds = number.as_f64().unwrap_or(0.0) * unit_seconds(&token.text);
                    let pos = *pos;
                    self.advance();
                    let scaled = Number::from_f64(seconds).ok_or_else(|| {
                        GlassBoxError::dsl(format!("Invalid duration: {seconds}"))
                    })?;
                    return Ok(ValueNode::NumberValue { value: scaled, pos });
                }
            }
        }

        Ok(value)
    }

    fn parse_list(&mut self) -> Result<Vec<ValueNode>> {
        self.expect_symbol('[')?;
        let mut values = Vec::new();

        while let Some(token) = self.peek() {
            if token.is_symbol(']') {
                break;
            }
            values.push(self.parse_value()?);
            if self.peek().is_some_and(|t| t.is_symbol(',')) {
                self.advance();
            }
        }

        self.expect_symbol(']')?;
        Ok(values)
    }

    fn peek_bool_op(&self) -> Option<BoolOp> {
        match self.peek() {
            Some(token) if token.is_keyword("AND") => Some(BoolOp::And),
            Some(token) if token.is_keyword("OR") => Some(BoolOp::Or),
            _ => None,
        }
    }

    fn current_pos(&self) -> usize {
        self.peek().map(|t| t.pos).unwrap_or(0)
    }
}

fn temporal_op(token: &Token) -> Option<TemporalOp> {
    if token.kind != TokenKind::Keyword {
        return None;
    }
    match token.text.as_str() {
        "BEFORE" => Some(TemporalOp::Before),
        "AFTER" => Some(TemporalOp::After),
        "WITHIN" => Some(TemporalOp::Within),
        "EXPIRES" => Some(TemporalOp::ExpiresAfter),
        _ => None,
    }
}

fn requirement_kind(token: &Token) -> Option<RequirementKind> {
    if token.kind != TokenKind::Keyword {
        return None;
    }
    match token.text.as_str() {
        "REQUIRE" => Some(RequirementKind::Require),
        "ENSURE" => Some(RequirementKind::Ensure),
        "VALIDATE" => Some(RequirementKind::Validate),
        _ => None,
    }
}

fn parse_number_literal(text: &str, pos: usize) -> Result<ValueNode> {
    let number = if text.contains('.') || text.contains('e') || text.contains('E') {
        let parsed: f64 = text
            .parse()
            .map_err(|_| GlassBoxError::dsl(format!("Invalid number: {text}")))?;
        Number::from_f64(parsed)
            .ok_or_else(|| GlassBoxError::dsl(format!("Invalid number: {text}")))?
    } else {
        match text.parse::<i64>() {
            Ok(int) => Number::from(int),
            Err(_) => {
                let parsed: f64 = text
                    .parse()
                    .map_err(|_| GlassBoxError::dsl(format!("Invalid number: {text}")))?;
                Number::from_f64(parsed)
                    .ok_or_else(|| GlassBoxError::dsl(format!("Invalid number: {text}")))?
            }
        }
    };

    Ok(ValueNode::NumberValue { value: number, pos })
}

fn looks_like_datetime(text: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern =
        PATTERN.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").ok());
    pattern.as_ref().is_some_and(|re| re.is_match(text))
}

fn unit_seconds(unit: &str) -> f64 {
    match unit {
        "SECOND" | "SECONDS" => 1.0,
        "MINUTE" | "MINUTES" => 60.0,
        "HOUR" | "HOURS" => 3600.0,
        "DAY" | "DAYS" => 86400.0,
        "WEEK" | "WEEKS" => 604800.0,
        "MONTH" | "MONTHS" => 2592000.0,
        "YEAR" | "YEARS" => 31536000.0,
        _ => 1.0,
    }
}
