// Evaluator for `expression` rules: infix boolean/comparison expressions
// over context variables. Declared variables are substituted textually,
// then the text is parsed and evaluated by a private parser with no name
// lookup of any kind. Any identifier that survives substitution (other
// than the operators and boolean literals) aborts evaluation, which closes
// the injection hole a host-language eval would open.

use serde_json::{Map, Value};

use crate::error::{GlassBoxError, Result};
use crate::value::{lookup_path, truthy, value_to_string};

/// Result of evaluating an expression rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionOutcome {
    pub result: bool,
    /// Display form of the final value (`true`, `42`, …).
    pub value_text: String,
    /// The expression after variable substitution.
    pub substituted: String,
}

#[derive(Debug, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        ExpressionEvaluator
    }

    /// Substitute `variables` (name → declared type) into `expression`,
    /// then parse and evaluate the result.
    pub fn evaluate(
        &self,
        expression: &str,
        variables: &Map<String, Value>,
        context: &Value,
    ) -> Result<ExpressionOutcome> {
        let substituted = substitute(expression, variables, context);

        let tokens = scan(&substituted)?;
        let mut parser = ExprParser {
            tokens,
            index: 0,
        };
        let value = parser.parse_or()?;

        if let Some(token) = parser.tokens.get(parser.index) {
            return Err(GlassBoxError::rule_execution(
                format!("Unexpected token in expression: {token}"),
                None,
            ));
        }

        Ok(ExpressionOutcome {
            result: value.truthy(),
            value_text: value.display(),
            substituted,
        })
    }
}

fn substitute(expression: &str, variables: &Map<String, Value>, context: &Value) -> String {
    let mut text = expression.to_string();

    for (name, declared_type) in variables {
        let Some(value) = lookup_path(context, name) else {
            continue;
        };
        let replacement = if declared_type.as_str() == Some("boolean") {
            truthy(value).to_string()
        } else {
            value_to_string(value)
        };
        text = text.replace(name.as_str(), &replacement);
    }

    text
}

#[derive(Debug, Clone, PartialEq)]
enum ExprValue {
    Bool(bool),
    Number(f64),
    Str(String),
}

impl ExprValue {
    fn truthy(&self) -> bool {
        match self {
            ExprValue::Bool(b) => *b,
            ExprValue::Number(n) => *n != 0.0,
            ExprValue::Str(s) => !s.is_empty(),
        }
    }

    fn display(&self) -> String {
        match self {
            ExprValue::Bool(b) => b.to_string(),
            ExprValue::Number(n) => n.to_string(),
            ExprValue::Str(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ExprToken {
    Number(f64),
    Str(String),
    Bool(bool),
    And,
    Or,
    Not,
    Cmp(&'static str),
    LeftParen,
    RightParen,
}

impl std::fmt::Display for ExprToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExprToken::Number(n) => write!(f, "{n}"),
            ExprToken::Str(s) => write!(f, "'{s}'"),
            ExprToken::Bool(b) => write!(f, "{b}"),
            ExprToken::And => write!(f, "and"),
            ExprToken::Or => write!(f, "or"),
            ExprToken::Not => write!(f, "not"),
            ExprToken::Cmp(op) => write!(f, "{op}"),
            ExprToken::LeftParen => write!(f, "("),
            ExprToken::RightParen => write!(f, ")"),
        }
    }
}

fn scan(text: &str) -> Result<Vec<ExprToken>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let ch = chars[pos];

        if ch.is_whitespace() {
            pos += 1;
            continue;
        }

        if ch.is_ascii_digit()
            || (ch == '-' && chars.get(pos + 1).is_some_and(char::is_ascii_digit))
        {
            let start = pos;
            pos += 1;
            while pos < chars.len()
                && (chars[pos].is_ascii_digit() || chars[pos] == '.')
            {
                pos += 1;
            }
            let lexeme: String = chars[start..pos].iter().collect();
            let number: f64 = lexeme.parse().map_err(|_| {
                GlassBoxError::rule_execution(format!("Invalid number in expression: {lexeme}"), None)
            })?;
            tokens.push(ExprToken::Number(number));
            continue;
        }

        if ch == '"' || ch == '\'' {
            let quote = ch;
            let start = pos + 1;
            pos += 1;
            while pos < chars.len() && chars[pos] != quote {
                pos += 1;
            }
            if pos >= chars.len() {
                return Err(GlassBoxError::rule_execution(
                    "Unterminated string in expression",
                    None,
                ));
            }
            let inner: String = chars[start..pos].iter().collect();
            tokens.push(ExprToken::Str(inner));
            pos += 1;
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            let word: String = chars[start..pos].iter().collect();
            match word.to_lowercase().as_str() {
                "and" => tokens.push(ExprToken::And),
                "or" => tokens.push(ExprToken::Or),
                "not" => tokens.push(ExprToken::Not),
                "true" => tokens.push(ExprToken::Bool(true)),
                "false" => tokens.push(ExprToken::Bool(false)),
                _ => {
                    // Anything else is an unsubstituted name: reject.
                    return Err(GlassBoxError::rule_execution(
                        format!("Unresolved identifier in expression: {word}"),
                        None,
                    ));
                }
            }
            continue;
        }

        let two: String = chars[pos..chars.len().min(pos + 2)].iter().collect();
        match two.as_str() {
            "==" => {
                tokens.push(ExprToken::Cmp("=="));
                pos += 2;
                continue;
            }
            "!=" => {
                tokens.push(ExprToken::Cmp("!="));
                pos += 2;
                continue;
            }
            ">=" => {
                tokens.push(ExprToken::Cmp(">="));
                pos += 2;
                continue;
            }
            "<=" => {
                tokens.push(ExprToken::Cmp("<="));
                pos += 2;
                continue;
            }
            _ => {}
        }

        match ch {
            '>' => tokens.push(ExprToken::Cmp(">")),
            '<' => tokens.push(ExprToken::Cmp("<")),
            '(' => tokens.push(ExprToken::LeftParen),
            ')' => tokens.push(ExprToken::RightParen),
            other => {
                return Err(GlassBoxError::rule_execution(
                    format!("Unexpected character in expression: {other}"),
                    None,
                ));
            }
        }
        pos += 1;
    }

    Ok(tokens)
}

struct ExprParser {
    tokens: Vec<ExprToken>,
    index: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&ExprToken> {
        self.tokens.get(self.index)
    }

    fn advance(&mut self) {
        self.index += 1;
    }

    fn parse_or(&mut self) -> Result<ExprValue> {
        let mut value = self.parse_and()?;
        while matches!(self.peek(), Some(ExprToken::Or)) {
            self.advance();
            let right = self.parse_and()?;
            value = ExprValue::Bool(value.truthy() || right.truthy());
        }
        Ok(value)
    }

    fn parse_and(&mut self) -> Result<ExprValue> {
        let mut value = self.parse_not()?;
        while matches!(self.peek(), Some(ExprToken::And)) {
            self.advance();
            let right = self.parse_not()?;
            value = ExprValue::Bool(value.truthy() && right.truthy());
        }
        Ok(value)
    }

    fn parse_not(&mut self) -> Result<ExprValue> {
        if matches!(self.peek(), Some(ExprToken::Not)) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(ExprValue::Bool(!inner.truthy()));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<ExprValue> {
        let left = self.parse_primary()?;

        let op = match self.peek() {
            Some(ExprToken::Cmp(op)) => *op,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_primary()?;

        let result = compare(&left, op, &right)?;
        Ok(ExprValue::Bool(result))
    }

    fn parse_primary(&mut self) -> Result<ExprValue> {
        match self.peek().cloned() {
            Some(ExprToken::Number(n)) => {
                self.advance();
                Ok(ExprValue::Number(n))
            }
            Some(ExprToken::Str(s)) => {
                self.advance();
                Ok(ExprValue::Str(s))
            }
            Some(ExprToken::Bool(b)) => {
                self.advance();
                Ok(ExprValue::Bool(b))
            }
            Some(ExprToken::LeftParen) => {
                self.advance();
                let value = self.parse_or()?;
                match self.peek() {
                    Some(ExprToken::RightParen) => {
                        self.advance();
                        Ok(value)
                    }
                    _ => Err(GlassBoxError::rule_execution(
                        "Expected ')' in expression",
                        None,
                    )),
                }
            }
            Some(token) => Err(GlassBoxError::rule_execution(
                format!("Unexpected token in expression: {token}"),
                None,
            )),
            None => Err(GlassBoxError::rule_execution(
                "Unexpected end of expression",
                None,
            )),
        }
    }
}

fn compare(left: &ExprValue, op: &str, right: &ExprValue) -> Result<bool> {
    match (left, right) {
        (ExprValue::Number(l), ExprValue::Number(r)) => Ok(match op {
            "==" => l == r,
            "!=" => l != r,
            ">" => l > r,
            ">=" => l >= r,
            "<" => l < r,
            "<=" => l <= r,
            _ => false,
        }),
        (ExprValue::Str(l), ExprValue::Str(r)) => Ok(match op {
            "==" => l == r,
            "!=" => l != r,
            ">" => l > r,
            ">=" => l >= r,
            "<" => l < r,
            "<=" => l <= r,
            _ => false,
        }),
        (ExprValue::Bool(l), ExprValue::Bool(r)) => match op {
            "==" => Ok(l == r),
            "!=" => Ok(l != r),
            _ => Err(GlassBoxError::rule_execution(
                format!("Operator {op} is not defined for booleans"),
                None,
            )),
        },
        _ => Err(GlassBoxError::rule_execution(
            format!(
                "Cannot compare {} with {}",
                left.display(),
                right.display()
            ),
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn substitutes_and_evaluates() {
        let context = json!({"user": {"age": 25}, "account": {"is_active": true}});
        let variables = vars(&[("user.age", "number"), ("account.is_active", "boolean")]);

        let outcome = ExpressionEvaluator::new()
            .evaluate(
                "user.age >= 18 and account.is_active == true",
                &variables,
                &context,
            )
            .unwrap();

        assert!(outcome.result);
        assert_eq!(outcome.substituted, "25 >= 18 and true == true");
    }

    #[test]
    fn rejects_unresolved_identifiers() {
        let context = json!({"user": {"age": 25}});
        let variables = vars(&[("user.age", "number")]);

        let err = ExpressionEvaluator::new()
            .evaluate("user.age >= 18 and __import__", &variables, &context)
            .unwrap_err();
        assert!(err.to_string().contains("Unresolved identifier"));
    }

    #[test]
    fn rejects_missing_variables() {
        let context = json!({"user": {}});
        let variables = vars(&[("user.age", "number")]);

        // user.age is absent, so the name survives substitution.
        let err = ExpressionEvaluator::new()
            .evaluate("user.age >= 18", &variables, &context)
            .unwrap_err();
        assert!(err.to_string().contains("Unresolved identifier"));
    }

    #[test]
    fn boolean_and_grouping_semantics() {
        let context = json!({});
        let variables = Map::new();
        let evaluator = ExpressionEvaluator::new();

        let outcome = evaluator
            .evaluate("not (1 > 2) and (3 <= 3 or false)", &variables, &context)
            .unwrap();
        assert!(outcome.result);

        let outcome = evaluator
            .evaluate("'a' != 'b' and 2 == 2.0", &variables, &context)
            .unwrap();
        assert!(outcome.result);
    }

    #[test]
    fn capitalized_boolean_literals_are_accepted() {
        let context = json!({"flag": true});
        let variables = vars(&[("flag", "boolean")]);

        let outcome = ExpressionEvaluator::new()
            .evaluate("flag == True", &variables, &context)
            .unwrap();
        assert!(outcome.result);
    }
}
