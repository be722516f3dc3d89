use async_trait::async_trait;
use serde_json::{json, Value};
use warden_agent::{AgentTool, ToolDefinition, ToolOutcome};

/// Evaluates basic arithmetic without touching a shell: numbers, `+ - * /`,
/// unary sign, and parentheses. Everything else is rejected.
pub struct CalculateTool;

#[async_trait]
impl AgentTool for CalculateTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "calculate".to_string(),
            description: "Evaluate a basic arithmetic expression".to_string(),
            parameters: json!({
                "type": "string",
                "description": "Expression using numbers, + - * / and parentheses"
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolOutcome {
        let Some(expression) = arguments.as_str() else {
            return ToolOutcome::error(json!({ "error": "Invalid arguments" }));
        };

        match evaluate_expression(expression) {
            Ok(value) => ToolOutcome::ok(json!({ "result": render_number(value) })),
            Err(error) => ToolOutcome::error(json!({ "error": error.message() })),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvalError {
    InvalidOperation,
    DivisionByZero,
}

impl EvalError {
    fn message(self) -> &'static str {
        match self {
            EvalError::InvalidOperation => "Invalid operation detected",
            EvalError::DivisionByZero => "division by zero",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    OpenParen,
    CloseParen,
}

fn tokenize(expression: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = expression.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::OpenParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::CloseParen);
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&digit) = chars.peek() {
                    if digit.is_ascii_digit() || digit == '.' {
                        literal.push(digit);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: f64 = literal.parse().map_err(|_| EvalError::InvalidOperation)?;
                tokens.push(Token::Number(value));
            }
            _ => return Err(EvalError::InvalidOperation),
        }
    }

    Ok(tokens)
}

// Caps parser recursion; nesting deeper than this is rejected.
const MAX_NESTING_DEPTH: usize = 64;

struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.position).copied()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expression(&mut self) -> Result<f64, EvalError> {
        let mut value = self.term()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Plus => {
                    self.advance();
                    value += self.term()?;
                }
                Token::Minus => {
                    self.advance();
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.factor()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Star => {
                    self.advance();
                    value *= self.factor()?;
                }
                Token::Slash => {
                    self.advance();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, EvalError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(EvalError::InvalidOperation);
        }
        self.depth += 1;
        let value = match self.advance() {
            Some(Token::Minus) => -self.factor()?,
            Some(Token::Plus) => self.factor()?,
            Some(Token::Number(value)) => value,
            Some(Token::OpenParen) => {
                let value = self.expression()?;
                match self.advance() {
                    Some(Token::CloseParen) => value,
                    _ => return Err(EvalError::InvalidOperation),
                }
            }
            _ => return Err(EvalError::InvalidOperation),
        };
        self.depth -= 1;
        Ok(value)
    }
}

fn evaluate_expression(expression: &str) -> Result<f64, EvalError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens: &tokens,
        position: 0,
        depth: 0,
    };
    let value = parser.expression()?;
    if parser.position != tokens.len() {
        return Err(EvalError::InvalidOperation);
    }
    if !value.is_finite() {
        return Err(EvalError::InvalidOperation);
    }
    Ok(value)
}

/// Whole results render as JSON integers, everything else as floats.
fn render_number(value: f64) -> Value {
    const EXACT_INTEGER_BOUND: f64 = 9_007_199_254_740_992.0;
    if value.fract() == 0.0 && value.abs() < EXACT_INTEGER_BOUND {
        json!(value as i64)
    } else {
        json!(value)
    }
}
