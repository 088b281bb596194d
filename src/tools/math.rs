//! Math toolkit.
//!
//! Two-operand integer operations (`add`, `multiply`) and `evaluate`, which
//! computes an arithmetic expression with `+ - * /`, unary signs and
//! parentheses using the usual precedence rules.

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::{RelayError, Result};
use crate::tool::{InputSchema, ParamType, Tool, ToolCallResult, ToolRegistry};

const MAX_NESTING: usize = 64;

pub fn math_toolkit() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(AddTool)?;
    registry.register(MultiplyTool)?;
    registry.register(EvaluateTool)?;
    Ok(registry)
}

fn operands_schema() -> InputSchema {
    InputSchema::new()
        .required("a", ParamType::Integer)
        .required("b", ParamType::Integer)
        .describe("a", "First operand")
        .describe("b", "Second operand")
}

struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two integers."
    }

    fn input_schema(&self) -> InputSchema {
        operands_schema()
    }

    async fn call(&self, input: Value) -> Result<ToolCallResult> {
        let (a, b) = operands(&input, self.name())?;
        Ok(match a.checked_add(b) {
            Some(sum) => ToolCallResult::value(json!(sum)),
            None => ToolCallResult::failure("integer overflow"),
        })
    }
}

struct MultiplyTool;

#[async_trait]
impl Tool for MultiplyTool {
    fn name(&self) -> &str {
        "multiply"
    }

    fn description(&self) -> &str {
        "Multiply two integers."
    }

    fn input_schema(&self) -> InputSchema {
        operands_schema()
    }

    async fn call(&self, input: Value) -> Result<ToolCallResult> {
        let (a, b) = operands(&input, self.name())?;
        Ok(match a.checked_mul(b) {
            Some(product) => ToolCallResult::value(json!(product)),
            None => ToolCallResult::failure("integer overflow"),
        })
    }
}

struct EvaluateTool;

#[async_trait]
impl Tool for EvaluateTool {
    fn name(&self) -> &str {
        "evaluate"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression such as \"(3 + 5) * 12\"."
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new()
            .required("expression", ParamType::String)
            .describe("expression", "Expression using + - * / and parentheses")
    }

    async fn call(&self, input: Value) -> Result<ToolCallResult> {
        let expression = input
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::InvalidArguments {
                name: self.name().into(),
                reason: "missing `expression`".into(),
            })?;

        Ok(match evaluate(expression) {
            Ok(number) => ToolCallResult::value(number_to_json(number)),
            Err(err) => ToolCallResult::failure(err.to_string()),
        })
    }
}

fn operands(input: &Value, tool: &str) -> Result<(i64, i64)> {
    let get = |field: &str| {
        input
            .get(field)
            .and_then(Value::as_i64)
            .ok_or_else(|| RelayError::InvalidArguments {
                name: tool.to_string(),
                reason: format!("missing integer `{field}`"),
            })
    };
    Ok((get("a")?, get("b")?))
}

/// Integral results are reported as integers so `96.0` reads as `96`.
fn number_to_json(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < 9.0e15 {
        json!(number as i64)
    } else {
        json!(number)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("unexpected character `{0}` at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("expression is nested too deeply")]
    TooDeep,
    #[error("result is not a finite number")]
    NotFinite,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> std::result::Result<Vec<(Token, usize)>, EvalError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' | '×' => Token::Star,
            '/' | '÷' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| EvalError::InvalidNumber(literal.clone()))?;
                tokens.push((Token::Number(value), start));
                continue;
            }
            other => return Err(EvalError::UnexpectedChar(other, i)),
        };
        tokens.push((token, i));
        i += 1;
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let item = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        item
    }

    fn expression(&mut self) -> std::result::Result<f64, EvalError> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            let op = op.clone();
            match op {
                Token::Plus => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Token::Minus => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> std::result::Result<f64, EvalError> {
        let mut value = self.factor()?;
        while let Some(op) = self.peek() {
            let op = op.clone();
            match op {
                Token::Star => {
                    self.pos += 1;
                    value *= self.factor()?;
                }
                Token::Slash => {
                    self.pos += 1;
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

    fn factor(&mut self) -> std::result::Result<f64, EvalError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(EvalError::TooDeep);
        }
        let value = match self.next() {
            Some((Token::Number(n), _)) => n,
            Some((Token::Minus, _)) => -self.factor()?,
            Some((Token::Plus, _)) => self.factor()?,
            Some((Token::LParen, _)) => {
                let inner = self.expression()?;
                match self.next() {
                    Some((Token::RParen, _)) => inner,
                    Some((_, at)) => return Err(EvalError::UnexpectedChar(self.char_at(at), at)),
                    None => return Err(EvalError::UnexpectedEnd),
                }
            }
            Some((_, at)) => return Err(EvalError::UnexpectedChar(self.char_at(at), at)),
            None => return Err(EvalError::UnexpectedEnd),
        };
        self.depth -= 1;
        Ok(value)
    }

    fn char_at(&self, at: usize) -> char {
        self.tokens
            .iter()
            .find(|(_, pos)| *pos == at)
            .map(|(token, _)| match token {
                Token::Plus => '+',
                Token::Minus => '-',
                Token::Star => '*',
                Token::Slash => '/',
                Token::LParen => '(',
                Token::RParen => ')',
                Token::Number(_) => '#',
            })
            .unwrap_or('?')
    }
}

/// Evaluates an arithmetic expression.
pub fn evaluate(expression: &str) -> std::result::Result<f64, EvalError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expression()?;
    if let Some((_, at)) = parser.tokens.get(parser.pos) {
        return Err(EvalError::UnexpectedChar(parser.char_at(*at), *at));
    }
    if !value.is_finite() {
        return Err(EvalError::NotFinite);
    }
    Ok(value)
}
