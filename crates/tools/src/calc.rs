//! `calc`: evaluates arithmetic expressions.
//!
//! Supports `+`, `-`, `*`, `/`, exponentiation (`^` or `**`, right
//! associative), parentheses, unary negation and decimals. Evaluation
//! climbs operator precedence directly over the input text.

use async_trait::async_trait;
use toolbridge_core::adapter::CallContext;
use toolbridge_core::error::ToolError;
use toolbridge_core::tool::LocalTool;

pub struct CalcTool;

#[async_trait]
impl LocalTool for CalcTool {
    fn name(&self) -> &str {
        "calc"
    }

    fn description(&self) -> &str {
        "Execute some simple math. E.g. 4 * (20 / 6^9) ** 0.5"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The arithmetic expression to evaluate, e.g. '(2 + 3) * 4'"
                }
            },
            "required": ["expression"]
        })
    }

    fn glyph(&self) -> Option<&str> {
        Some("🧮")
    }

    async fn execute(
        &self,
        _ctx: &CallContext,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let expr = arguments["expression"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'expression' argument".into()))?;

        let value = evaluate(expr).map_err(|reason| ToolError::ExecutionFailed {
            tool_name: "calc".into(),
            reason,
        })?;

        Ok(serde_json::json!({
            "expression": expr,
            "result": format_number(value),
        }))
    }
}

/// Render integers without a trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let mut src = Source { text: expr, at: 0 };
    let value = climb(&mut src, 0)?;
    match src.peek() {
        None => Ok(value),
        Some(c) => Err(format!("Unexpected '{c}' at offset {}", src.at)),
    }
}

/// Binding power of a leading minus: looser than `^`, tighter than `*`.
const NEGATE: u8 = 5;

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    /// (left, right) binding powers. Right below left makes `^` right
    /// associative.
    fn binding(self) -> (u8, u8) {
        match self {
            BinOp::Add | BinOp::Sub => (1, 2),
            BinOp::Mul | BinOp::Div => (3, 4),
            BinOp::Pow => (6, 5),
        }
    }

    fn apply(self, lhs: f64, rhs: f64) -> Result<f64, String> {
        match self {
            BinOp::Add => Ok(lhs + rhs),
            BinOp::Sub => Ok(lhs - rhs),
            BinOp::Mul => Ok(lhs * rhs),
            BinOp::Div if rhs == 0.0 => Err("Division by zero".into()),
            BinOp::Div => Ok(lhs / rhs),
            BinOp::Pow => {
                let value = lhs.powf(rhs);
                if value.is_finite() {
                    Ok(value)
                } else {
                    Err("Result is not a finite number".into())
                }
            }
        }
    }
}

/// Cursor over the expression text. Whitespace is skipped on every peek.
struct Source<'a> {
    text: &'a str,
    at: usize,
}

impl Source<'_> {
    fn rest(&self) -> &str {
        &self.text[self.at..]
    }

    fn peek(&mut self) -> Option<char> {
        let text = self.text;
        let trimmed = text[self.at..].trim_start();
        self.at = self.text.len() - trimmed.len();
        trimmed.chars().next()
    }

    fn bump(&mut self, bytes: usize) {
        self.at += bytes;
    }

    /// The operator at the cursor and its width, without consuming it.
    fn operator(&mut self) -> Option<(BinOp, usize)> {
        let op = match self.peek()? {
            '+' => (BinOp::Add, 1),
            '-' => (BinOp::Sub, 1),
            '*' if self.rest().starts_with("**") => (BinOp::Pow, 2),
            '*' => (BinOp::Mul, 1),
            '/' => (BinOp::Div, 1),
            '^' => (BinOp::Pow, 1),
            _ => return None,
        };
        Some(op)
    }

    fn number(&mut self) -> Result<f64, String> {
        let len = self
            .rest()
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(self.rest().len());
        let literal = &self.rest()[..len];
        let value = literal
            .parse()
            .map_err(|_| format!("Invalid number: {literal}"))?;
        self.bump(len);
        Ok(value)
    }
}

/// Fold operators whose left binding power is at least `floor`.
fn climb(src: &mut Source<'_>, floor: u8) -> Result<f64, String> {
    let mut lhs = operand(src)?;
    while let Some((op, width)) = src.operator() {
        let (left, right) = op.binding();
        if left < floor {
            break;
        }
        src.bump(width);
        let rhs = climb(src, right)?;
        lhs = op.apply(lhs, rhs)?;
    }
    Ok(lhs)
}

fn operand(src: &mut Source<'_>) -> Result<f64, String> {
    match src.peek() {
        Some('-') => {
            src.bump(1);
            Ok(-climb(src, NEGATE)?)
        }
        Some('(') => {
            src.bump(1);
            let inner = climb(src, 0)?;
            if src.peek() != Some(')') {
                return Err("Expected closing parenthesis".into());
            }
            src.bump(1);
            Ok(inner)
        }
        Some(c) if c.is_ascii_digit() || c == '.' => src.number(),
        Some(c) => Err(format!("Unexpected '{c}' at offset {}", src.at)),
        None => Err("Unexpected end of expression".into()),
    }
}
