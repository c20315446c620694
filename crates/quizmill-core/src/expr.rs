//! Arithmetic expression parsing and evaluation.
//!
//! Powers the `NumExpr`/`NumExprTex` tags and the expected-value expression
//! of numeric questions. A hand-written tokenizer and precedence-climbing
//! parser over `+ - * / ^`, parentheses, float literals, and parameter
//! names; `^` is right-associative and binds tighter than unary minus.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::model::ParameterMap;

/// Errors from expression parsing or evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("unexpected character '{0}' in expression")]
    UnexpectedChar(char),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected token '{0}' in expression")]
    UnexpectedToken(String),

    #[error("malformed number '{0}'")]
    MalformedNumber(String),

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("variable '{0}' does not hold a numeric value")]
    NonNumericValue(String),
}

/// A parsed arithmetic expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
        }
    }

    /// Left/right binding powers. `Pow` has a lower right power so that
    /// `2 ^ 3 ^ 2` parses as `2 ^ (3 ^ 2)`.
    fn binding_power(self) -> (u8, u8) {
        match self {
            BinOp::Add | BinOp::Sub => (1, 2),
            BinOp::Mul | BinOp::Div => (3, 4),
            BinOp::Pow => (8, 7),
        }
    }
}

// Unary minus binds looser than `^`: `-2 ^ 2` is `-(2 ^ 2)`.
const NEG_BINDING_POWER: u8 = 5;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(BinOp),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Op(BinOp::Add));
            }
            '-' => {
                chars.next();
                tokens.push(Token::Op(BinOp::Sub));
            }
            '*' => {
                chars.next();
                tokens.push(Token::Op(BinOp::Mul));
            }
            '/' => {
                chars.next();
                tokens.push(Token::Op(BinOp::Div));
            }
            '^' => {
                chars.next();
                tokens.push(Token::Op(BinOp::Pow));
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &input[start..end];
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ExprError::MalformedNumber(literal.to_string()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(input[start..end].to_string()));
            }
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ExprError> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token.ok_or(ExprError::UnexpectedEnd)
    }

    fn expr(&mut self, min_power: u8) -> Result<Expr, ExprError> {
        let mut lhs = match self.next()? {
            Token::Number(value) => Expr::Number(value),
            Token::Ident(name) => Expr::Variable(name),
            Token::Op(BinOp::Sub) => Expr::Neg(Box::new(self.expr(NEG_BINDING_POWER)?)),
            Token::LParen => {
                let inner = self.expr(0)?;
                match self.next()? {
                    Token::RParen => inner,
                    other => return Err(ExprError::UnexpectedToken(format!("{other:?}"))),
                }
            }
            other => return Err(ExprError::UnexpectedToken(format!("{other:?}"))),
        };

        while let Some(&Token::Op(op)) = self.peek() {
            let (left_power, right_power) = op.binding_power();
            if left_power < min_power {
                break;
            }
            self.pos += 1;
            let rhs = self.expr(right_power)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }
}

/// Parse an arithmetic expression.
pub fn parse(input: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExprError::UnexpectedEnd);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr(0)?;
    if let Some(trailing) = parser.peek() {
        return Err(ExprError::UnexpectedToken(format!("{trailing:?}")));
    }
    Ok(expr)
}

impl Expr {
    /// Evaluate against a parameter map. Every referenced variable must be
    /// present and hold a value that parses as a number.
    pub fn eval(&self, params: &ParameterMap) -> Result<f64, ExprError> {
        match self {
            Expr::Number(value) => Ok(*value),
            Expr::Variable(name) => lookup(name, params),
            Expr::Neg(inner) => Ok(-inner.eval(params)?),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.eval(params)?;
                let rhs = rhs.eval(params)?;
                Ok(match op {
                    BinOp::Add => lhs + rhs,
                    BinOp::Sub => lhs - rhs,
                    BinOp::Mul => lhs * rhs,
                    BinOp::Div => lhs / rhs,
                    BinOp::Pow => lhs.powf(rhs),
                })
            }
        }
    }

    /// Collect every variable name referenced by the expression.
    pub fn variables(&self) -> BTreeSet<String> {
        fn walk(expr: &Expr, out: &mut BTreeSet<String>) {
            match expr {
                Expr::Number(_) => {}
                Expr::Variable(name) => {
                    out.insert(name.clone());
                }
                Expr::Neg(inner) => walk(inner, out),
                Expr::Binary { lhs, rhs, .. } => {
                    walk(lhs, out);
                    walk(rhs, out);
                }
            }
        }
        let mut out = BTreeSet::new();
        walk(self, &mut out);
        out
    }

    /// Render the expression with parameter values substituted, keeping the
    /// structure visible instead of collapsing to a number. Used by the
    /// typeset tag; exponents come out as `^{...}`.
    pub fn display_with(&self, params: &ParameterMap) -> Result<String, ExprError> {
        self.display_inner(params, 0)
    }

    fn display_inner(&self, params: &ParameterMap, parent_power: u8) -> Result<String, ExprError> {
        match self {
            Expr::Number(value) => Ok(format_number(*value)),
            Expr::Variable(name) => Ok(format_number(lookup(name, params)?)),
            Expr::Neg(inner) => {
                let rendered = inner.display_inner(params, NEG_BINDING_POWER)?;
                Ok(format!("-{rendered}"))
            }
            Expr::Binary { op, lhs, rhs } => {
                let (left_power, right_power) = op.binding_power();
                let lhs = lhs.display_inner(params, left_power)?;
                let rhs = rhs.display_inner(params, right_power)?;
                let rendered = match op {
                    BinOp::Pow => format!("{lhs}^{{{rhs}}}"),
                    op => format!("{lhs} {} {rhs}", op.symbol()),
                };
                if left_power < parent_power {
                    Ok(format!("({rendered})"))
                } else {
                    Ok(rendered)
                }
            }
        }
    }
}

fn lookup(name: &str, params: &ParameterMap) -> Result<f64, ExprError> {
    let raw = params
        .get(name)
        .ok_or_else(|| ExprError::UnknownVariable(name.to_string()))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ExprError::NonNumericValue(name.to_string()))
}

/// Format an evaluation result as a plain number: integral values drop the
/// fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
