//! Arithmetic expression evaluator behind `EVAL(...)`
//!
//! Hand-written tokenizer plus recursive-descent parser over a restricted
//! grammar:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := ('-' | '+') unary | power
//! power   := primary ('^' unary)?
//! primary := NUMBER | STRING | IDENT '(' args? ')' | '(' expr ')'
//! ```
//!
//! `+` concatenates when either side is a string; the other operators coerce
//! to numbers. Division by zero follows IEEE-754.

use thiserror::Error;
use tracing::warn;

use crate::value::{format_number, Value};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("Unexpected character '{0}'")]
    UnexpectedChar(char),

    #[error("Unterminated string literal")]
    UnterminatedString,

    #[error("Unexpected token {0}")]
    UnexpectedToken(String),

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Expression nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("Function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Num(n) => format_number(*n),
            Token::Str(s) => format!("'{}'", s),
            Token::Ident(name) => name.clone(),
            Token::Op(op) => op.to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::Comma => ",".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent part
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Num(value));
            }
            '"' | '\'' => {
                let quote = c;
                i += 1;
                let mut text = String::new();
                loop {
                    match chars.get(i) {
                        None => return Err(ExprError::UnterminatedString),
                        Some('\\') if i + 1 < chars.len() => {
                            text.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

/// Bound on nested parentheses, unary operators and exponents
const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ExprError::UnexpectedToken(token.describe())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn parse_expr(&mut self) -> Result<Value, ExprError> {
        let mut left = self.parse_term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.next();
            let right = self.parse_term()?;
            left = if op == '+' {
                add(left, right)
            } else {
                Value::Num(left.to_number_lossy() - right.to_number_lossy())
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Value, ExprError> {
        let mut left = self.parse_unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.next();
            let right = self.parse_unary()?;
            let (l, r) = (left.to_number_lossy(), right.to_number_lossy());
            left = Value::Num(match op {
                '*' => l * r,
                '/' => l / r,
                _ => l % r,
            });
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Value, ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExprError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let value = self.parse_unary_operand();
        self.depth -= 1;
        value
    }

    fn parse_unary_operand(&mut self) -> Result<Value, ExprError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.next();
                let operand = self.parse_unary()?;
                Ok(Value::Num(-operand.to_number_lossy()))
            }
            Some(Token::Op('+')) => {
                self.next();
                let operand = self.parse_unary()?;
                Ok(Value::Num(operand.to_number_lossy()))
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Value, ExprError> {
        let base = self.parse_primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.next();
            // right-associative: 2^3^2 == 2^(3^2)
            let exponent = self.parse_unary()?;
            return Ok(Value::Num(
                base.to_number_lossy().powf(exponent.to_number_lossy()),
            ));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Value, ExprError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Value::Num(n)),
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::LParen) => {
                let value = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                self.expect(Token::LParen)?;
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.next();
                            continue;
                        }
                        break;
                    }
                }
                self.expect(Token::RParen)?;
                call_function(&name, args)
            }
            Some(token) => Err(ExprError::UnexpectedToken(token.describe())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

fn add(left: Value, right: Value) -> Value {
    match (&left, &right) {
        (Value::Num(l), Value::Num(r)) => Value::Num(l + r),
        _ => Value::Str(format!("{}{}", left, right)),
    }
}

fn call_function(name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
    let bare = name
        .strip_prefix("Math.")
        .or_else(|| name.strip_prefix("math."))
        .unwrap_or(name)
        .to_ascii_lowercase();

    let unary = |f: fn(f64) -> f64| -> Result<Value, ExprError> {
        if args.len() != 1 {
            return Err(ExprError::Arity {
                name: bare.clone(),
                expected: 1,
                got: args.len(),
            });
        }
        Ok(Value::Num(f(args[0].to_number_lossy())))
    };

    match bare.as_str() {
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        // half-up rounding: round(-2.5) == -2
        "round" => unary(|x| (x + 0.5).floor()),
        "abs" => unary(f64::abs),
        "sqrt" => unary(f64::sqrt),
        "concat" => Ok(Value::Str(args.iter().map(Value::to_string).collect())),
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}

/// Parse and evaluate, reporting malformed input
pub fn try_evaluate(expression: &str) -> Result<Value, ExprError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.parse_expr()?;
    match parser.next() {
        None => Ok(value),
        Some(token) => Err(ExprError::UnexpectedToken(token.describe())),
    }
}

/// Evaluate an already-expanded expression. Empty or malformed input degrades
/// to the empty string instead of failing.
pub fn evaluate(expression: &str) -> Value {
    if expression.trim().is_empty() {
        return Value::empty();
    }
    match try_evaluate(expression) {
        Ok(value) => value,
        Err(err) => {
            warn!(expression = %expression, "EVAL failed: {}", err);
            Value::empty()
        }
    }
}

/// Extract the argument of an `EVAL("...")` value, if the whole value is one
pub fn eval_argument(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let head = trimmed.get(..5)?;
    if trimmed.len() < 6 || !head.eq_ignore_ascii_case("EVAL(") || !trimmed.ends_with(')') {
        return None;
    }
    let inner = trimmed[5..trimmed.len() - 1].trim();
    let quote = inner.chars().next()?;
    if (quote != '"' && quote != '\'') || inner.len() < 2 || !inner.ends_with(quote) {
        return Some(inner.to_string());
    }
    let body = &inner[1..inner.len() - 1];
    let escaped_quote = format!("\\{}", quote);
    Some(body.replace(&escaped_quote, &quote.to_string()))
}
