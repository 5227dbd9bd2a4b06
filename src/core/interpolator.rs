// src/core/interpolator.rs

//! Deferred evaluation of `[eval:<expr>]` markers in configuration values.
//!
//! The expression language is closed: integer and string literals, integer
//! arithmetic, parentheses, and a fixed set of side-effect-free functions:
//!
//! - `var(seg, ...)`   value at this path of the merged document
//! - `env(name)`       environment variable
//! - `host()`          execution host name
//! - `join(a, ...)`    path join
//! - `concat(a, ...)`  string concatenation
//! - `uc(x)`, `lc(x)`  case conversion
//! - `default(a, b)`   `b` when `a` is empty or undefined
//!
//! `var()` targets are themselves evaluated before use, so the order in
//! which the tree is walked never changes the result.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

use crate::constants::MAX_RECURSION_DEPTH;

lazy_static! {
    static ref EVAL_RE: Regex = Regex::new(r"\[eval:(.+?)\]").expect("valid eval regex");
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpolationError {
    #[error("syntax error in '{expr}': {reason}")]
    Syntax { expr: String, reason: String },
    #[error("unknown function '{0}()'")]
    UnknownFunction(String),
    #[error("'{function}()' expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: String,
        got: usize,
    },
    #[error("'{0}' is not defined")]
    UndefinedVariable(String),
    #[error("'{0}' is not a scalar value")]
    NotScalar(String),
    #[error("circular reference: {0}")]
    Circular(String),
    #[error("maximum recursion depth ({0}) exceeded")]
    MaxDepth(u32),
    #[error("'{op}' expects numbers, got '{left}' and '{right}'")]
    NotANumber {
        op: char,
        left: String,
        right: String,
    },
    #[error("integer overflow or division by zero in '{0}'")]
    Arithmetic(char),
    #[error("environment variable '{0}' is not set")]
    UnsetEnv(String),
}

type EvalResult<T> = Result<T, InterpolationError>;

/// The value of an evaluated expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Text(String),
}

impl Scalar {
    fn as_text(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    fn into_json(self) -> Value {
        match self {
            Self::Int(i) => Value::from(i),
            Self::Text(s) => Value::String(s),
        }
    }
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Op(char),
}

fn tokenize(expr: &str) -> EvalResult<Vec<Token>> {
    let syntax = |reason: String| InterpolationError::Syntax {
        expr: expr.to_string(),
        reason,
    };
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | ',' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    _ => Token::Comma,
                });
            }
            '+' | '-' | '*' | '/' | '%' => {
                chars.next();
                tokens.push(Token::Op(c));
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut literal = String::new();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some(escaped) => literal.push(escaped),
                            None => break,
                        },
                        ch if ch == quote => {
                            closed = true;
                            break;
                        }
                        ch => literal.push(ch),
                    }
                }
                if !closed {
                    return Err(syntax("unterminated string literal".to_string()));
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let value = digits
                    .parse()
                    .map_err(|_| syntax(format!("integer '{}' out of range", digits)))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if !(d.is_ascii_alphanumeric() || d == '_') {
                        break;
                    }
                    ident.push(d);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(syntax(format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

// --- Parser ---

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(Scalar),
    Call(String, Vec<Expr>),
    Neg(Box<Expr>),
    Binary(char, Box<Expr>, Box<Expr>),
}

/// sum := product (('+'|'-') product)*
/// product := unary (('*'|'/'|'%') unary)*
/// unary := '-' unary | primary
/// primary := INT | STRING | IDENT '(' args ')' | '(' sum ')'
struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn parse(source: &'s str) -> EvalResult<Expr> {
        let mut parser = Self {
            source,
            tokens: tokenize(source)?,
            pos: 0,
        };
        let expr = parser.sum()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(parser.error(format!("unexpected trailing {:?}", token))),
        }
    }

    fn error(&self, reason: String) -> InterpolationError {
        InterpolationError::Syntax {
            expr: self.source.to_string(),
            reason,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, wanted: &Token) -> EvalResult<()> {
        match self.advance() {
            Some(ref token) if token == wanted => Ok(()),
            other => Err(self.error(format!("expected {:?}, found {:?}", wanted, other))),
        }
    }

    fn sum(&mut self) -> EvalResult<Expr> {
        let mut left = self.product()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.advance();
            let right = self.product()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn product(&mut self) -> EvalResult<Expr> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> EvalResult<Expr> {
        if self.peek() == Some(&Token::Op('-')) {
            self.advance();
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> EvalResult<Expr> {
        match self.advance() {
            Some(Token::Int(i)) => Ok(Expr::Lit(Scalar::Int(i))),
            Some(Token::Str(s)) => Ok(Expr::Lit(Scalar::Text(s))),
            Some(Token::LParen) => {
                let inner = self.sum()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                self.expect(&Token::LParen)?;
                let mut args = Vec::new();
                if self.peek() == Some(&Token::RParen) {
                    self.advance();
                    return Ok(Expr::Call(name, args));
                }
                loop {
                    args.push(self.sum()?);
                    match self.advance() {
                        Some(Token::Comma) => continue,
                        Some(Token::RParen) => break,
                        other => {
                            return Err(self.error(format!(
                                "expected ',' or ')' in call to {}(), found {:?}",
                                name, other
                            )));
                        }
                    }
                }
                Ok(Expr::Call(name, args))
            }
            other => Err(self.error(format!("unexpected {:?}", other))),
        }
    }
}

// --- Evaluation ---

/// Evaluates markers against a read-only snapshot of the merged document.
#[derive(Debug, Clone)]
pub struct Interpolator<'a> {
    root: &'a Value,
    hostname: &'a str,
    // For direct cycle detection (a -> b -> a)
    stack: Vec<String>,
    // For runaway recursion protection (a -> b -> c -> ...)
    depth: u32,
}

impl<'a> Interpolator<'a> {
    pub fn new(root: &'a Value, hostname: &'a str) -> Self {
        Self {
            root,
            hostname,
            stack: Vec::new(),
            depth: 0,
        }
    }

    fn new_for_recursion(&self) -> Self {
        Self {
            root: self.root,
            hostname: self.hostname,
            stack: self.stack.clone(),
            depth: self.depth + 1,
        }
    }

    /// Expands every marker of `template`.
    ///
    /// A template made of exactly one marker keeps the type of the result, so
    /// `"[eval:var('port') + 1]"` becomes a JSON number.
    pub fn expand_string(&mut self, template: &str) -> EvalResult<Value> {
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(InterpolationError::MaxDepth(MAX_RECURSION_DEPTH));
        }

        let captures: Vec<_> = EVAL_RE.captures_iter(template).collect();
        if captures.is_empty() {
            return Ok(Value::String(template.to_string()));
        }

        if let [only] = captures.as_slice() {
            if let (Some(whole), Some(expr)) = (only.get(0), only.get(1)) {
                if whole.as_str() == template {
                    return Ok(self.evaluate_expression(expr.as_str())?.into_json());
                }
            }
        }

        let mut expanded = String::with_capacity(template.len());
        let mut last = 0;
        for caps in &captures {
            let (Some(whole), Some(expr)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            expanded.push_str(template.get(last..whole.start()).unwrap_or_default());
            expanded.push_str(&self.evaluate_expression(expr.as_str())?.as_text());
            last = whole.end();
        }
        expanded.push_str(template.get(last..).unwrap_or_default());
        Ok(Value::String(expanded))
    }

    /// Parses and evaluates a single expression (the content of a marker).
    pub fn evaluate_expression(&mut self, source: &str) -> EvalResult<Scalar> {
        let expr = Parser::parse(source.trim())?;
        self.eval(&expr)
    }

    fn eval(&mut self, expr: &Expr) -> EvalResult<Scalar> {
        match expr {
            Expr::Lit(s) => Ok(s.clone()),
            Expr::Neg(inner) => {
                let value = self.eval(inner)?;
                let i = value.as_int().ok_or_else(|| InterpolationError::NotANumber {
                    op: '-',
                    left: String::new(),
                    right: value.as_text(),
                })?;
                i.checked_neg()
                    .map(Scalar::Int)
                    .ok_or(InterpolationError::Arithmetic('-'))
            }
            Expr::Binary(op, left, right) => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                let (Some(a), Some(b)) = (l.as_int(), r.as_int()) else {
                    return Err(InterpolationError::NotANumber {
                        op: *op,
                        left: l.as_text(),
                        right: r.as_text(),
                    });
                };
                let result = match op {
                    '+' => a.checked_add(b),
                    '-' => a.checked_sub(b),
                    '*' => a.checked_mul(b),
                    '/' => a.checked_div(b),
                    _ => a.checked_rem(b),
                };
                result
                    .map(Scalar::Int)
                    .ok_or(InterpolationError::Arithmetic(*op))
            }
            Expr::Call(name, args) => self.call(name, args),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> EvalResult<Scalar> {
        let arity = |expected: &str| InterpolationError::Arity {
            function: name.to_string(),
            expected: expected.to_string(),
            got: args.len(),
        };

        match name {
            // `default()` evaluates lazily so an undefined first argument is not an error.
            "default" => {
                let [first, fallback] = args else {
                    return Err(arity("2"));
                };
                match self.eval(first) {
                    Ok(value) if !value.as_text().is_empty() => Ok(value),
                    Ok(_) | Err(InterpolationError::UndefinedVariable(_)) => self.eval(fallback),
                    Err(e) => Err(e),
                }
            }
            "var" => {
                if args.is_empty() {
                    return Err(arity("at least 1"));
                }
                let segments = self.eval_texts(args)?;
                self.lookup_var(&segments)
            }
            "env" => {
                let [arg] = args else {
                    return Err(arity("1"));
                };
                let var = self.eval(arg)?.as_text();
                std::env::var(&var)
                    .map(Scalar::Text)
                    .map_err(|_| InterpolationError::UnsetEnv(var))
            }
            "host" => {
                if !args.is_empty() {
                    return Err(arity("0"));
                }
                Ok(Scalar::Text(self.hostname.to_string()))
            }
            "join" => {
                if args.is_empty() {
                    return Err(arity("at least 1"));
                }
                let path: PathBuf = self.eval_texts(args)?.iter().collect();
                Ok(Scalar::Text(path.to_string_lossy().into_owned()))
            }
            "concat" => Ok(Scalar::Text(self.eval_texts(args)?.concat())),
            "uc" | "lc" => {
                let [arg] = args else {
                    return Err(arity("1"));
                };
                let text = self.eval(arg)?.as_text();
                Ok(Scalar::Text(if name == "uc" {
                    text.to_uppercase()
                } else {
                    text.to_lowercase()
                }))
            }
            other => Err(InterpolationError::UnknownFunction(other.to_string())),
        }
    }

    fn eval_texts(&mut self, args: &[Expr]) -> EvalResult<Vec<String>> {
        args.iter().map(|a| self.eval(a).map(|s| s.as_text())).collect()
    }

    /// Looks a path up in the snapshot, evaluating the target first when it holds markers.
    fn lookup_var(&mut self, segments: &[String]) -> EvalResult<Scalar> {
        let key = segments.join(".");
        if self.stack.contains(&key) {
            let mut cycle = self.stack.clone();
            cycle.push(key);
            return Err(InterpolationError::Circular(cycle.join(" -> ")));
        }

        let value = lookup(self.root, segments)
            .ok_or_else(|| InterpolationError::UndefinedVariable(key.clone()))?;

        match value {
            Value::String(s) if EVAL_RE.is_match(s) => {
                let mut sub = self.new_for_recursion();
                sub.stack.push(key.clone());
                match sub.expand_string(s)? {
                    Value::Number(n) => Ok(n
                        .as_i64()
                        .map(Scalar::Int)
                        .unwrap_or_else(|| Scalar::Text(n.to_string()))),
                    Value::String(s) => Ok(Scalar::Text(s)),
                    _ => Err(InterpolationError::NotScalar(key)),
                }
            }
            Value::String(s) => Ok(Scalar::Text(s.clone())),
            Value::Number(n) => Ok(n
                .as_i64()
                .map(Scalar::Int)
                .unwrap_or_else(|| Scalar::Text(n.to_string()))),
            Value::Bool(b) => Ok(Scalar::Text(b.to_string())),
            Value::Null => Ok(Scalar::Text(String::new())),
            Value::Array(_) | Value::Object(_) => Err(InterpolationError::NotScalar(key)),
        }
    }
}

/// Walks a path through maps (by key) and arrays (by index).
pub fn lookup<'v, S: AsRef<str>>(root: &'v Value, segments: &[S]) -> Option<&'v Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| match node {
            Value::Object(map) => map.get(segment.as_ref()),
            Value::Array(items) => segment
                .as_ref()
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i)),
            _ => None,
        })
}

/// A marker that could not be evaluated, with the dotted path of the value holding it.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationFailure {
    pub location: String,
    pub error: InterpolationError,
}

/// Evaluates every string leaf of `document`, depth-first, preserving the shape
/// of maps and arrays. Failed leaves are kept verbatim and reported.
pub fn evaluate_document(document: &Value, hostname: &str) -> (Value, Vec<EvaluationFailure>) {
    let mut failures = Vec::new();
    let mut location = Vec::new();
    let evaluated = walk(document, document, hostname, &mut location, &mut failures);
    (evaluated, failures)
}

fn walk(
    node: &Value,
    root: &Value,
    hostname: &str,
    location: &mut Vec<String>,
    failures: &mut Vec<EvaluationFailure>,
) -> Value {
    match node {
        Value::String(s) => match Interpolator::new(root, hostname).expand_string(s) {
            Ok(value) => value,
            Err(error) => {
                failures.push(EvaluationFailure {
                    location: location.join("."),
                    error,
                });
                node.clone()
            }
        },
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, child)| {
                    location.push(key.clone());
                    let value = walk(child, root, hostname, location, failures);
                    location.pop();
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, child)| {
                    location.push(i.to_string());
                    let value = walk(child, root, hostname, location, failures);
                    location.pop();
                    value
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(root: &Value, expr: &str) -> EvalResult<Scalar> {
        Interpolator::new(root, "WS1").evaluate_expression(expr)
    }

    #[test]
    fn test_arithmetic_precedence() {
        let root = json!({});
        assert_eq!(eval(&root, "1 + 2 * 3").unwrap(), Scalar::Int(7));
        assert_eq!(eval(&root, "(1 + 2) * 3").unwrap(), Scalar::Int(9));
        assert_eq!(eval(&root, "-4 + 10 % 4").unwrap(), Scalar::Int(-2));
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        let root = json!({});
        assert_eq!(
            eval(&root, "1 / 0").unwrap_err(),
            InterpolationError::Arithmetic('/')
        );
    }

    #[test]
    fn test_functions() {
        let root = json!({ "logs": { "rootDir": "/var/log/ttp" } });
        assert_eq!(
            eval(&root, "join(var('logs', 'rootDir'), 'daily')").unwrap(),
            Scalar::Text("/var/log/ttp/daily".to_string())
        );
        assert_eq!(
            eval(&root, "concat(lc(host()), '-', uc('db'))").unwrap(),
            Scalar::Text("ws1-DB".to_string())
        );
        assert_eq!(
            eval(&root, "default(var('missing'), 'fallback')").unwrap(),
            Scalar::Text("fallback".to_string())
        );
    }

    #[test]
    fn test_unknown_function_and_syntax_errors() {
        let root = json!({});
        assert_eq!(
            eval(&root, "system('rm -rf /')").unwrap_err(),
            InterpolationError::UnknownFunction("system".to_string())
        );
        assert!(matches!(
            eval(&root, "concat('a'"),
            Err(InterpolationError::Syntax { .. })
        ));
        assert!(matches!(
            eval(&root, "'unterminated"),
            Err(InterpolationError::Syntax { .. })
        ));
    }

    #[test]
    fn test_whole_marker_keeps_number_type() {
        let root = json!({ "base": 14000 });
        let mut interpolator = Interpolator::new(&root, "WS1");
        assert_eq!(
            interpolator.expand_string("[eval:var('base') + 394]").unwrap(),
            json!(14394)
        );
        assert_eq!(
            interpolator.expand_string("port [eval:var('base')]").unwrap(),
            json!("port 14000")
        );
    }

    #[test]
    fn test_var_targets_are_evaluated_first() {
        let root = json!({
            "a": "[eval:concat(var('b'), '/a')]",
            "b": "[eval:concat('/root', '/b')]"
        });
        let (evaluated, failures) = evaluate_document(&root, "WS1");
        assert!(failures.is_empty());
        assert_eq!(evaluated["a"], json!("/root/b/a"));
        assert_eq!(evaluated["b"], json!("/root/b"));
    }

    #[test]
    fn test_cycle_is_reported_and_left_verbatim() {
        let root = json!({
            "a": "[eval:var('b')]",
            "b": "[eval:var('a')]"
        });
        let (evaluated, failures) = evaluate_document(&root, "WS1");
        assert_eq!(failures.len(), 2);
        assert!(matches!(failures[0].error, InterpolationError::Circular(_)));
        assert_eq!(evaluated["a"], root["a"]);
    }

    #[test]
    fn test_evaluation_preserves_shape() {
        let root = json!({
            "list": ["[eval:1 + 1]", 3, true, null],
            "nested": { "deep": { "value": "[eval:host()]" } }
        });
        let (evaluated, failures) = evaluate_document(&root, "WS1");
        assert!(failures.is_empty());
        assert_eq!(
            evaluated,
            json!({
                "list": [2, 3, true, null],
                "nested": { "deep": { "value": "WS1" } }
            })
        );
    }

    #[test]
    fn test_evaluating_twice_is_idempotent() {
        let root = json!({
            "logs": { "rootDir": "[eval:join('/var', 'log', lc(host()))]" },
            "ports": ["[eval:14000 + 1]"]
        });
        let (once, _) = evaluate_document(&root, "WS1");
        let (twice, failures) = evaluate_document(&once, "WS1");
        assert!(failures.is_empty());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_array_index_in_path() {
        let root = json!({ "items": ["zero", "one"] });
        assert_eq!(
            eval(&root, "var('items', 1)").unwrap(),
            Scalar::Text("one".to_string())
        );
    }
}
