// src/expression.rs
//! `{{ ... }}` templates and the expression language inside them.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::comparison::{compare, deep_equal, type_name};
use crate::deferred::DOLLAR;
use crate::errors::{BuildError, EvalError, ParseError, Result};
use crate::functions::{Function, Registry};
use crate::parser::Parser;
use crate::query::{Extractor, Query, Segment};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

pub fn is_template(s: &str) -> bool {
    s.contains(OPEN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Clone)]
pub enum Expr {
    Literal(Value),
    /// `$`, `name` or either followed by `.key`/`[n]`; the first segment is
    /// the variable name.
    Variable(Query),
    /// Member access on a computed value, e.g. `(expr).key`.
    Access(Box<Expr>, Query),
    Call {
        func: Arc<dyn Function>,
        args: Vec<Expr>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "Literal({v})"),
            Expr::Variable(q) => write!(f, "Variable({q:?})"),
            Expr::Access(e, q) => write!(f, "Access({e:?}, {q:?})"),
            Expr::Call { func, args } => write!(f, "Call({}, {args:?})", func.name()),
            Expr::Unary(op, e) => write!(f, "Unary({op:?}, {e:?})"),
            Expr::Binary(op, l, r) => write!(f, "Binary({op:?}, {l:?}, {r:?})"),
        }
    }
}

impl Expr {
    /// Whether evaluating this expression may read `$`.
    pub fn references_dollar(&self) -> bool {
        match self {
            Expr::Literal(_) => false,
            Expr::Variable(q) => {
                matches!(q.segments().first(), Some(Segment::Key(k)) if k == DOLLAR)
            }
            Expr::Access(e, _) | Expr::Unary(_, e) => e.references_dollar(),
            Expr::Call { args, .. } => args.iter().any(Expr::references_dollar),
            Expr::Binary(_, l, r) => l.references_dollar() || r.references_dollar(),
        }
    }

    pub fn eval(&self, env: &dyn Extractor) -> Result<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Variable(q) => Ok(q.extract(env)?),
            Expr::Access(e, q) => {
                let v = e.eval(env)?;
                Ok(q.lookup(&v)?.clone())
            }
            Expr::Call { func, args } => {
                let args = args
                    .iter()
                    .map(|a| a.eval(env))
                    .collect::<Result<Vec<_>>>()?;
                func.call(&args)
            }
            Expr::Unary(op, e) => unary(*op, e.eval(env)?),
            Expr::Binary(BinaryOp::And, l, r) => {
                Ok(Value::Bool(as_bool("&&", l.eval(env)?)? && as_bool("&&", r.eval(env)?)?))
            }
            Expr::Binary(BinaryOp::Or, l, r) => {
                Ok(Value::Bool(as_bool("||", l.eval(env)?)? || as_bool("||", r.eval(env)?)?))
            }
            Expr::Binary(op, l, r) => binary(*op, l.eval(env)?, r.eval(env)?),
        }
    }
}

fn as_bool(op: &str, v: Value) -> Result<bool> {
    match v {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::Type(format!(
            "`{op}` requires bool operands but got {}",
            type_name(&other)
        ))),
    }
}

fn unary(op: UnaryOp, v: Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!as_bool("!", v)?)),
        UnaryOp::Neg => match &v {
            Value::Number(n) => match n.as_i64() {
                Some(i) => i.checked_neg().map(Value::from).ok_or(EvalError::Overflow("-")),
                None => Ok(float(-n.as_f64().unwrap_or(f64::NAN))),
            },
            other => Err(EvalError::Type(format!("cannot negate {}", type_name(other)))),
        },
    }
}

fn float(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    let ordering = |holds: fn(std::cmp::Ordering) -> bool| match compare(&l, &r) {
        Some(ord) => Ok(Value::Bool(holds(ord))),
        None => Err(mismatch(op, &l, &r)),
    };
    match op {
        BinaryOp::Eq => Ok(Value::Bool(deep_equal(&l, &r))),
        BinaryOp::Ne => Ok(Value::Bool(!deep_equal(&l, &r))),
        BinaryOp::Lt => ordering(|o| o.is_lt()),
        BinaryOp::Lte => ordering(|o| o.is_le()),
        BinaryOp::Gt => ordering(|o| o.is_gt()),
        BinaryOp::Gte => ordering(|o| o.is_ge()),
        BinaryOp::Add => match (&l, &r) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => arithmetic(op, &l, &r),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, &l, &r),
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit in eval"),
    }
}

fn mismatch(op: BinaryOp, l: &Value, r: &Value) -> EvalError {
    EvalError::Type(format!(
        "cannot apply `{}` to {} and {}",
        op.as_str(),
        type_name(l),
        type_name(r)
    ))
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    let (Value::Number(a), Value::Number(b)) = (l, r) else {
        return Err(mismatch(op, l, r));
    };
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let out = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Div | BinaryOp::Rem if y == 0 => return Err(EvalError::DivisionByZero),
            BinaryOp::Div => x.checked_div(y),
            BinaryOp::Rem => x.checked_rem(y),
            _ => return Err(mismatch(op, l, r)),
        };
        return out.map(Value::from).ok_or(EvalError::Overflow(op.as_str()));
    }
    let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
    let out = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::Rem if y == 0.0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Div => x / y,
        BinaryOp::Rem => x % y,
        _ => return Err(mismatch(op, l, r)),
    };
    Ok(float(out))
}

#[derive(Debug, Clone)]
enum Part {
    Text(String),
    Expr(Expr),
}

/// A compiled template string.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    pub fn compile(source: &str, registry: &Registry) -> std::result::Result<Self, BuildError> {
        let parse_err = |err: ParseError| BuildError::Parse {
            template: source.to_string(),
            source: err,
        };
        let mut parts = Vec::new();
        let mut rest = 0;
        while let Some(found) = source[rest..].find(OPEN) {
            let start = rest + found;
            if start > rest {
                parts.push(Part::Text(source[rest..start].to_string()));
            }
            let mut p = Parser::at(source, start + OPEN.len());
            let expr = ExprParser { p: &mut p, registry }
                .parse_expr()
                .map_err(|e| match e {
                    BuildError::Parse { source: err, .. } => parse_err(err),
                    other => other,
                })?;
            p.skip_ws();
            p.expect_str(CLOSE).map_err(parse_err)?;
            parts.push(Part::Expr(expr));
            rest = p.offset();
        }
        if !parts.iter().any(|p| matches!(p, Part::Expr(_))) {
            return Err(parse_err(ParseError::InvalidSyntax {
                message: "no template section".into(),
                offset: 0,
            }));
        }
        if rest < source.len() {
            parts.push(Part::Text(source[rest..].to_string()));
        }
        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn references_dollar(&self) -> bool {
        self.parts.iter().any(|p| match p {
            Part::Expr(e) => e.references_dollar(),
            Part::Text(_) => false,
        })
    }

    /// A template that is a single `{{ }}` section yields the typed value of
    /// its expression; otherwise the sections are rendered into a string.
    pub fn execute(&self, env: &dyn Extractor) -> Result<Value> {
        if let [Part::Expr(e)] = self.parts.as_slice() {
            return e.eval(env);
        }
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(t) => out.push_str(t),
                Part::Expr(e) => match e.eval(env)? {
                    Value::String(s) => out.push_str(&s),
                    other => out.push_str(&other.to_string()),
                },
            }
        }
        Ok(Value::String(out))
    }
}

struct ExprParser<'p, 's> {
    p: &'p mut Parser<'s>,
    registry: &'p Registry,
}

type PResult<T> = std::result::Result<T, BuildError>;

impl ExprParser<'_, '_> {
    fn fail(&self, message: &str) -> BuildError {
        BuildError::Parse {
            template: String::new(),
            source: self.p.error(message),
        }
    }

    fn lift<T>(&self, r: std::result::Result<T, ParseError>) -> PResult<T> {
        r.map_err(|source| BuildError::Parse {
            template: String::new(),
            source,
        })
    }

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        loop {
            self.p.skip_ws();
            if self.p.consume_str("||") {
                let right = self.parse_and()?;
                left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_equality()?;
        loop {
            self.p.skip_ws();
            if self.p.consume_str("&&") {
                let right = self.parse_equality()?;
                left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut left = self.parse_compare()?;
        loop {
            self.p.skip_ws();
            let op = if self.p.consume_str("==") {
                BinaryOp::Eq
            } else if self.p.consume_str("!=") {
                BinaryOp::Ne
            } else {
                break;
            };
            let right = self.parse_compare()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_compare(&mut self) -> PResult<Expr> {
        let left = self.parse_additive()?;
        self.p.skip_ws();
        let op = if self.p.consume_str("<=") {
            BinaryOp::Lte
        } else if self.p.consume_str(">=") {
            BinaryOp::Gte
        } else if self.p.consume_char('<') {
            BinaryOp::Lt
        } else if self.p.consume_char('>') {
            BinaryOp::Gt
        } else {
            return Ok(left);
        };
        let right = self.parse_additive()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.p.skip_ws();
            let op = if self.p.consume_char('+') {
                BinaryOp::Add
            } else if self.p.consume_char('-') {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            self.p.skip_ws();
            let op = if self.p.consume_char('*') {
                BinaryOp::Mul
            } else if self.p.consume_char('/') {
                BinaryOp::Div
            } else if self.p.consume_char('%') {
                BinaryOp::Rem
            } else {
                break;
            };
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        self.p.skip_ws();
        // `!=` never starts an operand, so a leading `!` is always negation
        if self.p.consume_char('!') {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        if self.p.consume_char('-') {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let primary = self.parse_primary()?;
        let path = self.parse_path()?;
        Ok(match primary {
            Expr::Variable(root) => {
                let mut segments = root.segments().to_vec();
                segments.extend(path.segments().iter().cloned());
                Expr::Variable(Query::from(segments))
            }
            other if path.is_root() => other,
            other => Expr::Access(Box::new(other), path),
        })
    }

    fn parse_path(&mut self) -> PResult<Query> {
        let mut segments = Vec::new();
        loop {
            if self.p.peek_str(".") && !self.p.peek_str("..") {
                self.p.consume_char('.');
                let key = if self.p.consume_char('$') {
                    DOLLAR.to_string()
                } else {
                    let r = self.p.parse_identifier();
                    self.lift(r)?
                };
                segments.push(Segment::Key(key));
            } else if self.p.consume_char('[') {
                self.p.skip_ws();
                let seg = if matches!(self.p.peek_char(), Some('\'' | '"')) {
                    let r = self.p.parse_quoted_string();
                    Segment::Key(self.lift(r)?)
                } else {
                    let r = self.p.parse_index();
                    Segment::Index(self.lift(r)?)
                };
                self.p.skip_ws();
                let r = self.p.expect(']');
                self.lift(r)?;
                segments.push(seg);
            } else {
                break;
            }
        }
        Ok(Query::from(segments))
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        self.p.skip_ws();
        match self.p.peek_char() {
            Some('(') => {
                self.p.consume_char('(');
                let inner = self.parse_expr()?;
                self.p.skip_ws();
                let r = self.p.expect(')');
                self.lift(r)?;
                Ok(inner)
            }
            Some('"' | '\'') => {
                let r = self.p.parse_quoted_string();
                Ok(Expr::Literal(Value::String(self.lift(r)?)))
            }
            Some(c) if c.is_ascii_digit() => {
                let r = self.p.parse_number_literal();
                Ok(Expr::Literal(self.lift(r)?))
            }
            Some('$') => {
                self.p.consume_char('$');
                Ok(Expr::Variable(Query::root().key(DOLLAR)))
            }
            Some(c) if c == '_' || c.is_ascii_alphabetic() => {
                let r = self.p.parse_identifier();
                let name = self.lift(r)?;
                match name.as_str() {
                    "true" => return Ok(Expr::Literal(Value::Bool(true))),
                    "false" => return Ok(Expr::Literal(Value::Bool(false))),
                    "null" => return Ok(Expr::Literal(Value::Null)),
                    _ => {}
                }
                self.p.skip_ws();
                if self.p.consume_char('(') {
                    let args = self.parse_args()?;
                    return self.call(name, args);
                }
                Ok(Expr::Variable(Query::root().key(name)))
            }
            _ => Err(self.fail("expected operand")),
        }
    }

    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        let mut out = Vec::new();
        self.p.skip_ws();
        if self.p.consume_char(')') {
            return Ok(out);
        }
        loop {
            out.push(self.parse_expr()?);
            self.p.skip_ws();
            if self.p.consume_char(',') {
                continue;
            }
            let r = self.p.expect(')');
            self.lift(r)?;
            return Ok(out);
        }
    }

    fn call(&self, name: String, args: Vec<Expr>) -> PResult<Expr> {
        let func = self
            .registry
            .get(&name)
            .ok_or_else(|| BuildError::UnknownFunction(name.clone()))?;
        let arity = func.arity();
        if !arity.contains(&args.len()) {
            let expected = if arity.start() == arity.end() {
                arity.start().to_string()
            } else {
                format!("{}..={}", arity.start(), arity.end())
            };
            return Err(BuildError::Arity {
                name,
                expected,
                got: args.len(),
            });
        }
        Ok(Expr::Call { func, args })
    }
}
