//! Compiled assertions and their evaluation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::comparator::Comparator;
use crate::comparison::type_name;
use crate::context::Context;
use crate::deferred::{DeferredContext, DOLLAR};
use crate::equality::EqualityResolver;
use crate::errors::{AssertError, EvalError, MultiPathError, PathError, QueryError};
use crate::expression::Template;
use crate::query::{Extractor, Query, Segment};

/// A reusable predicate over structured values.
///
/// Assertions are immutable once built; `assert` may be called any number of
/// times, from any number of threads.
#[derive(Debug, Clone)]
pub enum Assertion {
    /// Accepts anything, including `null`.
    Nil,
    Structural(StructuralAssertion),
    Template(TemplateAssertion),
    Comparator(Comparator),
}

impl Assertion {
    pub fn kind(&self) -> &'static str {
        match self {
            Assertion::Nil => "nil",
            Assertion::Structural(_) => "structural",
            Assertion::Template(_) => "template",
            Assertion::Comparator(_) => "comparator",
        }
    }

    pub fn assert(&self, actual: &Value) -> Result<(), AssertError> {
        match self {
            Assertion::Nil => Ok(()),
            Assertion::Structural(s) => s.assert(actual),
            Assertion::Template(t) => t.assert(actual),
            Assertion::Comparator(c) => c.assert(actual),
        }
    }

    /// Asserts against a value that may not exist yet.
    ///
    /// Template assertions read `$` from the cell lazily, so they only block
    /// if the expression actually reaches `$`. The other variants wait for
    /// the value first.
    pub fn assert_deferred(&self, cell: &DeferredContext) -> Result<(), AssertError> {
        match self {
            Assertion::Nil => Ok(()),
            Assertion::Template(t) => t.evaluate(Dollar::Deferred(cell)),
            Assertion::Structural(_) | Assertion::Comparator(_) => {
                let actual = cell.wait()?;
                self.assert(&actual)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Leaf(Leaf),
    Seq(Vec<Node>),
    Map(Vec<(String, Node)>),
}

#[derive(Debug, Clone)]
pub(crate) enum Leaf {
    Equal(Value),
    Assert(Assertion),
}

impl Node {
    /// Turns an already-evaluated value into a tree of equality leaves.
    pub(crate) fn literal(value: Value) -> Node {
        match value {
            Value::Array(items) => Node::Seq(items.into_iter().map(Node::literal).collect()),
            Value::Object(map) => Node::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Node::literal(v)))
                    .collect(),
            ),
            scalar => Node::Leaf(Leaf::Equal(scalar)),
        }
    }

    fn leaves(&self) -> usize {
        match self {
            Node::Leaf(_) => 1,
            Node::Seq(items) => items.iter().map(Node::leaves).sum(),
            Node::Map(entries) => entries.iter().map(|(_, n)| n.leaves()).sum(),
        }
    }
}

/// A literal expected tree checked leaf by leaf.
#[derive(Debug, Clone)]
pub struct StructuralAssertion {
    root: Arc<Node>,
    equality: Arc<EqualityResolver>,
}

impl StructuralAssertion {
    pub(crate) fn new(root: Node, equality: Arc<EqualityResolver>) -> Self {
        Self {
            root: Arc::new(root),
            equality,
        }
    }

    /// Number of leaf positions in the expected tree.
    pub fn leaves(&self) -> usize {
        self.root.leaves()
    }

    /// Checks every leaf, never stopping at the first failure.
    pub fn assert(&self, actual: &Value) -> Result<(), AssertError> {
        let mut errs = Vec::new();
        self.walk(&self.root, &Query::root(), actual, &mut errs);
        tracing::trace!(leaves = self.leaves(), failures = errs.len(), "structural assertion evaluated");
        if errs.is_empty() {
            Ok(())
        } else {
            Err(AssertError::MultiPath(MultiPathError { errs }))
        }
    }

    fn walk(&self, node: &Node, q: &Query, actual: &Value, errs: &mut Vec<PathError>) {
        match node {
            Node::Seq(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.walk(item, &q.index(i), actual, errs);
                }
            }
            Node::Map(entries) => {
                for (key, item) in entries {
                    self.walk(item, &q.key(key.as_str()), actual, errs);
                }
            }
            Node::Leaf(leaf) => {
                if let Err(e) = self.check(leaf, q, actual) {
                    errs.push(PathError::new(q.to_string(), e));
                }
            }
        }
    }

    fn check(&self, leaf: &Leaf, q: &Query, actual: &Value) -> Result<(), AssertError> {
        let found = q.lookup(actual).map_err(AssertError::NotFound)?;
        match leaf {
            Leaf::Assert(assertion) => assertion.assert(found),
            Leaf::Equal(expected) => match self.equality.equal(expected, found) {
                Ok(true) => Ok(()),
                Ok(false) => Err(AssertError::NotEqual {
                    expected: expected.clone(),
                    actual: found.clone(),
                }),
                Err(message) => Err(AssertError::Equality {
                    expected: expected.clone(),
                    actual: found.clone(),
                    message,
                }),
            },
        }
    }
}

/// A boolean expression over `$` and the build-time variables.
#[derive(Debug, Clone)]
pub struct TemplateAssertion {
    template: Arc<Template>,
    vars: Arc<BTreeMap<String, String>>,
    ctx: Context,
}

impl TemplateAssertion {
    pub(crate) fn new(template: Template, vars: Arc<BTreeMap<String, String>>, ctx: Context) -> Self {
        Self {
            template: Arc::new(template),
            vars,
            ctx,
        }
    }

    pub fn source(&self) -> &str {
        self.template.source()
    }

    pub fn assert(&self, actual: &Value) -> Result<(), AssertError> {
        self.evaluate(Dollar::Value(actual))
    }

    fn evaluate(&self, dollar: Dollar<'_>) -> Result<(), AssertError> {
        self.ctx.check()?;
        let env = Env {
            vars: &self.vars,
            dollar,
        };
        let result = self.template.execute(&env).map_err(|e| match e {
            EvalError::Query(QueryError::Deferred(d)) => AssertError::Deferred(d),
            other => AssertError::Eval(other),
        })?;
        match result {
            Value::Bool(true) => Ok(()),
            Value::Bool(false) => Err(AssertError::Failed),
            other => Err(AssertError::NotBoolean(type_name(&other))),
        }
    }
}

/// What `$` is bound to during one evaluation.
#[derive(Clone, Copy)]
pub(crate) enum Dollar<'a> {
    Value(&'a Value),
    Deferred(&'a DeferredContext),
    /// Build-time evaluation of templates that never read `$`.
    Unbound,
}

/// Variable environment of a template evaluation.
pub(crate) struct Env<'a> {
    pub(crate) vars: &'a BTreeMap<String, String>,
    pub(crate) dollar: Dollar<'a>,
}

impl Extractor for Env<'_> {
    fn extract_key(&self, key: &str) -> Result<Value, QueryError> {
        if key == DOLLAR {
            return match self.dollar {
                Dollar::Value(v) => Ok(v.clone()),
                Dollar::Deferred(cell) => cell.extract_key(key),
                Dollar::Unbound => Err(not_found(key)),
            };
        }
        if let Some(v) = self.vars.get(key) {
            return Ok(Value::String(v.clone()));
        }
        match self.dollar {
            Dollar::Deferred(cell) => cell.extract_key(key),
            _ => Err(not_found(key)),
        }
    }
}

fn not_found(key: &str) -> QueryError {
    QueryError::NotFound {
        segment: Segment::Key(key.to_string()).to_string(),
    }
}
