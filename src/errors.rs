use itertools::Itertools;
use serde_json::Value;
use thiserror::Error;

use crate::comparator::Op;

/// Syntax errors from the shared character-level parser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{message} at offset {offset}")]
    InvalidSyntax { message: String, offset: usize },
}

/// Failures of the path query adapter.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    Parse(#[from] ParseError),

    #[error("\"{segment}\" not found")]
    NotFound { segment: String },

    #[error(transparent)]
    Deferred(#[from] DeferredError),
}

/// Runtime errors of template expressions.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("invalid operation: {0}")]
    Type(String),

    #[error("integer overflow in `{0}`")]
    Overflow(&'static str),

    #[error("division by zero")]
    DivisionByZero,

    #[error("{name}(): {message}")]
    Function { name: &'static str, message: String },
}

/// Why a governing [`Context`](crate::Context) stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeferredError {
    #[error("deferred value is already set")]
    AlreadySet,

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Errors raised while building an assertion; fatal to that build.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("failed to parse template {template:?}: {source}")]
    Parse {
        template: String,
        #[source]
        source: ParseError,
    },

    #[error("unknown function \"{0}\"")]
    UnknownFunction(String),

    #[error("function \"{name}\" expects {expected} arguments but got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("failed to evaluate template {template:?}: {source}")]
    Eval {
        template: String,
        #[source]
        source: EvalError,
    },

    #[error("invalid option: {0}")]
    InvalidOption(String),
}

/// The outcome of a failed `assert` call.
#[derive(Debug, Clone, Error)]
pub enum AssertError {
    #[error("assertion error")]
    Failed,

    #[error("assertion result must be a boolean value but got {0}")]
    NotBoolean(&'static str),

    #[error("expected {expected} but got {actual}")]
    NotEqual { expected: Value, actual: Value },

    #[error("failed to compare {expected} with {actual}: {message}")]
    Equality {
        expected: Value,
        actual: Value,
        message: String,
    },

    #[error("expected a value {op} {operand} but got {actual}")]
    Comparison { op: Op, operand: Value, actual: Value },

    #[error("cannot compare {actual_type} with {operand_type}")]
    Incomparable {
        actual_type: &'static str,
        operand_type: &'static str,
    },

    #[error(transparent)]
    NotFound(QueryError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Deferred(#[from] DeferredError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Path(Box<PathError>),

    #[error(transparent)]
    MultiPath(MultiPathError),
}

impl AssertError {
    /// Flattens the error into its path-tagged parts, if it has any.
    pub fn path_errors(&self) -> &[PathError] {
        match self {
            AssertError::MultiPath(m) => &m.errs,
            AssertError::Path(p) => std::slice::from_ref(p.as_ref()),
            _ => &[],
        }
    }
}

/// A single failing position inside a structural expectation.
#[derive(Debug, Clone, Error)]
#[error("{path}: {source}")]
pub struct PathError {
    pub path: String,
    #[source]
    pub source: Box<AssertError>,
}

impl PathError {
    pub fn new(path: impl Into<String>, source: AssertError) -> Self {
        Self {
            path: path.into(),
            source: Box::new(source),
        }
    }
}

/// Every failing leaf of one structural assertion, in depth-first order of
/// the expected tree.
#[derive(Debug, Clone, Error)]
#[error("{}", render_errors(.errs))]
pub struct MultiPathError {
    pub errs: Vec<PathError>,
}

fn render_errors(errs: &[PathError]) -> String {
    format!(
        "{} errors occurred:\n{}",
        errs.len(),
        errs.iter().map(|e| format!("  {e}")).join("\n")
    )
}

impl MultiPathError {
    pub fn errors(&self) -> &[PathError] {
        &self.errs
    }

    pub fn len(&self) -> usize {
        self.errs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errs.is_empty()
    }
}

impl<'a> IntoIterator for &'a MultiPathError {
    type Item = &'a PathError;
    type IntoIter = std::slice::Iter<'a, PathError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errs.iter()
    }
}

pub type Result<T, E = EvalError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn path_error_contains_path() {
        let err = PathError::new(
            ".deps[0].name",
            AssertError::NotEqual {
                expected: json!("scenarigo"),
                actual: json!("rails"),
            },
        );
        assert_eq!(
            err.to_string(),
            r#".deps[0].name: expected "scenarigo" but got "rails""#
        );
    }

    #[test]
    fn multi_path_error_lists_each_failure() {
        let err = MultiPathError {
            errs: vec![
                PathError::new(".a", AssertError::Failed),
                PathError::new(".b[1]", AssertError::Failed),
            ],
        };
        assert_eq!(
            err.to_string(),
            "2 errors occurred:\n  .a: assertion error\n  .b[1]: assertion error"
        );
        assert_eq!(AssertError::MultiPath(err).path_errors().len(), 2);
    }
}
