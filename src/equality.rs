use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::comparison::deep_equal;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EqualError {
    /// The equaler has no opinion on this pair; the next one is consulted.
    #[error("not applicable")]
    NotApplicable,

    #[error("{0}")]
    Failed(String),
}

/// A custom equality rule consulted before the default deep equality.
///
/// Implementations must be free of side effects; one equaler is shared by
/// every flow that evaluates the assertion.
pub trait Equaler: Send + Sync {
    fn equal(&self, expected: &Value, actual: &Value) -> Result<bool, EqualError>;
}

/// Adapts a closure into an [`Equaler`].
pub struct EqualerFn<F>(pub F);

impl<F> Equaler for EqualerFn<F>
where
    F: Fn(&Value, &Value) -> Result<bool, EqualError> + Send + Sync,
{
    fn equal(&self, expected: &Value, actual: &Value) -> Result<bool, EqualError> {
        (self.0)(expected, actual)
    }
}

/// Ordered list of equalers with a deep-equality fallback. The first
/// equaler that does not answer [`EqualError::NotApplicable`] decides.
#[derive(Clone, Default)]
pub struct EqualityResolver {
    equalers: Vec<Arc<dyn Equaler>>,
}

impl EqualityResolver {
    pub fn new(equalers: Vec<Arc<dyn Equaler>>) -> Self {
        Self { equalers }
    }

    pub fn equal(&self, expected: &Value, actual: &Value) -> Result<bool, String> {
        for equaler in &self.equalers {
            match equaler.equal(expected, actual) {
                Err(EqualError::NotApplicable) => continue,
                Err(EqualError::Failed(message)) => return Err(message),
                Ok(eq) => return Ok(eq),
            }
        }
        Ok(deep_equal(expected, actual))
    }
}

impl fmt::Debug for EqualityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EqualityResolver")
            .field("equalers", &self.equalers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn case_insensitive() -> Arc<dyn Equaler> {
        Arc::new(EqualerFn(|a: &Value, b: &Value| match (a, b) {
            (Value::String(x), Value::String(y)) => Ok(x.eq_ignore_ascii_case(y)),
            _ => Err(EqualError::NotApplicable),
        }))
    }

    #[test]
    fn falls_back_to_deep_equality() {
        let r = EqualityResolver::default();
        assert_eq!(r.equal(&json!(1), &json!(1.0)), Ok(true));
        assert_eq!(r.equal(&json!("a"), &json!("A")), Ok(false));
    }

    #[test]
    fn first_applicable_equaler_wins() {
        let never: Arc<dyn Equaler> = Arc::new(EqualerFn(|_: &Value, _: &Value| Ok::<_, EqualError>(false)));
        let r = EqualityResolver::new(vec![case_insensitive(), never]);
        assert_eq!(r.equal(&json!("a"), &json!("A")), Ok(true));
        // not applicable to numbers, so the second one decides
        assert_eq!(r.equal(&json!(1), &json!(1)), Ok(false));
    }

    #[test]
    fn equaler_errors_propagate() {
        let broken: Arc<dyn Equaler> = Arc::new(EqualerFn(|_: &Value, _: &Value| {
            Err::<bool, _>(EqualError::Failed("boom".into()))
        }));
        let r = EqualityResolver::new(vec![broken, case_insensitive()]);
        assert_eq!(r.equal(&json!("a"), &json!("a")), Err("boom".to_string()));
    }
}
