use serde_json::{Number, Value};

use crate::assertion::Assertion;
use crate::comparator::Comparator;

/// An expectation as handed to [`build`](crate::build).
///
/// Mirrors a decoded document, with two extra leaf kinds so comparators and
/// prebuilt assertions can sit anywhere inside a structural expectation.
#[derive(Debug, Clone)]
pub enum Expected {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Seq(Vec<Expected>),
    /// Entries in document order.
    Map(Vec<(String, Expected)>),
    Comparator(Comparator),
    Assertion(Assertion),
}

impl Expected {
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Expected>,
    {
        Expected::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn seq<V: Into<Expected>>(items: impl IntoIterator<Item = V>) -> Self {
        Expected::Seq(items.into_iter().map(Into::into).collect())
    }
}

impl From<Value> for Expected {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Expected::Null,
            Value::Bool(b) => Expected::Bool(b),
            Value::Number(n) => Expected::Number(n),
            Value::String(s) => Expected::String(s),
            Value::Array(items) => Expected::seq(items),
            Value::Object(map) => Expected::map(map),
        }
    }
}

impl From<&str> for Expected {
    fn from(s: &str) -> Self {
        Expected::String(s.to_string())
    }
}

impl From<String> for Expected {
    fn from(s: String) -> Self {
        Expected::String(s)
    }
}

impl From<bool> for Expected {
    fn from(b: bool) -> Self {
        Expected::Bool(b)
    }
}

impl From<i64> for Expected {
    fn from(n: i64) -> Self {
        Expected::Number(n.into())
    }
}

impl From<Comparator> for Expected {
    fn from(c: Comparator) -> Self {
        Expected::Comparator(c)
    }
}

impl From<Assertion> for Expected {
    fn from(a: Assertion) -> Self {
        Expected::Assertion(a)
    }
}
