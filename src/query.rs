//! Path queries such as `$.deps[0].tags[1]`.

use std::fmt;

use serde_json::Value;

use crate::errors::QueryError;
use crate::parser::{is_key_char, Parser};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String), // .foo or ['foo']
    Index(usize), // [0]
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) if !k.is_empty() && k.chars().all(is_key_char) => write!(f, ".{k}"),
            Segment::Key(k) => {
                let escaped = k.replace('\\', "\\\\").replace('\'', "\\'");
                write!(f, "['{escaped}']")
            }
            Segment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// An addressable position inside a structured value.
///
/// The empty query addresses the root and renders as `$`; any other query
/// renders as its segments, e.g. `.deps[0].name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    segments: Vec<Segment>,
}

impl Query {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, QueryError> {
        let mut p = Parser::new(input);
        let mut segments = Vec::new();
        p.skip_ws();
        if p.peek_char() == Some('$') {
            // `$` alone or `$.`/`$[` is the root alias; `$` as a key needs a dot
            let mut probe = Parser::at(input, p.offset() + 1);
            if probe.eof() || probe.consume_char('.') || probe.consume_char('[') {
                p.consume_char('$');
            }
        }
        while !p.eof() {
            if p.consume_char('.') {
                segments.push(Segment::Key(p.parse_key()?));
                continue;
            }
            if p.consume_char('[') {
                p.skip_ws();
                if matches!(p.peek_char(), Some('\'' | '"')) {
                    let key = p.parse_quoted_string()?;
                    p.skip_ws();
                    p.expect(']')?;
                    segments.push(Segment::Key(key));
                } else {
                    let idx = p.parse_index()?;
                    p.skip_ws();
                    p.expect(']')?;
                    segments.push(Segment::Index(idx));
                }
                continue;
            }
            return Err(p.error("expected '.' or '['").into());
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn key(&self, key: impl Into<String>) -> Self {
        self.push(Segment::Key(key.into()))
    }

    pub fn index(&self, index: usize) -> Self {
        self.push(Segment::Index(index))
    }

    fn push(&self, seg: Segment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(seg);
        Self { segments }
    }

    /// Resolves the query against a value without cloning it.
    pub fn lookup<'a>(&self, root: &'a Value) -> Result<&'a Value, QueryError> {
        self.segments
            .iter()
            .try_fold(root, |current, seg| step(current, seg))
    }

    /// Resolves the query against any extraction target. The first segment
    /// is handed to the target itself, so targets like
    /// [`DeferredContext`](crate::DeferredContext) can block or fail there.
    pub fn extract<E: Extractor + ?Sized>(&self, target: &E) -> Result<Value, QueryError> {
        let Some((first, rest)) = self.segments.split_first() else {
            return target.extract_root();
        };
        let head = match first {
            Segment::Key(k) => target.extract_key(k)?,
            Segment::Index(i) => target.extract_index(*i)?,
        };
        rest.iter()
            .try_fold(&head, |current, seg| step(current, seg))
            .cloned()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("$");
        }
        self.segments.iter().try_for_each(|seg| seg.fmt(f))
    }
}

impl std::str::FromStr for Query {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Vec<Segment>> for Query {
    fn from(segments: Vec<Segment>) -> Self {
        Self { segments }
    }
}

fn step<'a>(current: &'a Value, seg: &Segment) -> Result<&'a Value, QueryError> {
    let found = match (current, seg) {
        (Value::Object(map), Segment::Key(k)) => map.get(k),
        (Value::Array(arr), Segment::Index(i)) => arr.get(*i),
        _ => None,
    };
    found.ok_or_else(|| not_found(seg))
}

fn not_found(seg: &Segment) -> QueryError {
    QueryError::NotFound {
        segment: seg.to_string(),
    }
}

/// A target that path queries can read from.
pub trait Extractor {
    fn extract_key(&self, key: &str) -> Result<Value, QueryError>;

    fn extract_index(&self, index: usize) -> Result<Value, QueryError> {
        Err(not_found(&Segment::Index(index)))
    }

    /// The target as a whole, addressed by the bare `$` query. Variable
    /// environments have no single value and keep the default.
    fn extract_root(&self) -> Result<Value, QueryError> {
        Err(QueryError::NotFound {
            segment: "$".into(),
        })
    }
}

impl Extractor for Value {
    fn extract_key(&self, key: &str) -> Result<Value, QueryError> {
        step(self, &Segment::Key(key.to_string())).cloned()
    }

    fn extract_index(&self, index: usize) -> Result<Value, QueryError> {
        step(self, &Segment::Index(index)).cloned()
    }

    fn extract_root(&self) -> Result<Value, QueryError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "deps": [
                {"name": "scenarigo", "tags": ["go", "test"], "odd key": 1}
            ]
        })
    }

    #[test]
    fn parse_and_render() {
        for (input, rendered) in [
            ("$", "$"),
            ("", "$"),
            ("$.deps[0].tags[1]", ".deps[0].tags[1]"),
            (".deps[0].name", ".deps[0].name"),
            ("$['odd key']", "['odd key']"),
            ("$.$", ".$"),
            ("$['it\\'s']", "['it\\'s']"),
        ] {
            assert_eq!(Query::parse(input).unwrap().to_string(), rendered, "{input}");
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Query::parse("$.deps[").is_err());
        assert!(Query::parse("$.deps[-1]").is_err());
        assert!(Query::parse("deps").is_err());
    }

    #[test]
    fn lookup_walks_maps_and_sequences() {
        let v = sample();
        let q = Query::root().key("deps").index(0).key("tags").index(1);
        assert_eq!(q.lookup(&v).unwrap(), &json!("test"));
        assert_eq!(Query::root().lookup(&v).unwrap(), &v);
        let q: Query = "$['deps'][0]['odd key']".parse().unwrap();
        assert_eq!(q.lookup(&v).unwrap(), &json!(1));
    }

    #[test]
    fn lookup_reports_missing_segment() {
        let v = sample();
        let err = Query::parse("$.deps[3].name").unwrap().lookup(&v).unwrap_err();
        assert_eq!(err.to_string(), r#""[3]" not found"#);
        let err = Query::parse(".a").unwrap().lookup(&Value::Null).unwrap_err();
        assert_eq!(err.to_string(), r#"".a" not found"#);
    }

    #[test]
    fn extract_from_value() {
        let v = sample();
        let q = Query::parse("$.deps[0].name").unwrap();
        assert_eq!(q.extract(&v).unwrap(), json!("scenarigo"));
        // the bare root reads the whole value, like `lookup`
        assert_eq!(Query::root().extract(&v).unwrap(), v);
        assert_eq!(Query::parse("$").unwrap().extract(&v).unwrap(), v);
    }

    #[test]
    fn root_of_variable_environment_is_not_found() {
        struct Vars;
        impl Extractor for Vars {
            fn extract_key(&self, key: &str) -> Result<Value, QueryError> {
                Ok(json!(key))
            }
        }
        assert_eq!(Query::parse("$.x").unwrap().extract(&Vars).unwrap(), json!("x"));
        let err = Query::root().extract(&Vars).unwrap_err();
        assert_eq!(err.to_string(), r#""$" not found"#);
    }
}
