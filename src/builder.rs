//! Turns expectations into [`Assertion`]s.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::assertion::{Assertion, Dollar, Env, Leaf, Node, StructuralAssertion, TemplateAssertion};
use crate::context::Context;
use crate::deferred::DOLLAR;
use crate::equality::{Equaler, EqualityResolver};
use crate::errors::BuildError;
use crate::expected::Expected;
use crate::expression::{is_template, Template};
use crate::functions::{Function, Registry};

/// A build option. Options apply to every assertion compiled by one
/// [`build`] call, nested ones included.
#[derive(Clone)]
pub enum BuildOpt {
    /// Variables visible as bare identifiers inside `{{ }}`.
    Vars(BTreeMap<String, String>),
    /// Custom equalers, consulted in order before deep equality.
    Equalers(Vec<Arc<dyn Equaler>>),
    /// An extra template function; replaces a builtin of the same name.
    Function(Arc<dyn Function>),
}

pub fn from_template<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> BuildOpt
where
    K: Into<String>,
    V: Into<String>,
{
    BuildOpt::Vars(
        vars.into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    )
}

pub fn with_equalers(equalers: impl IntoIterator<Item = Arc<dyn Equaler>>) -> BuildOpt {
    BuildOpt::Equalers(equalers.into_iter().collect())
}

pub fn with_equaler(equaler: impl Equaler + 'static) -> BuildOpt {
    BuildOpt::Equalers(vec![Arc::new(equaler)])
}

pub fn with_function(function: impl Function + 'static) -> BuildOpt {
    BuildOpt::Function(Arc::new(function))
}

/// Compiles `expected` into an assertion.
///
/// - `null` accepts anything.
/// - A string containing `{{` is a template. If it reads `$` it becomes a
///   predicate that must evaluate to a boolean; otherwise it is evaluated
///   now and its result is the expected value.
/// - A comparator is used as is.
/// - Anything else is a structural expectation checked leaf by leaf.
pub fn build(
    ctx: &Context,
    expected: impl Into<Expected>,
    opts: &[BuildOpt],
) -> Result<Assertion, BuildError> {
    let builder = Builder::new(ctx, opts)?;
    let assertion = builder.top(expected.into())?;
    tracing::debug!(kind = assertion.kind(), "assertion built");
    Ok(assertion)
}

/// Like [`build`] but panics on error. Only for expectations fixed in code.
pub fn must_build(ctx: &Context, expected: impl Into<Expected>, opts: &[BuildOpt]) -> Assertion {
    match build(ctx, expected, opts) {
        Ok(assertion) => assertion,
        Err(e) => panic!("failed to build assertion: {e}"),
    }
}

struct Builder<'a> {
    ctx: &'a Context,
    vars: Arc<BTreeMap<String, String>>,
    equality: Arc<EqualityResolver>,
    registry: Registry,
}

enum Compiled {
    Predicate(TemplateAssertion),
    Constant(serde_json::Value),
}

impl<'a> Builder<'a> {
    fn new(ctx: &'a Context, opts: &[BuildOpt]) -> Result<Self, BuildError> {
        let mut vars = BTreeMap::new();
        let mut equalers = Vec::new();
        let mut registry = Registry::with_builtins();
        for opt in opts {
            match opt {
                BuildOpt::Vars(more) => {
                    for (name, value) in more {
                        bind(&mut vars, name, value)?;
                    }
                }
                BuildOpt::Equalers(more) => equalers.extend(more.iter().cloned()),
                BuildOpt::Function(f) => registry.register(f.clone()),
            }
        }
        Ok(Self {
            ctx,
            vars: Arc::new(vars),
            equality: Arc::new(EqualityResolver::new(equalers)),
            registry,
        })
    }

    fn top(&self, expected: Expected) -> Result<Assertion, BuildError> {
        match expected {
            Expected::Null => Ok(Assertion::Nil),
            Expected::Comparator(c) => Ok(Assertion::Comparator(c)),
            Expected::Assertion(a) => Ok(a),
            Expected::String(s) if is_template(&s) => Ok(match self.template(&s)? {
                Compiled::Predicate(t) => Assertion::Template(t),
                Compiled::Constant(v) => self.structural(Node::literal(v)),
            }),
            other => Ok(self.structural(self.node(other)?)),
        }
    }

    fn structural(&self, root: Node) -> Assertion {
        Assertion::Structural(StructuralAssertion::new(root, self.equality.clone()))
    }

    fn node(&self, expected: Expected) -> Result<Node, BuildError> {
        Ok(match expected {
            Expected::Null => Node::Leaf(Leaf::Equal(serde_json::Value::Null)),
            Expected::Bool(b) => Node::Leaf(Leaf::Equal(b.into())),
            Expected::Number(n) => Node::Leaf(Leaf::Equal(n.into())),
            Expected::String(s) if is_template(&s) => match self.template(&s)? {
                Compiled::Predicate(t) => Node::Leaf(Leaf::Assert(Assertion::Template(t))),
                Compiled::Constant(v) => Node::literal(v),
            },
            Expected::String(s) => Node::Leaf(Leaf::Equal(s.into())),
            Expected::Seq(items) => Node::Seq(
                items
                    .into_iter()
                    .map(|item| self.node(item))
                    .collect::<Result<_, _>>()?,
            ),
            Expected::Map(entries) => Node::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| self.node(v).map(|n| (k, n)))
                    .collect::<Result<_, _>>()?,
            ),
            Expected::Comparator(c) => Node::Leaf(Leaf::Assert(Assertion::Comparator(c))),
            Expected::Assertion(a) => Node::Leaf(Leaf::Assert(a)),
        })
    }

    fn template(&self, source: &str) -> Result<Compiled, BuildError> {
        let template = Template::compile(source, &self.registry)?;
        if template.references_dollar() {
            return Ok(Compiled::Predicate(TemplateAssertion::new(
                template,
                self.vars.clone(),
                self.ctx.clone(),
            )));
        }
        let env = Env {
            vars: &self.vars,
            dollar: Dollar::Unbound,
        };
        let value = template.execute(&env).map_err(|source| BuildError::Eval {
            template: template.source().to_string(),
            source,
        })?;
        Ok(Compiled::Constant(value))
    }
}

fn bind(vars: &mut BTreeMap<String, String>, name: &str, value: &str) -> Result<(), BuildError> {
    if name == DOLLAR {
        return Err(BuildError::InvalidOption(format!(
            "variable name \"{DOLLAR}\" is reserved"
        )));
    }
    let is_identifier = name.chars().next().is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && name.chars().all(|c| c == '_' || c.is_ascii_alphanumeric());
    if !is_identifier || matches!(name, "true" | "false" | "null") {
        return Err(BuildError::InvalidOption(format!(
            "variable name {name:?} is not an identifier"
        )));
    }
    match vars.get(name) {
        Some(existing) if existing != value => Err(BuildError::InvalidOption(format!(
            "variable {name:?} is bound to both {existing:?} and {value:?}"
        ))),
        _ => {
            vars.insert(name.to_string(), value.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::greater;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn picks_variant() {
        let ctx = Context::background();
        assert_eq!(build(&ctx, json!(null), &[]).unwrap().kind(), "nil");
        assert_eq!(build(&ctx, greater(1), &[]).unwrap().kind(), "comparator");
        assert_eq!(build(&ctx, "{{ $ > 1 }}", &[]).unwrap().kind(), "template");
        assert_eq!(build(&ctx, json!({"a": 1}), &[]).unwrap().kind(), "structural");
        assert_eq!(build(&ctx, "plain", &[]).unwrap().kind(), "structural");
    }

    #[test]
    fn constant_templates_fold_into_literals() {
        let ctx = Context::background();
        let a = build(&ctx, "{{ aaa + '-' + upper(aaa) }}", &[from_template([("aaa", "foo")])]).unwrap();
        assert_eq!(a.kind(), "structural");
        assert!(a.assert(&json!("foo-FOO")).is_ok());
        assert!(a.assert(&json!("foo")).is_err());
    }

    #[test]
    fn nested_templates() {
        let ctx = Context::background();
        let a = build(
            &ctx,
            json!({"name": "{{ prefix + '-app' }}", "replicas": "{{ $ >= 2 }}"}),
            &[from_template([("prefix", "web")])],
        )
        .unwrap();
        assert!(a.assert(&json!({"name": "web-app", "replicas": 3})).is_ok());
        let err = a.assert(&json!({"name": "web-app", "replicas": 1})).unwrap_err();
        assert_eq!(err.path_errors()[0].to_string(), ".replicas: assertion error");
    }

    #[test]
    fn build_errors() {
        let ctx = Context::background();
        assert!(matches!(build(&ctx, "{{ $ == }}", &[]), Err(BuildError::Parse { .. })));
        assert!(matches!(build(&ctx, json!(["{{ nope() }}"]), &[]), Err(BuildError::UnknownFunction(_))));
        assert!(matches!(build(&ctx, "{{ undefined_var }}", &[]), Err(BuildError::Eval { .. })));
    }

    #[test]
    fn invalid_options() {
        let ctx = Context::background();
        for opts in [
            vec![from_template([("$", "x")])],
            vec![from_template([("1abc", "x")])],
            vec![from_template([("a", "x")]), from_template([("a", "y")])],
        ] {
            assert!(matches!(build(&ctx, json!(1), &opts), Err(BuildError::InvalidOption(_))));
        }
        // rebinding to the same value is harmless
        let opts = [from_template([("a", "x")]), from_template([("a", "x")])];
        assert!(build(&ctx, "{{ a }}", &opts).is_ok());
    }

    struct Double;
    impl Function for Double {
        fn name(&self) -> &'static str { "double" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[serde_json::Value]) -> crate::errors::Result<serde_json::Value> {
            match args.first().and_then(|v| v.as_i64()) {
                Some(n) => Ok(json!(n * 2)),
                None => Err(crate::errors::EvalError::Type("double() needs an integer".into())),
            }
        }
    }

    struct Shout;
    impl Function for Shout {
        fn name(&self) -> &'static str { "upper" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[serde_json::Value]) -> crate::errors::Result<serde_json::Value> {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or_default();
            Ok(json!(format!("{}!", s.to_uppercase())))
        }
    }

    #[test]
    fn custom_functions() {
        let ctx = Context::background();
        let a = build(&ctx, "{{ double($) == 4 }}", &[with_function(Double)]).unwrap();
        assert_eq!(a.kind(), "template");
        assert!(a.assert(&json!(2)).is_ok());
        assert_eq!(a.assert(&json!(3)).unwrap_err().to_string(), "assertion error");

        assert!(matches!(
            build(&ctx, "{{ double($) == 4 }}", &[]),
            Err(BuildError::UnknownFunction(name)) if name == "double"
        ));
    }

    #[test]
    fn custom_function_overrides_builtin() {
        let ctx = Context::background();
        let a = build(&ctx, r#"{{ upper($) == "HI!" }}"#, &[with_function(Shout)]).unwrap();
        assert!(a.assert(&json!("hi")).is_ok());
        let a = build(&ctx, r#"{{ upper($) == "HI!" }}"#, &[]).unwrap();
        assert!(a.assert(&json!("hi")).is_err());

        // also applies to templates folded at build time
        let a = build(&ctx, "{{ upper(aaa) }}", &[from_template([("aaa", "go")]), with_function(Shout)]).unwrap();
        assert!(a.assert(&json!("GO!")).is_ok());
    }

    #[test]
    #[should_panic(expected = "failed to build assertion")]
    fn must_build_panics() {
        must_build(&Context::background(), "{{ (", &[]);
    }
}
