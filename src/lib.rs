//! Assertion engine for scenario tests.
//!
//! An expectation (a literal document, a `{{ ... }}` template or a
//! comparator) is compiled once with [`build`] into an [`Assertion`], which
//! then checks actual values and reports every failing path.
//!
//! ```
//! use scenario_assert::{build, greater, Context, Expected};
//! use serde_json::json;
//!
//! let ctx = Context::background();
//! let expected = Expected::map([
//!     ("name", Expected::from("scenarigo")),
//!     ("stars", greater(100).into()),
//! ]);
//! let assertion = build(&ctx, expected, &[]).unwrap();
//! assert!(assertion.assert(&json!({"name": "scenarigo", "stars": 500})).is_ok());
//! ```
pub mod errors;
pub mod context;
pub mod deferred;
pub mod functions;  // plugin model for template functions
pub mod query;
mod assertion;
mod builder;
mod comparator;
mod comparison;
mod equality;
mod expected;
mod expression;
mod parser;

pub use assertion::{Assertion, StructuralAssertion, TemplateAssertion};
pub use builder::{
    build, from_template, must_build, with_equaler, with_equalers, with_function, BuildOpt,
};
pub use comparator::{greater, greater_or_equal, less, less_or_equal, Comparator, Op};
pub use comparison::{deep_equal, type_name};
pub use context::Context;
pub use deferred::DeferredContext;
pub use equality::{EqualError, Equaler, EqualerFn, EqualityResolver};
pub use errors::{
    AssertError, BuildError, ContextError, DeferredError, EvalError, MultiPathError, PathError,
    QueryError,
};
pub use expected::Expected;
pub use expression::{is_template, Template};
pub use functions::{Function, Registry};
pub use query::{Extractor, Query, Segment};
