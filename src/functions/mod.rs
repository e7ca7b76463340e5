use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use crate::errors::Result;

/// Trait for pluggable functions callable from templates.
pub trait Function: Send + Sync {
    fn name(&self) -> &'static str;
    fn arity(&self) -> std::ops::RangeInclusive<usize>;
    fn call(&self, args: &[Value]) -> Result<Value>;
}

/// Thread-safe function registry.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<HashMap<&'static str, Arc<dyn Function>>>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    pub fn with_builtins() -> Self {
        let mut map: HashMap<&'static str, Arc<dyn Function>> = HashMap::new();
        map.insert("size", Arc::new(builtins::Size));
        map.insert("lower", Arc::new(builtins::Lower));
        map.insert("upper", Arc::new(builtins::Upper));
        map.insert("contains", Arc::new(builtins::Contains));
        map.insert("int", Arc::new(builtins::Int));
        map.insert("float", Arc::new(builtins::Float));
        map.insert("string", Arc::new(builtins::Str));
        Self { inner: Arc::new(map) }
    }

    pub fn register(&mut self, f: Arc<dyn Function>) {
        let mut_map = Arc::make_mut(&mut self.inner);
        mut_map.insert(f.name(), f);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.inner.get(name).cloned()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.inner.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("functions", &names).finish()
    }
}

pub mod builtins {
    use super::*;
    use crate::comparison::{deep_equal, type_name};
    use crate::errors::EvalError;
    use serde_json::Value;

    /// Missing arguments read as `null`, which every builtin rejects or renders.
    fn arg(args: &[Value], i: usize) -> &Value {
        args.get(i).unwrap_or(&Value::Null)
    }

    fn arg_error(name: &'static str, v: &Value) -> EvalError {
        EvalError::Function {
            name,
            message: format!("unsupported argument type {}", type_name(v)),
        }
    }

    /// Length of a string (in characters), sequence or map.
    pub struct Size;
    impl Function for Size {
        fn name(&self) -> &'static str { "size" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let len = match arg(args, 0) {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(m) => m.len(),
                other => return Err(arg_error(self.name(), other)),
            };
            Ok(Value::from(len))
        }
    }

    pub struct Lower;
    impl Function for Lower {
        fn name(&self) -> &'static str { "lower" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            match arg(args, 0) {
                Value::String(t) => Ok(Value::String(t.to_lowercase())),
                other => Err(arg_error(self.name(), other)),
            }
        }
    }

    pub struct Upper;
    impl Function for Upper {
        fn name(&self) -> &'static str { "upper" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            match arg(args, 0) {
                Value::String(t) => Ok(Value::String(t.to_uppercase())),
                other => Err(arg_error(self.name(), other)),
            }
        }
    }

    /// Substring test for strings, membership test for sequences and key
    /// test for maps.
    pub struct Contains;
    impl Function for Contains {
        fn name(&self) -> &'static str { "contains" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 2..=2 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let found = match (arg(args, 0), arg(args, 1)) {
                (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
                (Value::Array(a), needle) => a.iter().any(|v| deep_equal(v, needle)),
                (Value::Object(m), Value::String(key)) => m.contains_key(key),
                (other, _) => return Err(arg_error(self.name(), other)),
            };
            Ok(Value::Bool(found))
        }
    }

    pub struct Int;
    impl Function for Int {
        fn name(&self) -> &'static str { "int" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            match arg(args, 0) {
                Value::Number(n) if n.is_i64() => Ok(Value::Number(n.clone())),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                        Ok(Value::from(f.trunc() as i64))
                    }
                    _ => Err(EvalError::Overflow("int")),
                },
                Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|e| {
                    EvalError::Function { name: self.name(), message: format!("{s:?}: {e}") }
                }),
                Value::Bool(b) => Ok(Value::from(*b as i64)),
                other => Err(arg_error(self.name(), other)),
            }
        }
    }

    pub struct Float;
    impl Function for Float {
        fn name(&self) -> &'static str { "float" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let f = match arg(args, 0) {
                Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
                Value::String(s) => s.trim().parse::<f64>().map_err(|e| EvalError::Function {
                    name: self.name(),
                    message: format!("{s:?}: {e}"),
                })?,
                other => return Err(arg_error(self.name(), other)),
            };
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| EvalError::Function { name: self.name(), message: "not a finite number".into() })
        }
    }

    /// Strings pass through; everything else is rendered as JSON.
    pub struct Str;
    impl Function for Str {
        fn name(&self) -> &'static str { "string" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            match args.first() {
                Some(Value::String(s)) => Ok(Value::String(s.clone())),
                Some(other) => Ok(Value::String(other.to_string())),
                None => Err(arg_error(self.name(), &Value::Null)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn call(name: &str, args: &[Value]) -> Result<Value> {
        Registry::with_builtins().get(name).unwrap().call(args)
    }

    #[test]
    fn builtins() {
        assert_eq!(call("size", &[json!("héllo")]).unwrap(), json!(5));
        assert_eq!(call("size", &[json!([1, 2])]).unwrap(), json!(2));
        assert_eq!(call("lower", &[json!("ABC")]).unwrap(), json!("abc"));
        assert_eq!(call("contains", &[json!(["go", "test"]), json!("go")]).unwrap(), json!(true));
        assert_eq!(call("contains", &[json!("scenario"), json!("nar")]).unwrap(), json!(true));
        assert_eq!(call("int", &[json!(" 42 ")]).unwrap(), json!(42));
        assert_eq!(call("int", &[json!(2.9)]).unwrap(), json!(2));
        assert_eq!(call("float", &[json!("1.5")]).unwrap(), json!(1.5));
        assert_eq!(call("string", &[json!([1])]).unwrap(), json!("[1]"));
    }

    #[test]
    fn bad_arguments() {
        let err = call("size", &[json!(1)]).unwrap_err();
        assert_eq!(err.to_string(), "size(): unsupported argument type i64");
        assert!(call("int", &[json!("x")]).is_err());
    }

    #[test]
    fn short_argument_lists_are_errors() {
        use builtins::*;
        let funcs: [&dyn Function; 7] = [&Size, &Lower, &Upper, &Contains, &Int, &Float, &Str];
        for f in funcs {
            let err = f.call(&[]).unwrap_err();
            assert_eq!(err.to_string(), format!("{}(): unsupported argument type null", f.name()));
        }
        assert!(Contains.call(&[json!(["a"])]).is_ok_and(|v| v == json!(false)));
        assert!(Contains.call(&[json!("abc")]).is_err());
    }

    #[test]
    fn register_overrides_builtin() {
        struct Shout;
        impl Function for Shout {
            fn name(&self) -> &'static str { "upper" }
            fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
            fn call(&self, _args: &[Value]) -> Result<Value> { Ok(json!("!")) }
        }
        let mut reg = Registry::with_builtins();
        reg.register(Arc::new(Shout));
        assert_eq!(reg.get("upper").unwrap().call(&[json!("a")]).unwrap(), json!("!"));
        assert!(Registry::new().get("upper").is_none());
    }
}
