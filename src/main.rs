use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use scenario_assert::{build, from_template, AssertError, BuildOpt, Context};
use serde::Serialize;
use serde_json::Value;

/// Check an actual JSON value against an expectation.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Expected JSON document; strings may contain `{{ ... }}` templates
    expected: String,
    /// Actual JSON document
    actual: String,
    /// Template variable as NAME=VALUE (repeatable)
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,
    /// Deadline in milliseconds for `{{ $ ... }}` predicates; once it
    /// passes they fail with "context deadline exceeded". Literal and
    /// comparator checks ignore it.
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Print failures as a JSON array
    #[arg(long)]
    json: bool,
    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE but got {s:?}"))
}

#[derive(Serialize)]
struct Failure {
    path: Option<String>,
    message: String,
}

fn failures(err: &AssertError) -> Vec<Failure> {
    let paths = err.path_errors();
    if paths.is_empty() {
        return vec![Failure {
            path: None,
            message: err.to_string(),
        }];
    }
    paths
        .iter()
        .map(|e| Failure {
            path: Some(e.path.clone()),
            message: e.source.to_string(),
        })
        .collect()
}

fn context(timeout_ms: Option<u64>) -> Context {
    match timeout_ms {
        Some(ms) => Context::background().with_timeout(Duration::from_millis(ms)),
        None => Context::background(),
    }
}

fn main() -> ExitCode {
    // Parse CLI arguments.
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    // Parse input JSON.
    let parse = |what: &str, s: &str| {
        serde_json::from_str::<Value>(s).map_err(|e| eprintln!("Invalid {what} JSON: {e}"))
    };
    let (Ok(expected), Ok(actual)) = (parse("expected", &args.expected), parse("actual", &args.actual))
    else {
        return ExitCode::from(2);
    };

    let ctx = context(args.timeout_ms);
    let opts: Vec<BuildOpt> = if args.vars.is_empty() {
        Vec::new()
    } else {
        vec![from_template(args.vars.iter().cloned())]
    };

    let assertion = match build(&ctx, expected, &opts) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };
    tracing::debug!(kind = assertion.kind(), "asserting");

    let Err(err) = assertion.assert(&actual) else {
        println!("ok");
        return ExitCode::SUCCESS;
    };
    let failures = failures(&err);
    if args.json {
        match serde_json::to_string_pretty(&failures) {
            Ok(out) => println!("{out}"),
            Err(e) => eprintln!("{e}"),
        }
    } else {
        for f in &failures {
            match &f.path {
                Some(path) => println!("{path}: {}", f.message),
                None => println!("{}", f.message),
            }
        }
    }
    ExitCode::from(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn timeout_only_bounds_template_predicates() {
        let ctx = context(Some(0));
        let predicate = build(&ctx, "{{ $ == 1 }}", &[]).unwrap();
        let err = predicate.assert(&json!(1)).unwrap_err();
        assert_eq!(err.to_string(), "context deadline exceeded");

        let literal = build(&ctx, json!({"a": 1}), &[]).unwrap();
        assert!(literal.assert(&json!({"a": 1})).is_ok());
        assert!(build(&context(None), "{{ $ == 1 }}", &[]).unwrap().assert(&json!(1)).is_ok());
    }

    #[test]
    fn failures_are_listed_per_path() {
        let a = build(&context(None), json!({"a": 1, "b": [true]}), &[]).unwrap();
        let err = a.assert(&json!({"a": 2})).unwrap_err();
        let out: Vec<_> = failures(&err).into_iter().map(|f| (f.path, f.message)).collect();
        assert_eq!(
            out,
            vec![
                (Some(".a".to_string()), "expected 1 but got 2".to_string()),
                (Some(".b[0]".to_string()), "\".b\" not found".to_string()),
            ]
        );
    }

    #[test]
    fn parses_vars() {
        assert_eq!(parse_var("a=b=c"), Ok(("a".to_string(), "b=c".to_string())));
        assert!(parse_var("novalue").is_err());
    }
}
