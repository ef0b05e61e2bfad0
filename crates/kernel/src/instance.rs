//! Loaded kernels.

use std::collections::BTreeMap;

use duet_core::Diagnostic;
use duet_core::error::ReloadError;
use thiserror::Error;
use tracing::debug;

use crate::interpreter::{self, Limits, RuntimeError};
use crate::parser;
use crate::value::Value;

/// What a load must satisfy besides running cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub limits: Limits,

    /// Names the host requires the kernel to bind at top level
    pub entry_points: Vec<String>,
}

/// The top-level names a kernel defined, functions and plain values alike.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    names: BTreeMap<String, Value>,
}

impl Bindings {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.names.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Bound names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    /// Names bound to callables.
    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.names
            .iter()
            .filter(|(_, v)| v.is_callable())
            .map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Result of calling into a kernel.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub value: Value,

    /// Lines written by `print` during the call
    pub output: Vec<String>,
}

/// Errors from [`KernelInstance::eval`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("syntax error at {0}")]
    Syntax(Diagnostic),

    #[error("{0}")]
    Runtime(#[from] RuntimeError),
}

/// An executable kernel: the bindings its top level produced plus the
/// limits every call into it runs under. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct KernelInstance {
    bindings: Bindings,
    limits: Limits,
    load_output: Vec<String>,
}

impl KernelInstance {
    /// The instance served before any kernel has loaded.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse and run `source` in a fresh namespace.
    pub fn load(source: &str, options: &LoadOptions) -> Result<Self, ReloadError> {
        let program = parser::parse(source).map_err(ReloadError::Parse)?;
        let (globals, output) = interpreter::run_module(&program, options.limits)
            .map_err(|e| ReloadError::Runtime(e.to_string()))?;

        for required in &options.entry_points {
            if !globals.contains_key(required) {
                return Err(ReloadError::MissingEntryPoint(required.clone()));
            }
        }

        debug!(bindings = globals.len(), printed = output.len(), "Kernel loaded");
        Ok(Self {
            bindings: Bindings { names: globals },
            limits: options.limits,
            load_output: output,
        })
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Lines printed by the top level while loading.
    pub fn load_output(&self) -> &[String] {
        &self.load_output
    }

    /// Call a bound function by name.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Invocation, RuntimeError> {
        let callee = self.bindings.get(name).cloned().ok_or_else(|| RuntimeError {
            message: format!("name '{name}' is not defined"),
            line: 0,
        })?;
        let (value, output) = interpreter::call_value(&self.bindings.names, self.limits, callee, args)?;
        Ok(Invocation { value, output })
    }

    /// Evaluate an expression such as `f(1, 2)` against this instance.
    pub fn eval(&self, expression: &str) -> Result<Invocation, KernelError> {
        let expr = parser::parse_expression(expression).map_err(KernelError::Syntax)?;
        let (value, output) = interpreter::evaluate(&self.bindings.names, self.limits, &expr)?;
        Ok(Invocation { value, output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> LoadOptions {
        LoadOptions::default()
    }

    #[test]
    fn load_and_call() {
        let kernel = KernelInstance::load("def f():\n    return 1\n", &options()).unwrap();
        let result = kernel.call("f", vec![]).unwrap();
        assert_eq!(result.value, Value::Int(1));
        assert!(kernel.bindings().contains("f"));
    }

    #[test]
    fn calls_do_not_mutate_the_instance() {
        let src = "count = 0\ndef bump(n):\n    count = n + 1\n    return count\n";
        let kernel = KernelInstance::load(src, &options()).unwrap();
        assert_eq!(kernel.call("bump", vec![Value::Int(5)]).unwrap().value, Value::Int(6));
        assert_eq!(kernel.bindings().get("count"), Some(&Value::Int(0)));
    }

    #[test]
    fn empty_instance_has_no_bindings() {
        let kernel = KernelInstance::empty();
        assert!(kernel.bindings().is_empty());
        assert!(kernel.call("main", vec![]).is_err());
    }

    #[test]
    fn parse_failure_is_a_reload_error() {
        let err = KernelInstance::load("def f(:\n", &options()).unwrap_err();
        assert!(matches!(err, ReloadError::Parse(_)));
    }

    #[test]
    fn raising_top_level_is_a_reload_error() {
        let err = KernelInstance::load("x = 1 / 0\n", &options()).unwrap_err();
        match err {
            ReloadError::Runtime(message) => assert!(message.contains("division by zero")),
            other => panic!("expected runtime failure, got {other:?}"),
        }
    }

    #[test]
    fn runaway_allocation_is_a_reload_error() {
        let src = "s = 'x'\nn = 0\nwhile n < 40:\n    s = s + s\n    n += 1\n";
        match KernelInstance::load(src, &options()).unwrap_err() {
            ReloadError::Runtime(message) => assert!(message.contains("step limit"), "{message}"),
            other => panic!("expected runtime failure, got {other:?}"),
        }
    }

    #[test]
    fn missing_entry_point() {
        let options = LoadOptions {
            entry_points: vec!["main".into()],
            ..LoadOptions::default()
        };
        let err = KernelInstance::load("def helper():\n    pass\n", &options).unwrap_err();
        assert_eq!(err, ReloadError::MissingEntryPoint("main".into()));
    }

    #[test]
    fn eval_expression() {
        let kernel = KernelInstance::load("def add(a, b):\n    print('adding')\n    return a + b\n", &options())
            .unwrap();
        let result = kernel.eval("add(2, 3)").unwrap();
        assert_eq!(result.value, Value::Int(5));
        assert_eq!(result.output, vec!["adding"]);

        assert!(matches!(kernel.eval("add(2,"), Err(KernelError::Syntax(_))));
        assert!(matches!(kernel.eval("missing()"), Err(KernelError::Runtime(_))));
    }

    #[test]
    fn load_output_is_kept() {
        let kernel = KernelInstance::load("print('booting')\n", &options()).unwrap();
        assert_eq!(kernel.load_output(), ["booting".to_string()]);
    }

    #[test]
    fn function_listing() {
        let kernel = KernelInstance::load("LIMIT = 3\ndef a():\n    pass\n", &options()).unwrap();
        assert_eq!(kernel.bindings().functions().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(kernel.bindings().names().count(), 2);
    }
}
