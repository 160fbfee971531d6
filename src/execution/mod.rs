//! Execution context for model-written programs.
//!
//! A [`Runtime`] owns one global variable mapping that persists across
//! [`Runtime::execute`] calls, plus a buffer collecting everything the
//! programs print.
//!
//! Parsing and interpretation recurse, so both run on a dedicated thread
//! with a large stack; the caller's thread only waits for it.

use std::collections::HashMap;
use std::thread;

pub mod ast;
pub mod builtins;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod timeout;
pub mod value;

pub use error::{ErrorKind, ExecError, RuntimeError};
pub use timeout::{
    Clock, Deadline, SystemClock, TimedOut, TimeoutGuard, DEFAULT_EXECUTION_TIMEOUT, DEFAULT_GUARD_TIMEOUT,
};
pub use value::Value;

use interpreter::Interpreter;

/// Stack for the interpreter thread. Deep enough for the recursion limit
/// and the parser's nesting limit at once.
const INTERPRETER_STACK: usize = 256 << 20;

#[derive(Debug, Default)]
pub struct Runtime {
    globals: HashMap<String, Value>,
    output: String,
}

/// Clones get their own lists and dicts.
impl Clone for Runtime {
    fn clone(&self) -> Self {
        Self { globals: copy_globals(&self.globals), output: self.output.clone() }
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `lines` as one program against the global mapping. Bindings made
    /// before a failing statement are kept.
    pub fn execute<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<(), ExecError> {
        self.run_program(lines, None)
    }

    pub fn execute_until<S: AsRef<str>>(&mut self, lines: &[S], deadline: &Deadline) -> Result<(), ExecError> {
        self.run_program(lines, Some(deadline))
    }

    /// Evaluate one expression. The global mapping is left untouched.
    pub fn evaluate(&mut self, expr: &str) -> Result<Value, ExecError> {
        self.evaluate_expr(expr, None)
    }

    pub fn evaluate_until(&mut self, expr: &str, deadline: &Deadline) -> Result<Value, ExecError> {
        self.evaluate_expr(expr, Some(deadline))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.globals
    }

    /// Forget every binding and any captured output.
    pub fn reset(&mut self) {
        self.globals.clear();
        self.output.clear();
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    fn run_program<S: AsRef<str>>(&mut self, lines: &[S], deadline: Option<&Deadline>) -> Result<(), ExecError> {
        let source = lines.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("\n");
        let Self { globals, output } = self;
        on_interpreter_stack(move || {
            let program = parser::parse_program(&source).map_err(ExecError::Execution)?;
            Interpreter::new(globals, output, deadline)
                .run(&program)
                .map_err(|e| classify(e, deadline, ExecError::Execution))
        })
    }

    fn evaluate_expr(&mut self, expr: &str, deadline: Option<&Deadline>) -> Result<Value, ExecError> {
        let Self { globals, output } = self;
        on_interpreter_stack(move || {
            let parsed = parser::parse_expression(expr).map_err(ExecError::Evaluation)?;
            let mut scratch = copy_globals(globals);
            Interpreter::new(&mut scratch, output, deadline)
                .eval(&parsed)
                .map_err(|e| classify(e, deadline, ExecError::Evaluation))
        })
    }
}

/// Deep copy of a global mapping. Aliasing between globals is kept.
fn copy_globals(globals: &HashMap<String, Value>) -> HashMap<String, Value> {
    let mut copies = HashMap::new();
    globals.iter().map(|(name, value)| (name.clone(), value.deep_copy(&mut copies))).collect()
}

fn on_interpreter_stack<T: Send>(work: impl FnOnce() -> Result<T, ExecError> + Send) -> Result<T, ExecError> {
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("pal-exec".into())
            .stack_size(INTERPRETER_STACK)
            .spawn_scoped(scope, work)
            .map_err(|e| ExecError::Internal(format!("cannot start interpreter thread: {e}")))?;
        handle.join().map_err(|_| ExecError::Internal("interpreter thread panicked".into()))?
    })
}

fn classify(err: RuntimeError, deadline: Option<&Deadline>, wrap: fn(RuntimeError) -> ExecError) -> ExecError {
    match deadline {
        Some(deadline) if err.is_timeout() => ExecError::Timeout(deadline.budget()),
        _ => wrap(err),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn assignment_then_evaluation() {
        let mut runtime = Runtime::new();
        runtime.execute(&["x = 2 + 2"]).unwrap();
        assert_eq!(runtime.evaluate("x").unwrap(), Value::Int(4));
        assert_eq!(runtime.get("x"), Some(&Value::Int(4)));
    }

    #[test]
    fn bindings_persist_across_runs() {
        let mut runtime = Runtime::new();
        runtime.execute(&["a = 10"]).unwrap();
        runtime.execute(&["b = a * 3"]).unwrap();
        assert_eq!(runtime.get("b"), Some(&Value::Int(30)));
    }

    #[test]
    fn evaluate_does_not_mutate_globals() {
        let mut runtime = Runtime::new();
        runtime.execute(&["xs = [1, 2]"]).unwrap();
        runtime.evaluate("xs.append(3)").unwrap();
        assert_eq!(runtime.get("xs"), Some(&Value::list(vec![Value::Int(1), Value::Int(2)])));
    }

    #[test]
    fn clones_do_not_share_lists() {
        let mut runtime = Runtime::new();
        runtime.execute(&["xs = [1]", "ys = xs"]).unwrap();
        let mut copy = runtime.clone();
        copy.execute(&["ys.append(2)"]).unwrap();
        assert_eq!(copy.evaluate("len(xs)").unwrap(), Value::Int(2));
        assert_eq!(runtime.evaluate("len(xs)").unwrap(), Value::Int(1));
    }

    #[test]
    fn recursion_runs_on_the_interpreter_stack() {
        let mut runtime = Runtime::new();
        runtime.execute(&["def depth(n):", "    return 0 if n == 0 else 1 + depth(n - 1)"]).unwrap();
        assert_eq!(runtime.evaluate("depth(190)").unwrap(), Value::Int(190));
        match runtime.evaluate("depth(10 ** 6)") {
            Err(ExecError::Evaluation(e)) => assert_eq!(e.kind, ErrorKind::RecursionError),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn runtime_works_inside_async_tasks() {
        let total = tokio::spawn(async {
            let mut runtime = Runtime::new();
            runtime.execute(&["def f(n):", "    return n if n < 1 else f(n - 1) + 1", "x = f(150)"])?;
            runtime.evaluate("x")
        });
        assert_eq!(total.await.unwrap().unwrap(), Value::Int(150));
    }

    #[test]
    fn failure_keeps_earlier_bindings() {
        let mut runtime = Runtime::new();
        let err = runtime.execute(&["a = 1", "b = undefined_name", "c = 3"]).unwrap_err();
        match err {
            ExecError::Execution(e) => assert_eq!(e.kind, ErrorKind::NameError),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runtime.get("a"), Some(&Value::Int(1)));
        assert_eq!(runtime.get("c"), None);
    }

    #[test]
    fn malformed_expression_is_an_evaluation_error() {
        let mut runtime = Runtime::new();
        assert!(matches!(runtime.evaluate("1 +"), Err(ExecError::Evaluation(_))));
        assert!(matches!(runtime.evaluate("nope"), Err(ExecError::Evaluation(_))));
    }

    #[test]
    fn print_output_is_captured() {
        let mut runtime = Runtime::new();
        runtime.execute(&["print(1 + 1)", "print('done')"]).unwrap();
        assert_eq!(runtime.take_output(), "2\ndone\n");
        assert_eq!(runtime.output(), "");
    }

    #[test]
    fn infinite_loop_times_out() {
        let mut runtime = Runtime::new();
        let guard = TimeoutGuard::new(Duration::from_millis(100));
        let result = guard.run(|deadline| runtime.execute_until(&["while True:", "    x = 1"], deadline));
        assert!(matches!(result, Err(ExecError::Timeout(d)) if d == Duration::from_millis(100)));
    }

    #[test]
    fn guards_on_separate_threads_do_not_interfere() {
        let slow = std::thread::spawn(|| {
            let mut runtime = Runtime::new();
            let guard = TimeoutGuard::new(Duration::from_millis(50));
            guard.run(|d| runtime.execute_until(&["while True:", "    pass"], d))
        });
        let mut runtime = Runtime::new();
        let guard = TimeoutGuard::with_clock(Arc::new(SystemClock), Duration::from_secs(5));
        let fast = guard.run(|d| {
            runtime.execute_until(&["total = sum(range(100))"], d)?;
            runtime.evaluate_until("total", d)
        });
        assert_eq!(fast.unwrap(), Value::Int(4950));
        assert!(matches!(slow.join().unwrap(), Err(ExecError::Timeout(_))));
    }
}
