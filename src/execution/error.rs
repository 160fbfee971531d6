//! Error types for program execution.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::timeout::TimedOut;

/// Python-style exception class of a [`RuntimeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SyntaxError,
    NameError,
    TypeError,
    ValueError,
    ZeroDivisionError,
    IndexError,
    KeyError,
    AttributeError,
    ImportError,
    AssertionError,
    RecursionError,
    OverflowError,
    MemoryError,
    /// The enclosing deadline expired mid-evaluation.
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SyntaxError => "SyntaxError",
            Self::NameError => "NameError",
            Self::TypeError => "TypeError",
            Self::ValueError => "ValueError",
            Self::ZeroDivisionError => "ZeroDivisionError",
            Self::IndexError => "IndexError",
            Self::KeyError => "KeyError",
            Self::AttributeError => "AttributeError",
            Self::ImportError => "ImportError",
            Self::AssertionError => "AssertionError",
            Self::RecursionError => "RecursionError",
            Self::OverflowError => "OverflowError",
            Self::MemoryError => "MemoryError",
            Self::Timeout => "Timeout",
        };
        f.write_str(name)
    }
}

/// A failure raised while lexing, parsing or interpreting a program.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}{}", line_suffix(.line))]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    /// 1-based source line, when known.
    pub line: Option<usize>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), line: None }
    }

    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::SyntaxError, message: message.into(), line: Some(line) }
    }

    pub fn name(name: &str) -> Self {
        Self::new(ErrorKind::NameError, format!("name '{name}' is not defined"))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ZeroDivisionError, message)
    }

    /// Attach a line number unless one is already recorded.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|l| format!(" (line {l})")).unwrap_or_default()
}

impl From<TimedOut> for RuntimeError {
    fn from(t: TimedOut) -> Self {
        Self::new(ErrorKind::Timeout, t.to_string())
    }
}

/// Result alias for interpreter operations.
pub type RunResult<T> = Result<T, RuntimeError>;

/// Failure of an execution-context operation or answer retrieval.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// A statement raised while executing a program.
    #[error("execution failed: {0}")]
    Execution(#[source] RuntimeError),
    /// An answer expression was malformed or raised.
    #[error("evaluation failed: {0}")]
    Evaluation(#[source] RuntimeError),
    /// The interpreter thread could not be started or died.
    #[error("interpreter failed: {0}")]
    Internal(String),
    /// The guarded operation ran past its budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The configured answer variable was never bound.
    #[error("answer variable `{0}` is not defined")]
    UndefinedAnswer(String),
    /// Standard-output retrieval found nothing printed.
    #[error("program printed nothing to standard output")]
    EmptyOutput,
    /// No line left to evaluate as the answer expression.
    #[error("no code to evaluate")]
    EmptyProgram,
}

impl From<TimedOut> for ExecError {
    fn from(t: TimedOut) -> Self {
        Self::Timeout(t.budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_kind_and_line() {
        let err = RuntimeError::new(ErrorKind::KeyError, "'apples'");
        assert_eq!(err.to_string(), "KeyError: 'apples'");
        assert_eq!(err.at_line(4).to_string(), "KeyError: 'apples' (line 4)");
        let wrapped = ExecError::Execution(RuntimeError::syntax(2, "invalid syntax"));
        assert_eq!(wrapped.to_string(), "execution failed: SyntaxError: invalid syntax (line 2)");
    }
}
