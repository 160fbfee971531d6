//! Conversational harness: prompt a model, keep the raw responses, and turn
//! them into answers either by pattern extraction or by running the program
//! the model wrote.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::answer::Answer;
use crate::execution::{Clock, Deadline, ExecError, Runtime, SystemClock, TimeoutGuard, Value, DEFAULT_EXECUTION_TIMEOUT};
use crate::extract::{extract_code, AnswerExtractor, PatternExtractor};
use crate::llm::{ChatMessage, ChatModel, ChatOptions};
use crate::printer::Echo;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// The model backend failed; nothing was recorded.
    #[error("model call failed: {0}")]
    ExternalCall(#[source] anyhow::Error),
}

/// Shared state of every harness: the model, its system message and the
/// history of raw responses.
pub struct Interface<M> {
    model: M,
    system_message: String,
    verbose: bool,
    echo: Echo,
    history: Vec<String>,
}

impl<M: ChatModel> Interface<M> {
    pub fn new(model: M, system_message: impl Into<String>) -> Self {
        Self { model, system_message: system_message.into(), verbose: false, echo: Echo::Plain, history: Vec::new() }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }

    pub fn system_message(&self) -> &str {
        &self.system_message
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Send `[system, user]` and record the response.
    pub async fn generate(&mut self, prompt: &str, opts: &ChatOptions) -> Result<String, HarnessError> {
        let messages = [ChatMessage::system(self.system_message.as_str()), ChatMessage::user(prompt)];
        let response = self
            .model
            .complete(&messages, opts)
            .await
            .map_err(HarnessError::ExternalCall)?;
        if self.verbose {
            self.echo.print(&response);
        }
        self.history.push(response.clone());
        Ok(response)
    }
}

/// Answers by extracting them from the response text.
pub struct TextInterface<M> {
    inner: Interface<M>,
    extractor: Box<dyn AnswerExtractor>,
}

impl<M: ChatModel> TextInterface<M> {
    pub fn new(model: M, system_message: impl Into<String>) -> Self {
        Self { inner: Interface::new(model, system_message), extractor: Box::new(PatternExtractor) }
    }

    pub fn with_extractor(mut self, extractor: impl AnswerExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.inner = self.inner.verbose(verbose);
        self
    }

    pub fn echo(mut self, echo: Echo) -> Self {
        self.inner = self.inner.echo(echo);
        self
    }

    pub fn interface(&self) -> &Interface<M> {
        &self.inner
    }

    pub fn history(&self) -> &[String] {
        self.inner.history()
    }

    pub fn clear_history(&mut self) {
        self.inner.clear_history();
    }

    pub async fn run(&mut self, prompt: &str, opts: &ChatOptions) -> Result<Answer, HarnessError> {
        let response = self.inner.generate(prompt, opts).await?;
        Ok(self.extractor.extract(&response))
    }
}

/// Where a program's answer comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AnswerStrategy {
    /// Last line the program printed.
    Stdout,
    /// A global variable the program binds.
    Variable(String),
    /// An expression evaluated after the program ran, e.g. `solution()`.
    Expression(String),
    /// Run every line but the last non-blank one, then evaluate that line.
    #[default]
    LastLine,
}

/// Answers by running the program in the response's first code block.
pub struct ProgramInterface<M> {
    inner: Interface<M>,
    runtime: Runtime,
    strategy: AnswerStrategy,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl<M: ChatModel> ProgramInterface<M> {
    pub fn new(model: M, system_message: impl Into<String>) -> Self {
        Self {
            inner: Interface::new(model, system_message),
            runtime: Runtime::new(),
            strategy: AnswerStrategy::default(),
            clock: Arc::new(SystemClock),
            timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_strategy(mut self, strategy: AnswerStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Budget used by [`Solver::solve`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.inner = self.inner.verbose(verbose);
        self
    }

    pub fn echo(mut self, echo: Echo) -> Self {
        self.inner = self.inner.echo(echo);
        self
    }

    pub fn interface(&self) -> &Interface<M> {
        &self.inner
    }

    pub fn strategy(&self) -> &AnswerStrategy {
        &self.strategy
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    pub fn history(&self) -> &[String] {
        self.inner.history()
    }

    pub fn clear_history(&mut self) {
        self.inner.clear_history();
    }

    /// Generate, extract the code and run it under `timeout`. Execution
    /// failures resolve to [`Answer::Unresolved`]; only model failures are
    /// errors.
    pub async fn run(&mut self, prompt: &str, timeout: Duration, opts: &ChatOptions) -> Result<Answer, HarnessError> {
        let response = self.inner.generate(prompt, opts).await?;
        let code = extract_code(&response);
        match self.execute(&code, timeout) {
            Ok(value) => Ok(Answer::from_value(&value)),
            Err(err) => {
                warn!(error = %err, "program did not produce an answer");
                Ok(Answer::unresolved(err.to_string()))
            }
        }
    }

    /// Run `code` with the configured strategy and return the raw answer
    /// value or the failure.
    pub fn execute<S: AsRef<str>>(&mut self, code: &[S], timeout: Duration) -> Result<Value, ExecError> {
        let guard = TimeoutGuard::with_clock(self.clock.clone(), timeout);
        let result = guard.run(|deadline| run_strategy(&mut self.runtime, &self.strategy, code, deadline));
        let output = self.runtime.take_output();
        if !output.is_empty() {
            debug!(output = %output.trim_end(), "captured program output");
        }
        result
    }
}

fn run_strategy<S: AsRef<str>>(
    runtime: &mut Runtime,
    strategy: &AnswerStrategy,
    code: &[S],
    deadline: &Deadline,
) -> Result<Value, ExecError> {
    match strategy {
        AnswerStrategy::Stdout => {
            runtime.take_output();
            runtime.execute_until(code, deadline)?;
            let output = runtime.take_output();
            debug!(output = %output.trim_end(), "captured program output");
            output
                .lines()
                .last()
                .map(|line| Value::Str(line.to_string()))
                .ok_or(ExecError::EmptyOutput)
        }
        AnswerStrategy::Variable(name) => {
            runtime.execute_until(code, deadline)?;
            runtime.get(name).cloned().ok_or_else(|| ExecError::UndefinedAnswer(name.clone()))
        }
        AnswerStrategy::Expression(expr) => {
            runtime.execute_until(code, deadline)?;
            runtime.evaluate_until(expr, deadline)
        }
        AnswerStrategy::LastLine => {
            let last = code
                .iter()
                .rposition(|line| !line.as_ref().trim().is_empty())
                .ok_or(ExecError::EmptyProgram)?;
            runtime.execute_until(&code[..last], deadline)?;
            runtime.evaluate_until(code[last].as_ref(), deadline)
        }
    }
}

/// One question in, one answer out. Lets callers drive either interface.
#[async_trait]
pub trait Solver: Send {
    async fn solve(&mut self, prompt: &str, opts: &ChatOptions) -> Result<Answer, HarnessError>;
    fn history(&self) -> &[String];
    fn clear_history(&mut self);
}

#[async_trait]
impl<M: ChatModel> Solver for TextInterface<M> {
    async fn solve(&mut self, prompt: &str, opts: &ChatOptions) -> Result<Answer, HarnessError> {
        self.run(prompt, opts).await
    }

    fn history(&self) -> &[String] {
        TextInterface::history(self)
    }

    fn clear_history(&mut self) {
        TextInterface::clear_history(self);
    }
}

#[async_trait]
impl<M: ChatModel> Solver for ProgramInterface<M> {
    async fn solve(&mut self, prompt: &str, opts: &ChatOptions) -> Result<Answer, HarnessError> {
        let timeout = self.timeout;
        self.run(prompt, timeout, opts).await
    }

    fn history(&self) -> &[String] {
        ProgramInterface::history(self)
    }

    fn clear_history(&mut self) {
        ProgramInterface::clear_history(self);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Replies with canned responses in order and records what it was sent.
    struct Scripted {
        replies: Mutex<Vec<String>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        async fn complete(&self, messages: &[ChatMessage], _opts: &ChatOptions) -> anyhow::Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies.lock().unwrap().pop().ok_or_else(|| anyhow::anyhow!("no reply left"))
        }
    }

    fn opts() -> ChatOptions {
        ChatOptions::new("test-model")
    }

    #[tokio::test]
    async fn generate_sends_system_then_user() {
        let mut itf = Interface::new(Scripted::new(&["hello"]), "be terse");
        let reply = itf.generate("hi", &opts()).await.unwrap();
        assert_eq!(reply, "hello");
        let seen = itf.model().seen.lock().unwrap();
        assert_eq!(seen[0], vec![ChatMessage::system("be terse"), ChatMessage::user("hi")]);
    }

    #[tokio::test]
    async fn model_failure_records_nothing() {
        let mut itf = TextInterface::new(Scripted::new(&[]), "sys");
        let err = itf.run("q", &opts()).await.unwrap_err();
        assert!(matches!(err, HarnessError::ExternalCall(_)));
        assert!(itf.history().is_empty());
    }

    #[tokio::test]
    async fn last_line_strategy_evaluates_final_line() {
        let reply = "```python\nx = 6\ny = 7\nx * y\n\n```";
        let mut itf = ProgramInterface::new(Scripted::new(&[reply]), "sys");
        let answer = itf.run("q", Duration::from_secs(5), &opts()).await.unwrap();
        assert_eq!(answer, Answer::Numeric(42.0));
    }

    #[tokio::test]
    async fn stdout_strategy_uses_last_printed_line() {
        let reply = "```\nprint('working')\nprint(3 * 5)\n```";
        let mut itf = ProgramInterface::new(Scripted::new(&[reply]), "sys").with_strategy(AnswerStrategy::Stdout);
        let answer = itf.run("q", Duration::from_secs(5), &opts()).await.unwrap();
        assert_eq!(answer, Answer::Numeric(15.0));
    }

    #[test]
    fn variable_strategy_reports_missing_binding() {
        let mut itf = ProgramInterface::new(Scripted::new(&[]), "sys")
            .with_strategy(AnswerStrategy::Variable("answer".into()));
        let err = itf.execute(&["x = 1"], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ExecError::UndefinedAnswer(name) if name == "answer"));
        assert_eq!(itf.execute(&["answer = 2.5"], Duration::from_secs(1)).unwrap(), Value::Float(2.5));
    }

    #[test]
    fn stdout_strategy_without_output() {
        let mut itf = ProgramInterface::new(Scripted::new(&[]), "sys").with_strategy(AnswerStrategy::Stdout);
        assert!(matches!(itf.execute(&["x = 1"], Duration::from_secs(1)), Err(ExecError::EmptyOutput)));
    }

    #[test]
    fn blank_program_is_empty() {
        let mut itf = ProgramInterface::new(Scripted::new(&[]), "sys");
        let blank: [&str; 2] = ["", "   "];
        assert!(matches!(itf.execute(&blank, Duration::from_secs(1)), Err(ExecError::EmptyProgram)));
    }

    #[tokio::test]
    async fn failing_program_is_unresolved() {
        let reply = "```\nx = 1 / 0\nx\n```";
        let mut itf = ProgramInterface::new(Scripted::new(&[reply]), "sys");
        let answer = itf.run("q", Duration::from_secs(5), &opts()).await.unwrap();
        assert!(!answer.is_resolved());
        assert_eq!(itf.history().len(), 1);
    }
}
