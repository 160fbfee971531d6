use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use pal::answer::Answer;
use pal::execution::{ExecError, Runtime, Value};
use pal::interface::{AnswerStrategy, ProgramInterface, Solver, TextInterface};
use pal::llm::{ChatMessage, ChatModel, ChatOptions, Role};
use pal::prompt::{PromptKind, PROGRAM_ANSWER_EXPR};

/// Replies with canned responses in order and remembers the prompts.
#[derive(Default)]
struct Scripted {
    replies: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
            prompts: Mutex::default(),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for Scripted {
    async fn complete(&self, messages: &[ChatMessage], _opts: &ChatOptions) -> anyhow::Result<String> {
        assert_eq!(messages[0].role, Role::System);
        self.prompts.lock().unwrap().push(messages[1].content.clone());
        self.replies.lock().unwrap().pop().ok_or_else(|| anyhow::anyhow!("connection reset"))
    }
}

fn opts() -> ChatOptions {
    ChatOptions::new("test-model")
}

const OLIVIA: &str = "Olivia has $23. She bought five bagels for $3 each. How much money does she have left?";

const OLIVIA_PROGRAM: &str = r#"Here is the program:
```python
def solution():
    """Olivia has $23. She bought five bagels for $3 each. How much money does she have left?"""
    money_initial = 23
    bagels = 5
    bagel_cost = 3
    money_spent = bagels * bagel_cost  # 15
    money_left = money_initial - money_spent
    result = money_left
    return result
```
"#;

fn program_interface(model: Arc<Scripted>) -> ProgramInterface<Arc<Scripted>> {
    ProgramInterface::new(model, PromptKind::Pal.system_message())
        .with_strategy(AnswerStrategy::Expression(PROGRAM_ANSWER_EXPR.into()))
}

#[tokio::test]
async fn program_answer_comes_from_solution_call() {
    let model = Scripted::new(&[OLIVIA_PROGRAM]);
    let mut itf = program_interface(model.clone());

    let answer = itf.run(&PromptKind::Pal.render(OLIVIA), Duration::from_secs(5), &opts()).await.unwrap();

    assert_eq!(answer, Answer::Numeric(8.0));
    assert!(answer.is_correct(8.0));
    assert_eq!(itf.history(), [OLIVIA_PROGRAM]);
    assert!(model.prompts()[0].ends_with(&format!("Q: {OLIVIA}\n")));
}

#[tokio::test]
async fn text_answer_uses_last_answer_phrase() {
    let response = "It started with nine computers. Five computers from monday to thursday is 20. \
                    9+20=29. The answer is 29.";
    let model = Scripted::new(&[response]);
    let mut itf = TextInterface::new(model, PromptKind::Cot.system_message());

    let answer = itf.run(&PromptKind::Cot.render("How many computers?"), &opts()).await.unwrap();

    assert_eq!(answer, Answer::Numeric(29.0));
    assert_eq!(itf.history().len(), 1);
}

#[tokio::test]
async fn clearing_history_keeps_runtime_bindings() {
    let first = "```\ntotal = 40\n```";
    let second = "```\ndef solution():\n    return total + 2\n```";
    let mut itf = program_interface(Scripted::new(&[first, second]));

    // First program defines no `solution`, so it cannot be answered.
    let answer = itf.run("q1", Duration::from_secs(5), &opts()).await.unwrap();
    assert!(!answer.is_resolved());
    itf.clear_history();
    assert!(itf.history().is_empty());

    let answer = itf.run("q2", Duration::from_secs(5), &opts()).await.unwrap();
    assert_eq!(answer, Answer::Numeric(42.0));
    assert_eq!(itf.history(), [second]);
}

#[tokio::test]
async fn runaway_program_times_out_as_unresolved() {
    let looping = "```\nn = 0\nwhile True:\n    n += 1\n```";
    let mut itf = program_interface(Scripted::new(&[looping]));

    let answer = itf.run("q", Duration::from_millis(50), &opts()).await.unwrap();

    match answer {
        Answer::Unresolved { reason } => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("expected unresolved answer, got {other:?}"),
    }
    assert_eq!(itf.history().len(), 1);
}

#[test]
fn execute_reports_failures_directly() {
    let mut itf = program_interface(Scripted::new(&[]));
    let err = itf.execute(&["x = 1 / 0"], Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, ExecError::Execution(_)), "{err}");
    assert!(err.to_string().contains("ZeroDivisionError"));

    let err = itf.execute(&["while True:", "    pass"], Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, ExecError::Timeout(_)));
}

#[test]
fn injected_runtime_is_visible_to_programs() {
    let mut runtime = Runtime::new();
    runtime.set("price", Value::Int(3));
    let mut itf = ProgramInterface::new(Scripted::new(&[]), "sys")
        .with_runtime(runtime)
        .with_strategy(AnswerStrategy::Variable("cost".into()));

    let value = itf.execute(&["cost = price * 5"], Duration::from_secs(1)).unwrap();
    assert_eq!(value, Value::Int(15));
    assert_eq!(itf.runtime().get("cost"), Some(&Value::Int(15)));
}

#[tokio::test]
async fn model_failure_is_the_only_error() {
    let mut itf = program_interface(Scripted::new(&[]));
    let err = itf.run("q", Duration::from_secs(1), &opts()).await.unwrap_err();
    assert!(err.to_string().contains("model call failed"));
    assert!(itf.history().is_empty());
}

#[tokio::test]
async fn custom_extractor_replaces_pattern_matching() {
    let model = Scripted::new(&["final: 12 apples"]);
    let mut itf = TextInterface::new(model, "sys").with_extractor(|response: &str| {
        let word = response.split_whitespace().nth(1).unwrap_or_default();
        Answer::from_text(word)
    });

    assert_eq!(itf.run("q", &opts()).await.unwrap(), Answer::Numeric(12.0));
}

#[tokio::test]
async fn solvers_run_concurrently_without_sharing_state() {
    let mut handles = Vec::new();
    for n in 0..4 {
        let program = format!("```\ndef solution():\n    return {n} * 10\n```");
        handles.push(tokio::spawn(async move {
            let mut solver: Box<dyn Solver> = Box::new(program_interface(Scripted::new(&[program.as_str()])));
            let answer = solver.solve("q", &opts()).await.unwrap();
            (n, answer, solver.history().len())
        }));
    }

    for handle in handles {
        let (n, answer, history) = handle.await.unwrap();
        assert_eq!(answer, Answer::Numeric(f64::from(n * 10)));
        assert_eq!(history, 1);
    }
}
