//! Batch evaluation over a JSONL dataset of `{input, target}` records.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::interface::{AnswerStrategy, ProgramInterface, Solver, TextInterface};
use crate::llm::{ChatModel, ChatOptions};
use crate::printer::Echo;
use crate::prompt::{PromptKind, PROGRAM_ANSWER_EXPR};

pub type Record = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct BenchOptions {
    pub dataset: String,
    pub prompt: PromptKind,
    pub chat: ChatOptions,
    pub limit: usize,
    pub append: bool,
    pub verbose: bool,
    pub echo: Echo,
    pub timeout: Duration,
    pub dataset_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl BenchOptions {
    pub fn input_path(&self) -> PathBuf {
        self.dataset_dir.join(format!("{}.jsonl", self.dataset))
    }

    /// `<results>/<dataset>_<prompt>_<model>.chat.jsonl`; `/` in model ids
    /// would otherwise create directories.
    pub fn output_path(&self) -> PathBuf {
        let model = self.chat.model.replace('/', "_");
        self.results_dir.join(format!("{}_{}_{}.chat.jsonl", self.dataset, self.prompt, model))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub scored: usize,
    pub correct: usize,
}

impl Summary {
    pub fn accuracy(&self) -> f64 {
        if self.scored == 0 {
            0.0
        } else {
            self.correct as f64 / self.scored as f64
        }
    }

    fn add(&mut self, score: u8) {
        self.scored += 1;
        self.correct += usize::from(score);
    }
}

/// The interface matching `opts.prompt`.
pub fn build_solver<M: ChatModel + 'static>(model: M, opts: &BenchOptions) -> Box<dyn Solver> {
    let system = opts.prompt.system_message();
    if opts.prompt.is_program() {
        Box::new(
            ProgramInterface::new(model, system)
                .with_strategy(AnswerStrategy::Expression(PROGRAM_ANSWER_EXPR.to_string()))
                .with_timeout(opts.timeout)
                .verbose(opts.verbose)
                .echo(opts.echo),
        )
    } else {
        Box::new(TextInterface::new(model, system).verbose(opts.verbose).echo(opts.echo))
    }
}

pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid JSON record", path.display(), i + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Scores already written to `path`, for resuming. A missing file has none.
pub fn existing_scores(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    Ok(load_records(path)?
        .iter()
        .map(|r| r.get("score").and_then(Value::as_u64).map_or(0, |s| u8::from(s > 0)))
        .collect())
}

/// Run every remaining example through `solver`, writing one result line
/// per example.
pub async fn run(solver: &mut dyn Solver, opts: &BenchOptions) -> Result<Summary> {
    let examples = load_records(&opts.input_path())?;
    let output_path = opts.output_path();
    if let Some(dir) = output_path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let mut summary = Summary::default();
    if opts.append {
        for score in existing_scores(&output_path)? {
            summary.add(score);
        }
    }
    let skip = summary.scored;

    let file = if opts.append {
        OpenOptions::new().create(true).append(true).open(&output_path)
    } else {
        File::create(&output_path)
    }
    .with_context(|| format!("failed to open {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);

    let total = examples.len().min(opts.limit);
    info!(dataset = %opts.dataset, prompt = %opts.prompt, skip, total, output = %output_path.display(), "starting run");

    for (index, example) in examples.iter().enumerate().take(total).skip(skip) {
        let (answer, score) = score_example(solver, opts.prompt, example, &opts.chat).await;
        summary.add(score);

        let mut result = example.clone();
        result.insert("answer".into(), answer);
        result.insert("score".into(), json!(score));
        result.insert("generation".into(), json!(solver.history()));
        serde_json::to_writer(&mut writer, &result)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        solver.clear_history();
        info!(example = index + 1, total, score, accuracy = summary.accuracy(), "scored example");
    }

    Ok(summary)
}

async fn score_example(
    solver: &mut dyn Solver,
    kind: PromptKind,
    example: &Record,
    chat: &ChatOptions,
) -> (Value, u8) {
    let Some(question) = example.get("input").and_then(Value::as_str) else {
        warn!("record has no string `input`");
        return (json!(""), 0);
    };
    let target = example.get("target").and_then(target_value);
    let prompt = kind.render(question);

    match solver.solve(&prompt, chat).await {
        Ok(answer) => match answer.as_number() {
            Some(n) => {
                let correct = target.is_some_and(|t| answer.is_correct(t));
                (json!(n), u8::from(correct))
            }
            None => {
                warn!(%answer, "answer is not numeric");
                (json!(""), 0)
            }
        },
        Err(err) => {
            warn!(error = %err, "example failed");
            (json!(""), 0)
        }
    }
}

fn target_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::llm::ChatMessage;

    struct Scripted(Mutex<Vec<String>>);

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self(Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()))
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        async fn complete(&self, _: &[ChatMessage], _: &ChatOptions) -> anyhow::Result<String> {
            self.0.lock().unwrap().pop().ok_or_else(|| anyhow::anyhow!("no reply scripted"))
        }
    }

    const PROGRAM: &str = "```\ndef solution():\n    return 5 + 3\n```";

    fn options(dir: &Path, prompt: PromptKind) -> BenchOptions {
        BenchOptions {
            dataset: "gsm".into(),
            prompt,
            chat: ChatOptions::new("org/model"),
            limit: 500,
            append: false,
            verbose: false,
            echo: Echo::Plain,
            timeout: Duration::from_secs(5),
            dataset_dir: dir.join("datasets"),
            results_dir: dir.join("results"),
        }
    }

    fn write_dataset(dir: &Path, lines: &[&str]) {
        fs::create_dir_all(dir.join("datasets")).unwrap();
        fs::write(dir.join("datasets/gsm.jsonl"), lines.join("\n")).unwrap();
    }

    fn read_results(opts: &BenchOptions) -> Vec<Record> {
        load_records(&opts.output_path()).unwrap()
    }

    #[test]
    fn output_path_flattens_model_id() {
        let opts = options(Path::new("/tmp"), PromptKind::PalVar);
        assert_eq!(opts.output_path(), PathBuf::from("/tmp/results/gsm_palvar_org_model.chat.jsonl"));
        assert_eq!(opts.input_path(), PathBuf::from("/tmp/datasets/gsm.jsonl"));
    }

    #[tokio::test]
    async fn program_run_scores_and_records_generation() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(
            dir.path(),
            &[
                r#"{"input": "Olivia has $23...", "target": 8}"#,
                r#"{"input": "Another", "target": "9"}"#,
            ],
        );
        let opts = options(dir.path(), PromptKind::Pal);
        let mut solver = build_solver(Scripted::new(&[PROGRAM, PROGRAM]), &opts);

        let summary = run(solver.as_mut(), &opts).await.unwrap();
        assert_eq!(summary, Summary { scored: 2, correct: 1 });
        assert!((summary.accuracy() - 0.5).abs() < 1e-9);

        let results = read_results(&opts);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["answer"], json!(8.0));
        assert_eq!(results[0]["score"], json!(1));
        assert_eq!(results[0]["generation"], json!([PROGRAM]));
        assert_eq!(results[1]["score"], json!(0));
        assert!(solver.history().is_empty());
    }

    #[tokio::test]
    async fn failures_score_zero_and_continue() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(
            dir.path(),
            &[
                r#"{"input": "a", "target": 1}"#,
                r#"{"input": "b", "target": 2}"#,
                r#"{"input": "c", "target": 29}"#,
            ],
        );
        let opts = options(dir.path(), PromptKind::Direct);
        let replies = ["I am not sure.", "The answer is 29."];
        let mut solver = build_solver(Scripted::new(&replies), &opts);

        // Third call finds no scripted reply and fails like a network error.
        let summary = run(solver.as_mut(), &opts).await.unwrap();
        assert_eq!(summary, Summary { scored: 3, correct: 0 });

        let results = read_results(&opts);
        assert_eq!(results[0]["answer"], json!(""));
        assert_eq!(results[1]["answer"], json!(29.0));
        assert_eq!(results[2]["answer"], json!(""));
        assert_eq!(results[2]["generation"], json!([]));
    }

    #[tokio::test]
    async fn append_resumes_after_existing_results() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(
            dir.path(),
            &[
                r#"{"input": "a", "target": 8}"#,
                r#"{"input": "b", "target": 8}"#,
                r#"{"input": "c", "target": 8}"#,
            ],
        );
        let mut opts = options(dir.path(), PromptKind::Pal);
        opts.limit = 1;
        let mut solver = build_solver(Scripted::new(&[PROGRAM]), &opts);
        run(solver.as_mut(), &opts).await.unwrap();

        opts.limit = 500;
        opts.append = true;
        let mut solver = build_solver(Scripted::new(&[PROGRAM, PROGRAM]), &opts);
        let summary = run(solver.as_mut(), &opts).await.unwrap();

        assert_eq!(summary, Summary { scored: 3, correct: 3 });
        let results = read_results(&opts);
        assert_eq!(results.len(), 3);
        assert_eq!(results[2]["input"], json!("c"));
    }

    #[test]
    fn targets_accept_numbers_and_strings() {
        assert_eq!(target_value(&json!(72)), Some(72.0));
        assert_eq!(target_value(&json!("1,200")), Some(1200.0));
        assert_eq!(target_value(&json!(null)), None);
    }

    #[test]
    fn empty_summary_has_zero_accuracy() {
        assert_eq!(Summary::default().accuracy(), 0.0);
    }
}
