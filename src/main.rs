mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use owo_colors::OwoColorize;
use tracing::info;

use pal::bench::{self, BenchOptions};
use pal::config::Config;
use pal::llm::{ChatModel, ChatOptions, LlmClient};
use pal::printer::Echo;
use pal::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let cfg = Config::load();
    telemetry::init(&cfg.log_level());

    // CLI overrides config for the model and the execution budget
    let mut chat = ChatOptions::new(args.model.clone().unwrap_or_else(|| cfg.default_model()));
    chat.temperature = args.temperature;
    chat.top_p = args.top_p;
    chat.max_tokens = Some(args.max_tokens);

    let markdown = if args.no_md { false } else if args.md { true } else { cfg.get_bool("PRETTIFY_MARKDOWN") };

    let opts = BenchOptions {
        dataset: args.dataset.clone(),
        prompt: args.prompt,
        chat,
        limit: args.limit,
        append: args.append,
        verbose: args.verbose,
        echo: Echo::from_markdown_flag(markdown),
        timeout: args.timeout.map(Duration::from_secs).unwrap_or_else(|| cfg.execution_timeout()),
        dataset_dir: cfg.dataset_path(),
        results_dir: cfg.results_path(),
    };

    let model: Arc<dyn ChatModel> = Arc::new(LlmClient::from_config(&cfg)?);
    info!(model = %opts.chat.model, "using model");
    let mut solver = bench::build_solver(model, &opts);
    let summary = bench::run(solver.as_mut(), &opts).await?;

    println!(
        "{} {:.4} ({}/{})",
        "Accuracy -".green(),
        summary.accuracy().bold(),
        summary.correct,
        summary.scored
    );
    println!("{}", opts.output_path().display().dimmed());
    Ok(())
}
