use clap::{ArgGroup, Parser};

use pal::prompt::PromptKind;

#[derive(Parser, Debug, Clone)]
#[command(name = "pal", about = "Score program-aided and text prompting on a math dataset", version)]
#[command(group(ArgGroup::new("md_switch").args(["md", "no_md"]).multiple(false)))]
pub struct Cli {
    /// Resume: skip examples already written to the results file.
    #[arg(long)]
    pub append: bool,

    /// Echo every model response.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Dataset name; reads `<DATASET_PATH>/<dataset>.jsonl`.
    #[arg(long, default_value = "gsm")]
    pub dataset: String,

    /// Large language model to use.
    #[arg(long)]
    pub model: Option<String>,

    /// Randomness of generated output.
    #[arg(long, default_value_t = 0.0, value_parser = clap::value_parser!(f32))]
    pub temperature: f32,

    /// Limits highest probable tokens (words).
    #[arg(long = "top-p", default_value_t = 1.0, value_parser = clap::value_parser!(f32))]
    pub top_p: f32,

    #[arg(long = "max-tokens", default_value_t = 1024)]
    pub max_tokens: u32,

    /// Prompting method: pal, palvar, cot or direct.
    #[arg(long, default_value_t = PromptKind::Pal)]
    pub prompt: PromptKind,

    /// Score at most this many examples.
    #[arg(long, default_value_t = 500)]
    pub limit: usize,

    /// Seconds a generated program may run (defaults to EXECUTION_TIMEOUT).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Render verbose echo as Markdown.
    #[arg(long)]
    pub md: bool,
    /// Print verbose echo as plain text.
    #[arg(long = "no-md")]
    pub no_md: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_benchmark_setup() {
        let cli = Cli::try_parse_from(["pal"]).unwrap();
        assert_eq!(cli.dataset, "gsm");
        assert_eq!(cli.prompt, PromptKind::Pal);
        assert_eq!(cli.limit, 500);
        assert_eq!(cli.max_tokens, 1024);
        assert_eq!(cli.temperature, 0.0);
        assert!(cli.model.is_none() && cli.timeout.is_none());
    }

    #[test]
    fn prompt_flag_parses_kind() {
        let cli = Cli::try_parse_from(["pal", "--prompt", "cot", "--append", "--timeout", "3"]).unwrap();
        assert_eq!(cli.prompt, PromptKind::Cot);
        assert!(cli.append);
        assert_eq!(cli.timeout, Some(3));
        assert!(Cli::try_parse_from(["pal", "--prompt", "zero-shot"]).is_err());
    }

    #[test]
    fn md_switches_conflict() {
        assert!(Cli::try_parse_from(["pal", "--md", "--no-md"]).is_err());
    }
}
