//! Pulling code and answers out of model responses.

use std::sync::OnceLock;

use regex::Regex;

use crate::answer::Answer;

static ANSWER_PHRASE: OnceLock<Regex> = OnceLock::new();
static DIGITS: OnceLock<Regex> = OnceLock::new();
static CODE_BLOCK: OnceLock<Regex> = OnceLock::new();

fn answer_phrase() -> &'static Regex {
    ANSWER_PHRASE.get_or_init(|| Regex::new(r"The answer is (\w+)\.").expect("Invalid answer pattern"))
}

fn digits() -> &'static Regex {
    DIGITS.get_or_init(|| Regex::new(r"\d+").expect("Invalid digits pattern"))
}

fn code_block() -> &'static Regex {
    CODE_BLOCK.get_or_init(|| Regex::new(r"(?ms)^```(?:\w+)?\s*\n(.*?)^```").expect("Invalid code block pattern"))
}

/// Lines of the first fenced code block, or every line of `text` when there
/// is none.
pub fn extract_code(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if let Some(body) = code_block().captures(text).and_then(|c| c.get(1)) {
        let body = body.as_str();
        let body = body.strip_suffix('\n').unwrap_or(body);
        return body.split('\n').map(str::to_string).collect();
    }
    tracing::warn!("no code block found in the response");
    text.split('\n').map(str::to_string).collect()
}

/// Last "The answer is X." capture, else the last run of digits, else the
/// whole response.
pub fn extract_answer(text: &str) -> String {
    let phrase = answer_phrase()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .last()
        .map(|m| m.as_str());
    let found = phrase.or_else(|| digits().find_iter(text).last().map(|m| m.as_str()));
    match found {
        Some(answer) => answer.to_string(),
        None => {
            tracing::warn!("no answer found in the response");
            text.to_string()
        }
    }
}

/// Turns a raw model response into an [`Answer`].
pub trait AnswerExtractor: Send + Sync {
    fn extract(&self, response: &str) -> Answer;
}

impl<F> AnswerExtractor for F
where
    F: Fn(&str) -> Answer + Send + Sync,
{
    fn extract(&self, response: &str) -> Answer {
        self(response)
    }
}

/// [`extract_answer`] followed by [`Answer::from_text`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternExtractor;

impl AnswerExtractor for PatternExtractor {
    fn extract(&self, response: &str) -> Answer {
        Answer::from_text(&extract_answer(response))
    }
}
