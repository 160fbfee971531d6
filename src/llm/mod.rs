//! Reqwest-based LLM client implementing OpenAI-compatible Chat Completions streaming.

use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
}

impl ChatOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into(), temperature: 0.0, top_p: 1.0, max_tokens: Some(1024), stop: None }
    }
}

/// A chat-completion backend: messages in, one text response out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<String>;
}

#[async_trait]
impl<T: ChatModel + ?Sized> ChatModel for Arc<T> {
    async fn complete(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<String> {
        (**self).complete(messages, opts).await
    }
}

#[derive(Debug)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let api_base_url = cfg.get("API_BASE_URL").unwrap_or_else(|| "default".into());
        let base_url = normalize_base_url(&api_base_url);
        let api_key = cfg.get("OPENAI_API_KEY");

        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()?;

        Ok(Self { http, base_url, api_key })
    }

    pub fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        opts: ChatOptions,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>> {
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();

        Box::pin(try_stream! {
            let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("text/event-stream"));
            if let Some(key) = api_key.clone() {
                let hv = HeaderValue::from_str(&format!("Bearer {}", key))?;
                headers.insert(AUTHORIZATION, hv);
            }

            let body = request_body(&messages, &opts);

            let resp = http
                .post(url)
                .headers(headers)
                .json(&body)
                .send()
                .await
                .context("failed to send chat request")?;

            let status = resp.status();
            if !status.is_success() {
                let detail = resp.text().await.unwrap_or_default();
                Err(anyhow::anyhow!("LLM error: {} {}", status, detail.trim()))?;
                return;
            }

            let mut buf: Vec<u8> = Vec::new();
            let mut stream = resp.bytes_stream();
            use futures_util::StreamExt as _;

            while let Some(chunk) = stream.next().await {
                let bytes = chunk.context("stream error")?;
                buf.extend_from_slice(&bytes);
                while let Some(line) = take_line(&mut buf) {
                    match decode_line(&line) {
                        Some(StreamEvent::Done) => { yield StreamEvent::Done; return; }
                        Some(event) => { yield event; }
                        None => {}
                    }
                }
            }
        })
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<String> {
        use futures_util::StreamExt as _;

        let mut stream = self.chat_stream(messages.to_vec(), opts.clone());
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Content(content) => text.push_str(&content),
                StreamEvent::Done => break,
            }
        }
        Ok(text)
    }
}

#[derive(Debug, PartialEq)]
pub enum StreamEvent {
    Content(String),
    Done,
}

fn normalize_base_url(api_base_url: &str) -> String {
    let base_url = if api_base_url == "default" { "https://api.openai.com/v1" } else { api_base_url };
    let trimmed = base_url.trim_end_matches('/');
    if !trimmed.ends_with("/v1") && !trimmed.contains("/v1/") {
        format!("{}/v1", trimmed)
    } else {
        trimmed.to_string()
    }
}

fn request_body(messages: &[ChatMessage], opts: &ChatOptions) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": opts.model,
        "temperature": opts.temperature,
        "top_p": opts.top_p,
        "messages": messages,
        "stream": true,
    });
    if let Some(max_tokens) = opts.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(stop) = &opts.stop {
        body["stop"] = serde_json::json!(stop);
    }
    body
}

/// Pop the next complete line off `buf`. A trailing partial line stays
/// buffered, so a character split across chunks decodes once it is whole.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buf.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&line).trim().to_string())
}

/// Decode one SSE line. Comments, blank lines and malformed payloads yield nothing.
fn decode_line(line: &str) -> Option<StreamEvent> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let payload = line.strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        return Some(StreamEvent::Done);
    }
    let chunk = serde_json::from_str::<Chunk>(payload).ok()?;
    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.and_then(|d| d.content))
        .collect();
    (!content.is_empty()).then_some(StreamEvent::Content(content))
}

// Minimal chunk structures for OpenAI-like streaming
#[derive(Debug, Deserialize)]
struct Chunk {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_v1_suffix() {
        assert_eq!(normalize_base_url("default"), "https://api.openai.com/v1");
        assert_eq!(normalize_base_url("https://api.groq.com/openai/"), "https://api.groq.com/openai/v1");
        assert_eq!(normalize_base_url("http://localhost:8000/v1/"), "http://localhost:8000/v1");
    }

    #[test]
    fn sse_lines_decode_to_events() {
        let line = r#"data: {"id":"x","choices":[{"delta":{"role":"assistant","content":"The answer"}}]}"#;
        assert_eq!(decode_line(line), Some(StreamEvent::Content("The answer".into())));
        assert_eq!(decode_line("data: [DONE]"), Some(StreamEvent::Done));
        assert_eq!(decode_line(": keep-alive"), None);
        assert_eq!(decode_line("data: not json"), None);
        assert_eq!(decode_line(r#"data: {"choices":[{"delta":{}}]}"#), None);
    }

    #[test]
    fn characters_split_across_chunks_survive() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"12 \u{20ac}\"}}]}\n".as_bytes();
        let euro = line.iter().position(|&b| b == 0xe2).unwrap();
        let mut buf = line[..euro + 1].to_vec();
        assert_eq!(take_line(&mut buf), None);
        buf.extend_from_slice(&line[euro + 1..]);
        let decoded = take_line(&mut buf).unwrap();
        assert_eq!(decode_line(&decoded), Some(StreamEvent::Content("12 \u{20ac}".into())));
        assert!(buf.is_empty());
    }

    #[test]
    fn body_carries_sampling_options() {
        let mut opts = ChatOptions::new("llama-3.1-70b-versatile");
        opts.stop = Some(vec!["\n\n\n".into()]);
        let body = request_body(&[ChatMessage::user("hi")], &opts);
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["stop"][0], "\n\n\n");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["stream"], true);
    }
}
