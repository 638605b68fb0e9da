//! Ollama backend
//!
//! Connects to a local Ollama instance and streams `/api/chat` NDJSON.

use super::{channel_stream, Backend, BackendError, BackendStream, ChatMessage, StreamOptions, ToolSpec};
use crate::chunk::{ChunkUsage, DoneStatus, StreamChunk};
use async_trait::async_trait;
use std::io::{BufRead, BufReader};
use tokio::sync::mpsc;

pub(crate) const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const PROVIDER: &str = "ollama";

/// Ollama backend for local LLM inference
pub struct OllamaBackend {
    /// Base URL for Ollama API
    base_url: String,

    /// Model to use
    model: String,

    temperature: Option<f32>,
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, "llama3.2")
    }
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature: None,
        }
    }

    /// Create with default URL
    pub fn with_model(model: &str) -> Self {
        Self::new(DEFAULT_BASE_URL, model)
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
        options: &StreamOptions,
    ) -> serde_json::Value {
        let model = options.model.as_deref().unwrap_or(&self.model);
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages.iter().map(|m| {
                serde_json::json!({
                    "role": m.role_str(),
                    "content": m.content
                })
            }).collect::<Vec<_>>(),
            "stream": true
        });

        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            body["tools"] = tools.iter().map(|t| t.0.clone()).collect::<Vec<_>>().into();
        }

        let mut model_options = serde_json::Map::new();
        if let Some(temperature) = options.temperature.or(self.temperature) {
            model_options.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(max_tokens) = options.max_tokens {
            model_options.insert("num_predict".to_string(), serde_json::json!(max_tokens));
        }
        if !model_options.is_empty() {
            body["options"] = serde_json::Value::Object(model_options);
        }

        body
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSpec>>,
        options: &StreamOptions,
    ) -> Result<BackendStream, BackendError> {
        let body = self.request_body(&messages, tools.as_deref(), options);
        let url = format!("{}/api/chat", self.base_url);
        let (tx, rx) = mpsc::channel(super::CHANNEL_CAPACITY);

        std::thread::spawn(move || {
            if let Err(e) = send_ollama_request(&url, &body, &tx) {
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(channel_stream(rx))
    }

    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn calculate_cost(&self, _input_tokens: u64, _output_tokens: u64, _model: &str) -> f64 {
        0.0
    }
}

/// Send request to Ollama and stream response
fn send_ollama_request(
    url: &str,
    body: &serde_json::Value,
    tx: &mpsc::Sender<Result<StreamChunk, BackendError>>,
) -> Result<(), BackendError> {
    let response = ureq::post(url)
        .set("Content-Type", "application/json")
        .send_json(body)?;

    let reader = BufReader::new(response.into_reader());

    for line in reader.lines() {
        let line = line?;

        if line.is_empty() {
            continue;
        }

        let json: serde_json::Value = serde_json::from_str(&line)?;
        for chunk in translate_line(&json)? {
            let done = chunk.is_done();
            if tx.blocking_send(Ok(chunk)).is_err() || done {
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Map one NDJSON line to the chunks it carries
fn translate_line(json: &serde_json::Value) -> Result<Vec<StreamChunk>, BackendError> {
    if let Some(error) = json.get("error").and_then(|e| e.as_str()) {
        return Err(BackendError::Api {
            status: 500,
            message: error.to_string(),
        });
    }

    let mut chunks = Vec::new();
    let message = json.get("message");

    if let Some(content) = message
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
    {
        chunks.push(StreamChunk::content(content, PROVIDER));
    }

    if let Some(calls) = message
        .and_then(|m| m.get("tool_calls"))
        .filter(|c| c.as_array().is_some_and(|a| !a.is_empty()))
    {
        chunks.push(StreamChunk::tool_calls(calls.to_string(), PROVIDER));
    }

    if json.get("done").and_then(|v| v.as_bool()).unwrap_or(false) {
        let count = |field: &str| json.get(field).and_then(|v| v.as_u64()).unwrap_or(0);
        chunks.push(
            StreamChunk::done(DoneStatus::Completed, PROVIDER)
                .with_usage(ChunkUsage::new(count("prompt_eval_count"), count("eval_count"))),
        );
    }

    Ok(chunks)
}
