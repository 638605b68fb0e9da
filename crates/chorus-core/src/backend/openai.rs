//! OpenAI backend
//!
//! Streams from OpenAI's Responses API. The HTTP call is blocking (`ureq`),
//! so it runs on a dedicated thread and forwards chunks through a bounded
//! channel; dropping the returned stream makes the worker stop at its next
//! send.

use super::pricing::{openai_cost, split_effort};
use super::{
    channel_stream, Backend, BackendError, BackendStream, ChatMessage, Role, StreamOptions,
    ToolSpec,
};
use crate::chunk::{ChunkUsage, DoneStatus, StreamChunk};
use async_trait::async_trait;
use std::io::{BufRead, BufReader};
use tokio::sync::mpsc;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const PROVIDER: &str = "openai";

/// OpenAI Responses API backend
pub struct OpenAiBackend {
    /// API key
    api_key: String,

    /// Base URL for the API (supports OpenAI-compatible APIs)
    base_url: String,

    /// Configured model, possibly with an effort suffix
    model: String,

    temperature: Option<f32>,

    max_tokens: Option<u32>,
}

impl OpenAiBackend {
    /// Create a new OpenAI backend
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.to_string(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Create using `OPENAI_API_KEY` when no key is given
    pub fn from_key_or_env(api_key: Option<&str>, model: &str) -> Result<Self, BackendError> {
        let key = match api_key.filter(|k| !k.is_empty()) {
            Some(key) => key.to_string(),
            None => std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| BackendError::MissingApiKey("OpenAI".to_string()))?,
        };
        Ok(Self::new(&key, model))
    }

    /// Create with a specific base URL (for OpenAI-compatible APIs like Azure, local proxies)
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Build the request body for the Responses API
    fn request_body(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
        options: &StreamOptions,
    ) -> serde_json::Value {
        let model = options.model.as_deref().unwrap_or(&self.model);
        let (base_model, effort) = split_effort(model);
        let reasoning_model = base_model.starts_with('o');

        let wire_model = if reasoning_model { base_model } else { model };

        let mut body = serde_json::json!({
            "model": wire_model,
            "stream": true,
        });

        // The last system message becomes the instructions
        let instructions = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());
        if let Some(instructions) = instructions.filter(|i| !i.is_empty()) {
            body["instructions"] = serde_json::json!(instructions);
        }

        body["input"] = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({ "role": m.role_str(), "content": m.content }))
            .collect::<Vec<_>>()
            .into();

        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            body["tools"] = tools.iter().map(format_tool).collect::<Vec<_>>().into();
        }

        let temperature = options.temperature.or(self.temperature);
        if let Some(temperature) = temperature.filter(|_| !reasoning_model) {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens.or(self.max_tokens) {
            body["max_output_tokens"] = serde_json::json!(max_tokens);
        }
        if reasoning_model {
            body["reasoning"] = serde_json::json!({ "effort": effort.unwrap_or("low") });
        }

        body
    }
}

/// Translate a tool descriptor into the Responses API shape
fn format_tool(tool: &ToolSpec) -> serde_json::Value {
    match tool.kind() {
        Some("code_interpreter") => {
            serde_json::json!({ "type": "code_interpreter", "container": { "type": "auto" } })
        }
        _ => tool.0.clone(),
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSpec>>,
        options: &StreamOptions,
    ) -> Result<BackendStream, BackendError> {
        if self.api_key.is_empty() {
            return Err(BackendError::MissingApiKey("OpenAI".to_string()));
        }

        let body = self.request_body(&messages, tools.as_deref(), options);
        let url = format!("{}/responses", self.base_url);
        let api_key = self.api_key.clone();
        let (tx, rx) = mpsc::channel(super::CHANNEL_CAPACITY);

        std::thread::spawn(move || {
            if let Err(e) = send_responses_request(&url, &api_key, &body, &tx) {
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

    fn calculate_cost(&self, input_tokens: u64, output_tokens: u64, model: &str) -> f64 {
        openai_cost(input_tokens, output_tokens, model)
    }
}

/// Send request to the Responses API and forward events
fn send_responses_request(
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
    tx: &mpsc::Sender<Result<StreamChunk, BackendError>>,
) -> Result<(), BackendError> {
    let response = ureq::post(url)
        .set("Content-Type", "application/json")
        .set("Authorization", &format!("Bearer {}", api_key))
        .send_json(body)?;

    let reader = BufReader::new(response.into_reader());

    for line in reader.lines() {
        let line = line?;

        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data == "[DONE]" {
            break;
        }

        let event: serde_json::Value = serde_json::from_str(data)?;
        let Some(item) = translate_event(&event) else {
            continue;
        };

        let chunk = item?;
        let done = chunk.is_done();
        if tx.blocking_send(Ok(chunk)).is_err() || done {
            break;
        }
    }

    Ok(())
}

/// Map one Responses API event to a chunk, if it carries one
fn translate_event(event: &serde_json::Value) -> Option<Result<StreamChunk, BackendError>> {
    let kind = event.get("type").and_then(|t| t.as_str())?;
    let delta = || event.get("delta").and_then(|d| d.as_str()).unwrap_or("");

    match kind {
        "response.output_text.delta" => {
            let text = delta();
            (!text.is_empty()).then(|| Ok(StreamChunk::content(text, PROVIDER)))
        }
        "response.function_call_arguments.delta" | "response.function_call_output.delta" => {
            Some(Ok(StreamChunk::tool_calls(delta(), PROVIDER)))
        }
        "response.completed" => {
            let usage = event.get("response").and_then(|r| r.get("usage"));
            let count = |field: &str| {
                usage
                    .and_then(|u| u.get(field))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0)
            };
            Some(Ok(StreamChunk::done(DoneStatus::Completed, PROVIDER).with_usage(
                ChunkUsage::new(count("input_tokens"), count("output_tokens")),
            )))
        }
        "response.failed" | "error" => {
            let message = event
                .get("response")
                .and_then(|r| r.get("error"))
                .or_else(|| event.get("error"))
                .and_then(|e| e.get("message"))
                .or_else(|| event.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error");
            Some(Err(BackendError::Api {
                status: 500,
                message: message.to_string(),
            }))
        }
        _ => None,
    }
}
