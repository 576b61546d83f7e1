//! LLM-backed booking automation
//!
//! Sends the task payload to an OpenAI-compatible chat completions endpoint
//! and parses the reply as an [`AutomationOutput`]. The JSON schema of the
//! expected reply is generated from the type and placed in the system prompt.

use std::sync::LazyLock;

use async_trait::async_trait;
use orchestration::{AutomationError, AutomationOutput, AutomationService, Task, TaskKind};
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmEndpoint;
use crate::AgentsError;

/// Extracts the body of a fenced code block (```json ... ```).
static FENCED_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("FENCED_JSON_RE regex should compile")
});

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Booking automation that asks a language model for the proposal
pub struct LlmBookingAgent {
    http: reqwest::Client,
    endpoint: LlmEndpoint,
    output_schema: String,
}

impl LlmBookingAgent {
    pub fn new(endpoint: LlmEndpoint) -> Result<Self, AgentsError> {
        let http = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| AgentsError::Http(e.to_string()))?;
        let schema = schemars::schema_for!(AutomationOutput);
        let output_schema = serde_json::to_string_pretty(&schema)
            .map_err(|e| AgentsError::Schema(e.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            output_schema,
        })
    }

    fn system_prompt(&self, kind: TaskKind) -> String {
        let job = match kind {
            TaskKind::AnalyzeInvoice => {
                "Read the invoice below and propose the double-entry booking for it. \
                 Extract vendor or customer name, invoice number, invoice date and due date \
                 into `fields`, and state net, tax and gross amounts exactly as printed."
            }
            TaskKind::MatchBankTransaction => {
                "Read the bank transaction below and propose the booking that reconciles it. \
                 Extract booking date, counterparty and reference into `fields`."
            }
        };
        format!(
            "You are a careful bookkeeping assistant.\n{}\n\n\
             Report `signals.self_reported` as your honest certainty between 0.0 and 1.0, \
             and `signals.text_quality` only if the document states an OCR confidence.\n\
             Reply with a single JSON object matching this schema and nothing else:\n{}",
            job, self.output_schema
        )
    }

    fn user_prompt(task: &Task) -> String {
        let document = serde_json::to_string_pretty(&task.payload)
            .unwrap_or_else(|_| task.payload.to_string());
        format!(
            "tenant_id: {}\nsource_ref: {}\n\nDocument:\n{}",
            task.tenant_id,
            task.source_ref().unwrap_or_default(),
            document
        )
    }

    async fn complete(&self, system: String, user: String) -> Result<String, AutomationError> {
        let request = ChatRequest {
            model: self.endpoint.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            max_tokens: self.endpoint.max_tokens,
            temperature: self.endpoint.temperature,
        };

        let mut builder = self.http.post(self.endpoint.completions_url()).json(&request);
        if let Some(key) = &self.endpoint.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AutomationError::Transient(format!("Malformed completion: {}", e)))?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AutomationError::Transient("Empty completion".to_string()))
    }
}

#[async_trait]
impl AutomationService for LlmBookingAgent {
    fn name(&self) -> &str {
        "llm_booking"
    }

    async fn run(&self, task: &Task) -> Result<AutomationOutput, AutomationError> {
        let system = self.system_prompt(task.kind);
        let user = Self::user_prompt(task);
        debug!(task_id = %task.id, model = %self.endpoint.model, "Requesting booking proposal");

        let content = self.complete(system, user).await?;
        parse_output(&content).inspect_err(|e| {
            warn!(task_id = %task.id, error = %e, "Model reply is not a booking proposal");
        })
    }
}

/// Parse a model reply, tolerating a surrounding code fence
pub fn parse_output(content: &str) -> Result<AutomationOutput, AutomationError> {
    let json = FENCED_JSON_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| content.trim());
    serde_json::from_str(json)
        .map_err(|e| AutomationError::Permanent(format!("Unparseable booking proposal: {}", e)))
}

/// 408, 429 and server errors are worth retrying; other statuses are not
pub fn classify_status(status: StatusCode, body: &str) -> AutomationError {
    let message = format!("HTTP {}: {}", status, body);
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        AutomationError::Transient(message)
    } else {
        AutomationError::Permanent(message)
    }
}

fn request_error(e: reqwest::Error) -> AutomationError {
    if e.is_builder() {
        AutomationError::Permanent(e.to_string())
    } else {
        AutomationError::Transient(e.to_string())
    }
}
