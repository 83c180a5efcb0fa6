//! `OpenAI` chat-completions provider implementation

use super::types::{
    ContentBlock, LlmMessage, LlmRequest, LlmResponse, MessageRole, ToolDefinition, Usage,
};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";

/// `OpenAI`-compatible service implementation
pub struct OpenAiService {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiService {
    pub fn new(api_key: String, model: String, base_url: Option<&str>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            model,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).to_string(),
        }
    }

    fn translate_request(&self, request: &LlmRequest) -> WireRequest {
        let mut messages = vec![WireMessage {
            role: "system".to_string(),
            content: Some(request.system.clone()),
            tool_calls: None,
            tool_call_id: None,
        }];

        for msg in &request.messages {
            messages.extend(translate_message(msg));
        }

        WireRequest {
            model: self.model.clone(),
            messages,
            tools: translate_tools(&request.tools),
            max_tokens: request.max_tokens,
        }
    }
}

/// Translate one normalized message to wire form. Returns a Vec because
/// tool results become separate messages with role "tool".
fn translate_message(msg: &LlmMessage) -> Vec<WireMessage> {
    let role = match msg.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    };

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for block in &msg.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text.clone()),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(WireToolCall {
                    id: id.clone(),
                    r#type: "function".to_string(),
                    function: WireFunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => tool_results.push((tool_use_id.clone(), content.clone(), *is_error)),
        }
    }

    let mut messages = Vec::new();

    if !text_parts.is_empty() || !tool_calls.is_empty() {
        messages.push(WireMessage {
            role: role.to_string(),
            content: if text_parts.is_empty() {
                None
            } else {
                Some(text_parts.join("\n"))
            },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        });
    }

    for (tool_use_id, content, is_error) in tool_results {
        messages.push(WireMessage {
            role: "tool".to_string(),
            content: Some(if is_error {
                format!("Error: {content}")
            } else {
                content
            }),
            tool_calls: None,
            tool_call_id: Some(tool_use_id),
        });
    }

    messages
}

fn translate_tools(tools: &[ToolDefinition]) -> Option<Vec<WireTool>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| WireTool {
                r#type: "function".to_string(),
                function: WireFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect(),
    )
}

fn normalize_response(resp: WireResponse) -> Result<LlmResponse, LlmError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::unknown("No choices in response"))?;

    let mut content = Vec::new();

    if let Some(text) = choice.message.content {
        if !text.is_empty() {
            content.push(ContentBlock::Text { text });
        }
    }

    if let Some(tool_calls) = choice.message.tool_calls {
        for tc in tool_calls {
            if tc.function.name.is_empty() {
                continue;
            }
            let input = serde_json::from_str(&tc.function.arguments)
                .unwrap_or_else(|_| serde_json::json!({}));
            content.push(ContentBlock::ToolUse {
                id: tc.id,
                name: tc.function.name,
                input,
            });
        }
    }

    Ok(LlmResponse {
        content,
        usage: Usage {
            input_tokens: u64::from(resp.usage.prompt_tokens),
            output_tokens: u64::from(resp.usage.completion_tokens),
        },
    })
}

#[async_trait]
impl LlmService for OpenAiService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let wire_request = self.translate_request(request);
        let start = std::time::Instant::now();

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&wire_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<WireErrorResponse>(&body)
                .map_or(body, |err| err.error.message);
            return Err(match status.as_u16() {
                401 | 403 => LlmError::auth(format!("Authentication failed: {message}")),
                429 => LlmError::rate_limit(format!("Rate limit exceeded: {message}")),
                400 => LlmError::invalid_request(format!("Invalid request: {message}")),
                500..=599 => LlmError::server_error(format!("Server error: {message}")),
                _ => LlmError::unknown(format!("HTTP {status}: {message}")),
            });
        }

        let wire_response: WireResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        let normalized = normalize_response(wire_response)?;
        tracing::info!(
            model = %self.model,
            duration_ms = %start.elapsed().as_millis(),
            input_tokens = normalized.usage.input_tokens,
            output_tokens = normalized.usage.output_tokens,
            tool_calls = normalized.tool_uses().len(),
            "LLM request completed"
        );
        Ok(normalized)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// Wire types (chat-completions API)

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_results_become_tool_role_messages() {
        let msg = LlmMessage::user(vec![ContentBlock::tool_result(
            "call-1",
            "new_user",
            false,
        )]);

        let wire = translate_message(&msg);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "tool");
        assert_eq!(wire[0].tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(wire[0].content.as_deref(), Some("new_user"));
    }

    #[test]
    fn test_error_tool_results_are_prefixed() {
        let msg = LlmMessage::user(vec![ContentBlock::tool_result(
            "call-2",
            "no active commitment",
            true,
        )]);

        let wire = translate_message(&msg);
        assert_eq!(wire[0].content.as_deref(), Some("Error: no active commitment"));
    }

    #[test]
    fn test_assistant_text_and_tool_call_share_one_message() {
        let msg = LlmMessage::assistant(vec![
            ContentBlock::text("Let me check."),
            ContentBlock::tool_use("call-3", "get_account_status", serde_json::json!({})),
        ]);

        let wire = translate_message(&msg);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "assistant");
        assert!(wire[0].content.is_some());
        assert_eq!(wire[0].tool_calls.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_normalize_parses_tool_call_arguments() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call-4",
                        "type": "function",
                        "function": {
                            "name": "update_account_name",
                            "arguments": "{\"name\":\"Alex\"}"
                        }
                    }]
                }
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5 }
        });

        let wire: WireResponse = serde_json::from_value(body).unwrap();
        let resp = normalize_response(wire).unwrap();

        let uses = resp.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].1, "update_account_name");
        assert_eq!(uses[0].2["name"], "Alex");
    }

    #[test]
    fn test_normalize_without_choices_is_an_error() {
        let wire: WireResponse = serde_json::from_value(serde_json::json!({
            "choices": [],
            "usage": { "prompt_tokens": 0, "completion_tokens": 0 }
        }))
        .unwrap();
        assert!(normalize_response(wire).is_err());
    }
}
