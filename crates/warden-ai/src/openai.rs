use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{
    retry::{is_retryable_http_error, parse_retry_after_ms, retry_delay_ms, should_retry_status},
    types::{
        extract_tool_invocation, ChatRequest, Message, ModelClient, ModelTurn, ProviderError,
        StreamDeltaHandler, TOOL_END_MARKER,
    },
};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
}

/// Chat-completions client for OpenAI-compatible servers (LM Studio, vLLM,
/// the hosted API). Tool use rides in the message text via the invocation
/// markers, so requests carry the end marker as a stop sequence instead of a
/// native tool schema.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiCompatibleClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|e| {
                ProviderError::InvalidResponse(format!("invalid API key header: {e}"))
            })?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }

        format!("{base}/chat/completions")
    }

    async fn complete_text(
        &self,
        request: &ChatRequest,
        on_delta: Option<&StreamDeltaHandler>,
    ) -> Result<String, ProviderError> {
        let mut body = build_chat_request_body(request);
        if on_delta.is_some() {
            body["stream"] = json!(true);
        }
        let url = self.chat_completions_url();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            let response = self
                .client
                .post(&url)
                .header("x-warden-retry-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        if let Some(delta_handler) = on_delta {
                            let is_event_stream = response
                                .headers()
                                .get(CONTENT_TYPE)
                                .and_then(|value| value.to_str().ok())
                                .map(|value| {
                                    value.to_ascii_lowercase().contains("text/event-stream")
                                })
                                .unwrap_or(false);
                            if is_event_stream {
                                return parse_chat_stream_response(response, delta_handler).await;
                            }

                            // Some servers answer a stream request with a
                            // plain body; surface it as one delta.
                            let raw = response.text().await?;
                            let text = parse_chat_response(&raw)?;
                            if !text.is_empty() {
                                delta_handler(text.clone());
                            }
                            return Ok(text);
                        }
                        let raw = response.text().await?;
                        return parse_chat_response(&raw);
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await?;
                    if attempt < max_retries && should_retry_status(status.as_u16()) {
                        let delay_ms = retry_delay_ms(attempt, retry_after_ms);
                        sleep(std::time::Duration::from_millis(delay_ms)).await;
                        continue;
                    }

                    return Err(ProviderError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_http_error(&error) {
                        let delay_ms = retry_delay_ms(attempt, None);
                        sleep(std::time::Duration::from_millis(delay_ms)).await;
                        continue;
                    }
                    return Err(ProviderError::Http(error));
                }
            }
        }

        Err(ProviderError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    fn prepare_request(&self, history: &[Message]) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: history.to_vec(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stop: vec![TOOL_END_MARKER.to_string()],
        }
    }

    async fn stream_turn(
        &self,
        request: ChatRequest,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ModelTurn, ProviderError> {
        let full_text = self.complete_text(&request, on_delta.as_ref()).await?;
        let (text, tool_payload) = extract_tool_invocation(&full_text);
        Ok(ModelTurn { text, tool_payload })
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages,
    });

    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if !request.stop.is_empty() {
        body["stop"] = json!(request.stop);
    }

    body
}

fn parse_chat_response(raw: &str) -> Result<String, ProviderError> {
    let parsed: OpenAiChatResponse = serde_json::from_str(raw)?;
    let choice =
        parsed.choices.into_iter().next().ok_or_else(|| {
            ProviderError::InvalidResponse("response contained no choices".to_string())
        })?;

    Ok(choice.message.content.unwrap_or_default())
}

async fn parse_chat_stream_response(
    response: reqwest::Response,
    on_delta: &StreamDeltaHandler,
) -> Result<String, ProviderError> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut text = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let fragment = std::str::from_utf8(chunk.as_ref()).map_err(|error| {
            ProviderError::InvalidResponse(format!("invalid UTF-8 in streaming response: {error}"))
        })?;
        buffer.push_str(fragment);

        while let Some(pos) = buffer.find('\n') {
            let line = buffer[..pos].trim().to_string();
            buffer.drain(..=pos);
            if line.is_empty() {
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data == "[DONE]" {
                    return Ok(text);
                }
                apply_stream_data(data, on_delta, &mut text)?;
            }
        }
    }

    let trailing = buffer.trim();
    if !trailing.is_empty() {
        if let Some(data) = trailing.strip_prefix("data:") {
            let data = data.trim();
            if data != "[DONE]" {
                apply_stream_data(data, on_delta, &mut text)?;
            }
        }
    }

    Ok(text)
}

fn apply_stream_data(
    data: &str,
    on_delta: &StreamDeltaHandler,
    text: &mut String,
) -> Result<(), ProviderError> {
    let chunk: OpenAiStreamChunk = serde_json::from_str(data).map_err(|error| {
        ProviderError::InvalidResponse(format!("failed to parse stream chunk: {error}"))
    })?;

    for choice in chunk.choices {
        let Some(delta) = choice.delta else {
            continue;
        };
        if let Some(delta_text) = delta.content {
            if !delta_text.is_empty() {
                text.push_str(&delta_text);
                on_delta(delta_text);
            }
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: Option<OpenAiStreamDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}
