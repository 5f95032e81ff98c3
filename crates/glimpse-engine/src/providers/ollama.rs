use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use glimpse_contracts::session::Role;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use super::{truncate_text, ChatReply, ChatRequest, ModelCallFailure, VisionModel};

/// Client for the Ollama `/api/chat` endpoint, non-streaming.
pub struct OllamaProvider {
    host: String,
    http: HttpClient,
}

impl OllamaProvider {
    /// `timeout` of `None` waits as long as the server takes.
    pub fn new(host: &str, timeout: Option<Duration>) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build ollama http client")?;
        Ok(Self {
            host: host.trim().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.host)
    }
}

impl VisionModel for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn chat(&self, request: &ChatRequest) -> Result<ChatReply, ModelCallFailure> {
        let payload = chat_payload(request);
        let response = self
            .http
            .post(self.endpoint())
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .map_err(ModelCallFailure::from_reqwest)?;
        let code = response.status().as_u16();
        let body = response.text().map_err(ModelCallFailure::from_reqwest)?;
        parse_chat_response(code, &body)
    }
}

fn chat_payload(request: &ChatRequest) -> Value {
    let images: Vec<String> = request
        .images
        .iter()
        .map(|bytes| BASE64.encode(bytes))
        .collect();
    json!({
        "model": request.model,
        "messages": [{
            "role": Role::User,
            "content": request.prompt,
            "images": images,
        }],
        "stream": false,
    })
}

fn parse_chat_response(code: u16, body: &str) -> Result<ChatReply, ModelCallFailure> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let server_error = parsed
        .as_ref()
        .and_then(|value| value.get("error"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if !(200..300).contains(&code) {
        let detail = server_error
            .map(str::to_string)
            .unwrap_or_else(|| truncate_text(body.trim(), 512));
        return Err(ModelCallFailure::server(format!(
            "ollama request failed ({code}): {detail}"
        )));
    }
    if let Some(message) = server_error {
        return Err(ModelCallFailure::server(format!("ollama error: {message}")));
    }

    let Some(parsed) = parsed else {
        return Err(ModelCallFailure::decode(format!(
            "ollama returned invalid JSON payload: {}",
            truncate_text(body.trim(), 200)
        )));
    };
    let Some(text) = parsed
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
    else {
        return Err(ModelCallFailure::decode(
            "ollama response missing message.content",
        ));
    };

    Ok(ChatReply {
        text: text.to_string(),
        model: parsed
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string),
        prompt_tokens: parsed.get("prompt_eval_count").and_then(Value::as_u64),
        output_tokens: parsed.get("eval_count").and_then(Value::as_u64),
        total_duration_ns: parsed.get("total_duration").and_then(Value::as_u64),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::providers::FailureKind;

    #[test]
    fn payload_is_single_user_message_with_base64_images() {
        let request = ChatRequest {
            model: "gpt-oss:20b".to_string(),
            prompt: "What breed?".to_string(),
            images: vec![Arc::from(b"abc".to_vec())],
        };
        let payload = chat_payload(&request);
        assert_eq!(
            payload,
            json!({
                "model": "gpt-oss:20b",
                "messages": [{
                    "role": "user",
                    "content": "What breed?",
                    "images": ["YWJj"],
                }],
                "stream": false,
            })
        );
    }

    #[test]
    fn parses_successful_reply() -> anyhow::Result<()> {
        let body = json!({
            "model": "llava:7b",
            "message": {"role": "assistant", "content": "A tabby cat on a sofa."},
            "done": true,
            "prompt_eval_count": 580,
            "eval_count": 12,
            "total_duration": 1_500_000_000u64,
        })
        .to_string();
        let reply = parse_chat_response(200, &body)?;
        assert_eq!(reply.text, "A tabby cat on a sofa.");
        assert_eq!(reply.model.as_deref(), Some("llava:7b"));
        assert_eq!(reply.prompt_tokens, Some(580));
        assert_eq!(reply.output_tokens, Some(12));
        assert_eq!(reply.total_duration_ns, Some(1_500_000_000));
        Ok(())
    }

    #[test]
    fn reply_text_is_kept_verbatim() -> anyhow::Result<()> {
        let body = json!({"message": {"content": "  spaced\n"}}).to_string();
        let reply = parse_chat_response(200, &body)?;
        assert_eq!(reply.text, "  spaced\n");
        assert_eq!(reply.model, None);
        Ok(())
    }

    #[test]
    fn missing_model_is_a_server_failure() {
        let body = json!({"error": "model \"gpt-oss:20b\" not found, try pulling it first"})
            .to_string();
        let failure = parse_chat_response(404, &body)
            .err()
            .unwrap_or_else(|| ModelCallFailure::decode("unexpected success"));
        assert_eq!(failure.kind(), FailureKind::Server);
        assert_eq!(
            failure.message(),
            "ollama request failed (404): model \"gpt-oss:20b\" not found, try pulling it first"
        );
    }

    #[test]
    fn error_field_with_ok_status_is_a_failure() {
        let body = json!({"error": "image could not be decoded"}).to_string();
        let failure = parse_chat_response(200, &body)
            .err()
            .unwrap_or_else(|| ModelCallFailure::decode("unexpected success"));
        assert_eq!(failure.kind(), FailureKind::Server);
        assert_eq!(failure.message(), "ollama error: image could not be decoded");
    }

    #[test]
    fn non_json_error_body_is_truncated_into_message() {
        let failure = parse_chat_response(502, "Bad Gateway")
            .err()
            .unwrap_or_else(|| ModelCallFailure::decode("unexpected success"));
        assert_eq!(failure.message(), "ollama request failed (502): Bad Gateway");
    }

    #[test]
    fn malformed_success_bodies_are_decode_failures() {
        let failure = parse_chat_response(200, "not json")
            .err()
            .unwrap_or_else(|| ModelCallFailure::server("unexpected success"));
        assert_eq!(failure.kind(), FailureKind::Decode);

        let failure = parse_chat_response(200, "{\"done\":true}")
            .err()
            .unwrap_or_else(|| ModelCallFailure::server("unexpected success"));
        assert_eq!(failure.kind(), FailureKind::Decode);
        assert_eq!(failure.message(), "ollama response missing message.content");
    }

    #[test]
    fn unreachable_server_is_a_transport_failure() -> anyhow::Result<()> {
        // port 9 (discard) on localhost is not expected to speak HTTP
        let provider = OllamaProvider::new("http://127.0.0.1:9/", Some(Duration::from_secs(2)))?;
        assert_eq!(provider.endpoint(), "http://127.0.0.1:9/api/chat");
        let request = ChatRequest {
            model: "llava".to_string(),
            prompt: "hi".to_string(),
            images: Vec::new(),
        };
        let failure = provider
            .chat(&request)
            .err()
            .unwrap_or_else(|| ModelCallFailure::decode("unexpected success"));
        assert_eq!(failure.kind(), FailureKind::Transport);
        assert!(!failure.message().is_empty());
        Ok(())
    }
}
