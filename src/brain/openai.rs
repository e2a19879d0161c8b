use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde_json::{Value, json};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    AppChoice, CompletionJudge, DecisionOracle, Proposal, ProposalRequest, ReflectionRequest,
    ReflectionResponse, parse_app_choice, parse_proposal, parse_reflection, prompt,
};
use crate::config::OracleConfig;
use crate::error::OracleError;
use crate::types::{ChatMessage, Role};

/// Multimodal chat-completions client implementing both oracle roles.
pub struct OpenAiOracle {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiOracle {
    pub fn new(config: &OracleConfig, api_key: impl Into<String>) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                config.api_base.trim_end_matches('/')
            ),
            api_key: api_key.into(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// User message made of a text part followed by inline base64 images.
    async fn multimodal_message(text: &str, images: &[&Path]) -> Result<Value, OracleError> {
        let mut content = vec![json!({"type": "text", "text": text})];
        for path in images {
            let bytes = tokio::fs::read(path).await.map_err(|source| OracleError::Image {
                path: path.to_path_buf(),
                source,
            })?;
            content.push(json!({
                "type": "image_url",
                "image_url": {"url": format!("data:image/png;base64,{}", STANDARD.encode(bytes))},
            }));
        }
        Ok(json!({"role": "user", "content": content}))
    }

    async fn complete(&self, messages: Vec<Value>, structured: bool) -> Result<String, OracleError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if structured {
            body["response_format"] = json!({"type": "json_object"});
        }

        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let json_resp: Value = response.json().await?;

        if !status.is_success() {
            let message = json_resp["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error")
                .to_string();
            warn!(status = status.as_u16(), %message, "oracle API error");
            return Err(OracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let content = json_resp["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| OracleError::Malformed(format!("no content in response: {json_resp}")))?;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "oracle replied: {content}"
        );
        Ok(content.to_string())
    }
}

#[async_trait]
impl DecisionOracle for OpenAiOracle {
    async fn propose_next_action(
        &self,
        request: &ProposalRequest<'_>,
    ) -> Result<Proposal, OracleError> {
        let text = prompt::explore(request.task, request.last_summary);
        let message = Self::multimodal_message(&text, &[request.screenshot]).await?;
        let raw = self.complete(vec![message], true).await?;
        let proposal = parse_proposal(&raw)?;
        info!(action = %proposal.action, "oracle proposed action");
        Ok(proposal)
    }

    async fn reflect_on_action(
        &self,
        request: &ReflectionRequest<'_>,
    ) -> Result<ReflectionResponse, OracleError> {
        let text = prompt::reflect(request.action, request.task, request.last_summary);
        let message = Self::multimodal_message(&text, &[request.before, request.after]).await?;
        let raw = self.complete(vec![message], true).await?;
        let reflection = parse_reflection(&raw)?;
        info!(verdict = %reflection.verdict, "oracle reflected on previous action");
        Ok(reflection)
    }

    async fn choose_app(&self, task: &str, apps: &[String]) -> Result<AppChoice, OracleError> {
        let message = json!({"role": "user", "content": prompt::launch(task, apps)});
        let raw = self.complete(vec![message], true).await?;
        parse_app_choice(&raw)
    }
}

#[async_trait]
impl CompletionJudge for OpenAiOracle {
    async fn judge(&self, transcript: &[ChatMessage]) -> Result<String, OracleError> {
        let mut messages: Vec<Value> = transcript
            .iter()
            .map(|m| json!({"role": role_name(m.role), "content": m.content}))
            .collect();
        messages.push(json!({"role": "system", "content": prompt::COMPLETION_PROMPT}));
        self.complete(messages, false).await
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_multimodal_message_with_inline_images() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("1_before_labeled.png");
        std::fs::write(&img, b"png-bytes").unwrap();

        let msg = OpenAiOracle::multimodal_message("look", &[img.as_path()])
            .await
            .unwrap();
        assert_eq!(msg["content"][0]["text"], "look");
        let url = msg["content"][1]["image_url"]["url"].as_str().unwrap();
        assert_eq!(
            url,
            format!("data:image/png;base64,{}", STANDARD.encode(b"png-bytes"))
        );
    }

    #[tokio::test]
    async fn missing_image_is_reported() {
        let err = OpenAiOracle::multimodal_message("look", &[Path::new("/nonexistent.png")])
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Image { .. }));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let config = OracleConfig {
            api_base: "https://example.test/v1/".into(),
            ..OracleConfig::default()
        };
        let oracle = OpenAiOracle::new(&config, "key").unwrap();
        assert_eq!(oracle.endpoint, "https://example.test/v1/chat/completions");
    }
}
