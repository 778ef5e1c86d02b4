use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::ServiceError;
use crate::reasoning::ReasoningService;

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn generate_text(
        &self,
        model: &str,
        prompt: &str,
        num_predict: usize,
        temperature: f32,
    ) -> Result<String, ServiceError> {
        #[derive(Serialize)]
        struct GenerateReq<'a> {
            model: &'a str,
            prompt: &'a str,
            stream: bool,
            options: GenerateOptions,
        }

        #[derive(Serialize)]
        struct GenerateOptions {
            num_predict: usize,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct GenerateResp {
            response: String,
        }

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&GenerateReq {
                model,
                prompt,
                stream: false,
                options: GenerateOptions {
                    num_predict,
                    temperature,
                },
            })
            .send()
            .await
            .map_err(|err| ServiceError::Service(format!("failed to call ollama generate: {err}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let response = response.json::<GenerateResp>().await.map_err(|err| {
            ServiceError::Service(format!("failed to decode ollama generate response: {err}"))
        })?;

        Ok(response.response.trim().to_string())
    }
}

/// Binds a client to one model so it can serve as the pipeline's reasoning
/// service.
#[derive(Clone)]
pub struct OllamaReasoner {
    client: OllamaClient,
    model: String,
    num_predict: usize,
    temperature: f32,
}

impl OllamaReasoner {
    pub fn new(client: OllamaClient, config: &ModelConfig) -> Self {
        Self {
            client,
            model: config.reasoning_model.clone(),
            num_predict: config.max_output_tokens,
            temperature: config.temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ReasoningService for OllamaReasoner {
    async fn evaluate(&self, prompt: &str) -> Result<String, ServiceError> {
        self.client
            .generate_text(&self.model, prompt, self.num_predict, self.temperature)
            .await
    }
}

fn classify_failure(status: StatusCode, body: &str) -> ServiceError {
    let detail = format!("ollama /api/generate returned {status}: {}", normalize_err_body(body));
    if status == StatusCode::TOO_MANY_REQUESTS || is_rate_limit_message(body) {
        ServiceError::RateLimited(detail)
    } else {
        ServiceError::Service(detail)
    }
}

fn is_rate_limit_message(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("too many requests")
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json.get("error").and_then(|v| v.as_str()) {
            return err.to_string();
        }
    }

    trimmed.to_string()
}
