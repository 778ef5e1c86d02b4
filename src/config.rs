use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub ollama_base_url: String,
    pub reasoning_model: String,
    pub temperature: f32,
    pub max_output_tokens: usize,
}

/// Tunables for one audit run. Token counts use the whitespace tokenizer in
/// [`crate::tokenizer`].
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub concurrency: usize,
    pub token_budget: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub call_timeout: Duration,
    pub page_prefix_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            chunk_overlap: 50,
            concurrency: 5,
            token_budget: 12_000,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            call_timeout: Duration::from_secs(120),
            page_prefix_chars: 20,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk size must be at least one token".to_string());
        }
        if self.concurrency == 0 {
            return Err("concurrency limit must be at least 1".to_string());
        }
        if self.token_budget == 0 {
            return Err("token budget must be at least one token".to_string());
        }
        if self.max_attempts == 0 {
            return Err("retry attempt count must be at least 1".to_string());
        }
        if self.page_prefix_chars == 0 {
            return Err("page match prefix must be at least one character".to_string());
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub models: ModelConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = PipelineConfig::default();

        Self {
            models: ModelConfig {
                ollama_base_url: env::var("OLLAMA_BASE_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
                reasoning_model: env::var("REASONING_MODEL")
                    .unwrap_or_else(|_| "qwen2.5:14b-instruct".to_string()),
                temperature: env_parse("REASONING_TEMPERATURE").unwrap_or(0.3),
                max_output_tokens: env_parse("MAX_OUTPUT_TOKENS").unwrap_or(1_500),
            },
            pipeline: PipelineConfig {
                chunk_size: env_parse("CHUNK_SIZE_TOKENS").unwrap_or(defaults.chunk_size),
                chunk_overlap: env_parse("CHUNK_OVERLAP_TOKENS").unwrap_or(defaults.chunk_overlap),
                concurrency: env_parse("EVAL_CONCURRENCY").unwrap_or(defaults.concurrency),
                token_budget: env_parse("BATCH_TOKEN_BUDGET").unwrap_or(defaults.token_budget),
                max_attempts: env_parse("EVAL_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
                backoff_base: env_parse("EVAL_BACKOFF_BASE_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff_base),
                call_timeout: env_parse("EVAL_CALL_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.call_timeout),
                page_prefix_chars: env_parse("PAGE_PREFIX_CHARS")
                    .unwrap_or(defaults.page_prefix_chars),
            },
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
