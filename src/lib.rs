pub mod assembler;
pub mod batcher;
pub mod chunker;
pub mod config;
pub mod corpus;
pub mod error;
pub mod models;
pub mod ollama;
pub mod pipeline;
pub mod provenance;
pub mod reasoning;
pub mod scheduler;
pub mod summarizer;
pub mod tokenizer;

pub use config::{AppConfig, PipelineConfig};
pub use error::{CorpusError, PipelineError, ServiceError};
pub use pipeline::AuditPipeline;
pub use reasoning::ReasoningService;
