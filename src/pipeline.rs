use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument;
use uuid::Uuid;

use crate::assembler::assemble;
use crate::batcher::batch_texts;
use crate::chunker::{Chunker, PageLocator, PrefixLocator};
use crate::config::PipelineConfig;
use crate::corpus::PageCorpusProvider;
use crate::error::PipelineError;
use crate::models::{AuditReport, Chunk, ConfidenceTally, Page};
use crate::provenance::check_report;
use crate::reasoning::{CancelSignal, ReasoningService, RetryPolicy};
use crate::scheduler::EvaluationScheduler;
use crate::summarizer::{HierarchicalSummarizer, ReportPrompts};

/// Chunk, evaluate, order, batch and reduce one document. Holds no state
/// between runs.
pub struct AuditPipeline {
    config: PipelineConfig,
    chunker: Chunker,
    scheduler: EvaluationScheduler,
    summarizer: HierarchicalSummarizer,
}

impl AuditPipeline {
    pub fn new(
        config: PipelineConfig,
        service: Arc<dyn ReasoningService>,
    ) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;

        let retry = RetryPolicy::from_config(&config);
        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap)
            .with_locator(Box::new(PrefixLocator::new(config.page_prefix_chars)));
        let scheduler = EvaluationScheduler::new(service.clone(), config.concurrency, retry.clone());
        let summarizer = HierarchicalSummarizer::new(service, retry);

        Ok(Self {
            config,
            chunker,
            scheduler,
            summarizer,
        })
    }

    pub fn with_locator(mut self, locator: Box<dyn PageLocator>) -> Self {
        self.chunker = self.chunker.with_locator(locator);
        self
    }

    pub fn with_prompts(mut self, prompts: ReportPrompts) -> Self {
        self.summarizer = self.summarizer.with_prompts(prompts);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run_document(
        &self,
        provider: &dyn PageCorpusProvider,
        path: &Path,
        cancel: &CancelSignal,
    ) -> Result<AuditReport, PipelineError> {
        let pages = provider.extract_pages(path).await?;
        self.run_pages(&pages, cancel).await
    }

    pub async fn run_pages(
        &self,
        pages: &[Page],
        cancel: &CancelSignal,
    ) -> Result<AuditReport, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("audit", run_id = %run_id);

        self.run_inner(run_id.clone(), pages, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: String,
        pages: &[Page],
        cancel: &CancelSignal,
    ) -> Result<AuditReport, PipelineError> {
        let chunks: Vec<Chunk> = self.chunker.chunks(pages).collect();
        let chunk_count = chunks.len();
        tracing::info!(pages = pages.len(), chunks = chunk_count, "document chunked");

        let outcome = self.scheduler.run(chunks, cancel).await;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let evaluated_count = outcome.results.len();
        let assembled = assemble(outcome.results);
        let discarded_count = evaluated_count - assembled.len();
        if discarded_count > 0 {
            tracing::info!(
                discarded = discarded_count,
                "dropped evaluations without supporting context"
            );
        }

        if assembled.is_empty() {
            return Err(PipelineError::NoEvaluations {
                failed: outcome.failures.len(),
            });
        }

        let confidence = ConfidenceTally::from_results(&assembled);
        tracing::info!(
            high = confidence.high,
            medium = confidence.medium,
            low = confidence.low,
            unknown = confidence.unknown,
            "evaluation confidence"
        );

        let evaluated_pages: BTreeSet<u32> =
            assembled.iter().filter_map(|result| result.page).collect();
        let texts: Vec<String> = assembled.iter().map(|result| result.render()).collect();
        let batches = batch_texts(&texts, self.config.token_budget);
        tracing::info!(
            evaluations = texts.len(),
            batches = batches.len(),
            budget = self.config.token_budget,
            "evaluations batched"
        );

        let summaries = self.summarizer.reduce_batches(&batches, cancel).await?;
        let report = self.summarizer.final_reduce(&summaries, cancel).await?;

        let provenance = check_report(&report.text, &evaluated_pages);
        if !provenance.fabricated_pages.is_empty() {
            tracing::warn!(
                pages = ?provenance.fabricated_pages,
                "report cites pages that were never evaluated"
            );
        }
        if provenance.uses_various {
            tracing::warn!("report groups findings under a \"Various\" placeholder");
        }

        Ok(AuditReport {
            run_id,
            generated_at: Utc::now(),
            report,
            chunk_count,
            evaluated_count,
            discarded_count,
            batch_count: batches.len(),
            confidence,
            summaries,
            failures: outcome.failures,
            provenance,
        })
    }
}
