//! Fans chunk evaluations out over a fixed-size worker pool.
//!
//! At most `concurrency` workers exist, and each runs one reasoning call at a
//! time, so the pool size is the in-flight ceiling. Results come back in
//! completion order.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::error::ServiceError;
use crate::models::{page_label, Chunk, ChunkFailure, EvaluationResult};
use crate::reasoning::{call_with_retry, CancelSignal, ReasoningService, RetryPolicy};

#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    pub results: Vec<EvaluationResult>,
    pub failures: Vec<ChunkFailure>,
}

type JobQueue = Arc<Mutex<mpsc::UnboundedReceiver<Chunk>>>;
type ChunkOutcome = Result<EvaluationResult, ChunkFailure>;

#[derive(Clone)]
pub struct EvaluationScheduler {
    service: Arc<dyn ReasoningService>,
    concurrency: usize,
    retry: RetryPolicy,
}

impl EvaluationScheduler {
    pub fn new(service: Arc<dyn ReasoningService>, concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            service,
            concurrency: concurrency.max(1),
            retry,
        }
    }

    pub async fn run<I>(&self, chunks: I, cancel: &CancelSignal) -> ScheduleOutcome
    where
        I: IntoIterator<Item = Chunk>,
    {
        let chunks: Vec<Chunk> = chunks.into_iter().collect();
        if chunks.is_empty() {
            return ScheduleOutcome::default();
        }

        let worker_count = self.concurrency.min(chunks.len());
        let (job_tx, job_rx) = mpsc::unbounded_channel::<Chunk>();
        let jobs: JobQueue = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<ChunkOutcome>();

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(worker_loop(
                worker_id,
                jobs.clone(),
                result_tx.clone(),
                self.service.clone(),
                self.retry.clone(),
                cancel.clone(),
            ));
        }
        drop(result_tx);

        let submitted = chunks.len();
        for chunk in chunks {
            if job_tx.send(chunk).is_err() {
                break;
            }
        }
        drop(job_tx);

        tracing::info!(chunks = submitted, workers = worker_count, "evaluating chunks");

        let mut outcome = ScheduleOutcome::default();
        while let Some(result) = result_rx.recv().await {
            match result {
                Ok(evaluation) => outcome.results.push(evaluation),
                Err(failure) => outcome.failures.push(failure),
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!("evaluation worker aborted: {err}");
            }
        }

        tracing::info!(
            evaluated = outcome.results.len(),
            failed = outcome.failures.len(),
            "chunk evaluation finished"
        );
        outcome
    }
}

async fn worker_loop(
    worker_id: usize,
    jobs: JobQueue,
    results: mpsc::UnboundedSender<ChunkOutcome>,
    service: Arc<dyn ReasoningService>,
    retry: RetryPolicy,
    cancel: CancelSignal,
) {
    loop {
        let next = jobs.lock().await.recv().await;
        let Some(chunk) = next else {
            break;
        };

        tracing::debug!(worker = worker_id, chunk = chunk.index, "picked up chunk");
        // A panicking service fails only the chunk it was given.
        let job = {
            let service = service.clone();
            let retry = retry.clone();
            let cancel = cancel.clone();
            let chunk = chunk.clone();
            tokio::spawn(async move {
                evaluate_chunk(service.as_ref(), &chunk, &retry, &cancel).await
            })
        };

        let outcome = match job.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    worker = worker_id,
                    chunk = chunk.index,
                    "evaluation task aborted: {err}"
                );
                Err(ChunkFailure {
                    chunk_index: chunk.index,
                    page: chunk.source_page,
                    attempts: 1,
                    error: ServiceError::Service(format!("evaluation task aborted: {err}")),
                })
            }
        };
        if results.send(outcome).is_err() {
            break;
        }
    }
}

async fn evaluate_chunk(
    service: &dyn ReasoningService,
    chunk: &Chunk,
    retry: &RetryPolicy,
    cancel: &CancelSignal,
) -> ChunkOutcome {
    let prompt = build_evaluation_prompt(chunk);

    match call_with_retry(service, &prompt, retry, cancel).await {
        Ok(raw) => Ok(EvaluationResult::parse(chunk, &raw)),
        Err(failed) => {
            if failed.error != ServiceError::Cancelled {
                tracing::warn!(
                    chunk = chunk.index,
                    page = %page_label(chunk.source_page),
                    attempts = failed.attempts,
                    "chunk evaluation failed: {}",
                    failed.error
                );
            }
            Err(ChunkFailure {
                chunk_index: chunk.index,
                page: chunk.source_page,
                attempts: failed.attempts,
                error: failed.error,
            })
        }
    }
}

pub fn build_evaluation_prompt(chunk: &Chunk) -> String {
    format!(
        r#"This is a section from a company policy or ESG report:

Page {page} - {section}

---
{text}
---

Please evaluate this content for ESG compliance:

Strengths:
- Identify specific ESG best practices or frameworks followed.
- Mention any clear alignment with industry standards (e.g., GRI, TCFD, SASB).

Gaps:
- Highlight missing disclosures, vague language, or absent metrics.
- Identify inconsistencies or areas lacking transparency.

Recommendations:
- Provide actionable, evidence-based improvements.
- Suggest how the company can close each identified gap.

**Standards Referenced:**
- List any ESG standards, frameworks, or regulations cited or clearly implied (e.g., GRI, SASB, TCFD, UN SDGs, CDP, ISO 26000).
- If none are mentioned, state: "No specific standards referenced."

Supporting Quote:
- Include one short quote from the section that supports a key finding. Wrap it in quotes.

Confidence Level:
- Conclude with: Confidence Level: High / Medium / Low
- This reflects how well the content's clarity, completeness and level of detail support your conclusions.

Return a professional and structured assessment in full sentences."#,
        page = page_label(chunk.source_page),
        section = chunk.section_title,
        text = chunk.text,
    )
}
