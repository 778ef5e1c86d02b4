//! Two-stage reduction of page-ordered evaluations into one report.
//!
//! Stage one condenses each batch, stage two merges every intermediate summary
//! into the fixed report layout. Either stage failing fails the run.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::{AggregationStage, PipelineError, ServiceError};
use crate::models::{sanitize_model_output, Batch, FinalReport, IntermediateSummary};
use crate::provenance::missing_citations;
use crate::reasoning::{call_with_retry, CancelSignal, FailedCall, ReasoningService, RetryPolicy};

const INPUT_PLACEHOLDER: &str = "{input}";

static NO_STANDARDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(?:\*\*)?standards referenced(?:\*\*)?\s*:\s*(?:\*\*)?\s*(?:[-–—•*]\s*)?"?no specific standards referenced\.?"?\s*"#,
    )
    .expect("valid boilerplate regex")
});

const BATCH_PROMPT: &str = r#"You are an ESG compliance auditor.

You will receive multiple section-wise evaluations with page numbers and section titles.

Retain the references (e.g., [Page 12, Governance Overview]) in your summary.

Do not invent or generalize page numbers.

{input}"#;

const FINAL_PROMPT: &str = r#"You are an ESG compliance auditor.

You are provided with evaluations for various sections of a corporate ESG document.
Each section includes a page number and a section title in this format: `[Page X] Section Title`.

Your task is to write a **comprehensive compliance report** with the following structure:

---

**Strengths:**
- Summarize strengths across all sections, referencing specific pages and section titles where applicable. Example: (Page 5, Executive Summary)

**Compliance Gaps:**
- For each gap, include the precise reference from the original input (e.g., Page 12, Risk Management Section).
- Do not group gaps under "Various"; preserve their source location.
- Avoid repeating the same issue without a unique reference.

**Recommendations:**
- Match each recommendation to a corresponding gap, and reference the same page/section title as noted.
- Ensure recommendations are specific and evidence-based.

**Standards Referenced:**
- List any ESG standards, frameworks, or regulations cited or clearly implied (e.g., GRI, SASB, TCFD, UN SDGs, CDP, ISO 26000).
- If none are mentioned, state: "No specific standards referenced."

**Supporting Quote(s):**
- Include up to 3 direct quotes from the evaluations, with exact reference (page/section) and wrap each in double quotes.

**Overall Confidence Level:**
High / Medium / Low, with the reason for this confidence level

---

Do NOT fabricate page numbers or section titles.
Do NOT replace real references with "Various" or vague terms.
Only report sections with findings. If a section has no findings, skip it.

Evaluations:
{input}"#;

/// Prompt templates for the two reductions. Each must contain `{input}`.
#[derive(Debug, Clone)]
pub struct ReportPrompts {
    pub batch_template: String,
    pub final_template: String,
}

impl Default for ReportPrompts {
    fn default() -> Self {
        Self {
            batch_template: BATCH_PROMPT.to_string(),
            final_template: FINAL_PROMPT.to_string(),
        }
    }
}

impl ReportPrompts {
    pub fn batch_prompt(&self, input: &str) -> String {
        self.batch_template.replace(INPUT_PLACEHOLDER, input)
    }

    pub fn final_prompt(&self, input: &str) -> String {
        self.final_template.replace(INPUT_PLACEHOLDER, input)
    }
}

#[derive(Clone)]
pub struct HierarchicalSummarizer {
    service: Arc<dyn ReasoningService>,
    retry: RetryPolicy,
    prompts: ReportPrompts,
}

impl HierarchicalSummarizer {
    pub fn new(service: Arc<dyn ReasoningService>, retry: RetryPolicy) -> Self {
        Self {
            service,
            retry,
            prompts: ReportPrompts::default(),
        }
    }

    pub fn with_prompts(mut self, prompts: ReportPrompts) -> Self {
        self.prompts = prompts;
        self
    }

    /// One reduction call per batch, serially and in batch order.
    pub async fn reduce_batches(
        &self,
        batches: &[Batch],
        cancel: &CancelSignal,
    ) -> Result<Vec<IntermediateSummary>, PipelineError> {
        let mut summaries = Vec::with_capacity(batches.len());

        for batch in batches {
            let input = batch.joined();
            let stage = AggregationStage::BatchReduce {
                batch_index: batch.index,
            };
            let text = self.reduce(&self.prompts.batch_prompt(&input), stage, cancel).await?;

            let dropped = missing_citations(&input, &text);
            if !dropped.is_empty() {
                tracing::warn!(
                    batch = batch.index,
                    ?dropped,
                    "intermediate summary dropped page citations"
                );
            }
            tracing::debug!(batch = batch.index, tokens = batch.token_count, "batch reduced");

            summaries.push(IntermediateSummary {
                batch_index: batch.index,
                text,
            });
        }

        Ok(summaries)
    }

    pub async fn final_reduce(
        &self,
        summaries: &[IntermediateSummary],
        cancel: &CancelSignal,
    ) -> Result<FinalReport, PipelineError> {
        let input = summaries
            .iter()
            .map(|summary| summary.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let text = self
            .reduce(
                &self.prompts.final_prompt(&input),
                AggregationStage::FinalReduce,
                cancel,
            )
            .await?;

        Ok(FinalReport {
            text: clean_report(&text),
        })
    }

    pub async fn summarize(
        &self,
        batches: &[Batch],
        cancel: &CancelSignal,
    ) -> Result<FinalReport, PipelineError> {
        let summaries = self.reduce_batches(batches, cancel).await?;
        self.final_reduce(&summaries, cancel).await
    }

    async fn reduce(
        &self,
        prompt: &str,
        stage: AggregationStage,
        cancel: &CancelSignal,
    ) -> Result<String, PipelineError> {
        match call_with_retry(self.service.as_ref(), prompt, &self.retry, cancel).await {
            Ok(text) => Ok(sanitize_model_output(&text)),
            Err(FailedCall {
                error: ServiceError::Cancelled,
                ..
            }) => Err(PipelineError::Cancelled),
            Err(FailedCall { error, attempts }) => {
                tracing::error!(%stage, attempts, "reduction failed: {error}");
                Err(PipelineError::Aggregation {
                    stage,
                    source: error,
                })
            }
        }
    }
}

/// Removes the "no standards referenced" boilerplate block, case-insensitively.
pub fn clean_report(report: &str) -> String {
    NO_STANDARDS_RE.replace_all(report, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    struct Recorder {
        prompts: Mutex<Vec<String>>,
        fail_final: bool,
        fail_batch_containing: Option<&'static str>,
    }

    impl Recorder {
        fn new(fail_final: bool) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                fail_final,
                fail_batch_containing: None,
            }
        }
    }

    #[async_trait]
    impl ReasoningService for Recorder {
        async fn evaluate(&self, prompt: &str) -> Result<String, ServiceError> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            if prompt.contains("Evaluations:") {
                if self.fail_final {
                    return Err(ServiceError::Service("final down".to_string()));
                }
                return Ok("REPORT".to_string());
            }
            if let Some(marker) = self.fail_batch_containing {
                if prompt.contains(marker) {
                    return Err(ServiceError::RateLimited("429".to_string()));
                }
            }
            Ok(format!("summary #{}", prompts.len()))
        }
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            backoff_base: Duration::from_millis(1),
            call_timeout: Duration::from_secs(5),
        }
    }

    fn batch(index: usize, items: &[&str]) -> Batch {
        Batch {
            index,
            items: items.iter().map(|s| s.to_string()).collect(),
            token_count: 0,
        }
    }

    #[test]
    fn strips_no_standards_boilerplate_only() {
        let report = "**Strengths:**\n- Clear targets (Page 1)\n\n**Standards Referenced:**  \n- No specific standards referenced.\n\n**Overall Confidence Level:** High";
        assert_eq!(
            clean_report(report),
            "**Strengths:**\n- Clear targets (Page 1)\n\n**Overall Confidence Level:** High"
        );
    }

    #[test]
    fn boilerplate_match_is_case_insensitive_and_dash_tolerant() {
        let cleaned = clean_report("Intro\nSTANDARDS REFERENCED: — no specific standards referenced\nTail");
        assert_eq!(cleaned, "Intro\nTail");
    }

    #[test]
    fn real_standards_are_kept() {
        let report = "**Standards Referenced:**\n- GRI 305, TCFD";
        assert_eq!(clean_report(report), report);
    }

    #[test]
    fn templates_substitute_input() {
        let prompts = ReportPrompts::default();
        let prompt = prompts.batch_prompt("[Page 3] Section for Page 3:\nbody");
        assert!(prompt.contains("Do not invent or generalize page numbers."));
        assert!(prompt.ends_with("[Page 3] Section for Page 3:\nbody"));
        assert!(prompts.final_prompt("x").contains("Do NOT replace real references with \"Various\""));
    }

    #[tokio::test]
    async fn one_reduction_per_batch_then_one_final_call() {
        let service = Arc::new(Recorder::new(false));
        let summarizer = HierarchicalSummarizer::new(service.clone(), retry());
        let batches = vec![
            batch(0, &["[Page 1] a", "[Page 2] b"]),
            batch(1, &["[Page 3] c"]),
        ];

        let report = summarizer
            .summarize(&batches, &CancelSignal::never())
            .await
            .unwrap();

        let prompts = service.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].contains("[Page 1] a\n\n[Page 2] b"));
        assert!(prompts[1].contains("[Page 3] c"));
        assert!(prompts[2].contains("Evaluations:\nsummary #1\n\nsummary #2"));
        assert_eq!(report.text, "REPORT");
    }

    #[tokio::test]
    async fn final_failure_is_an_aggregation_error() {
        let summarizer = HierarchicalSummarizer::new(Arc::new(Recorder::new(true)), retry());
        let err = summarizer
            .summarize(&[batch(0, &["[Page 1] a"])], &CancelSignal::never())
            .await
            .unwrap_err();

        match err {
            PipelineError::Aggregation { stage, source } => {
                assert_eq!(stage, AggregationStage::FinalReduce);
                assert_eq!(source, ServiceError::Service("final down".into()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batch_failure_names_the_batch_and_skips_the_final_reduction() {
        let service = Arc::new(Recorder {
            fail_batch_containing: Some("[Page 3] c"),
            ..Recorder::new(false)
        });
        let summarizer = HierarchicalSummarizer::new(service.clone(), retry());
        let batches = vec![batch(0, &["[Page 1] a"]), batch(1, &["[Page 3] c"])];

        let err = summarizer
            .summarize(&batches, &CancelSignal::never())
            .await
            .unwrap_err();

        match err {
            PipelineError::Aggregation { stage, source } => {
                assert_eq!(stage, AggregationStage::BatchReduce { batch_index: 1 });
                assert!(matches!(source, ServiceError::RateLimited(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        let prompts = service.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts.iter().all(|prompt| !prompt.contains("Evaluations:")));
    }
}
