use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::provenance::ProvenanceCheck;
use crate::tokenizer::normalize_text;

const NO_STANDARDS_PHRASE: &str = "no specific standards referenced";

static CONFIDENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)confidence level:?\**\s*(high|medium|low)").expect("valid confidence regex")
});

static QUOTED_EXCERPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["“][^"“”]*\w[^"“”]*["”]"#).expect("valid quote regex")
});

static FENCED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```$").expect("valid fence regex"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

impl Page {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub source_page: Option<u32>,
    pub section_title: String,
}

pub fn section_title_for(page: Option<u32>) -> String {
    format!("Section for Page {}", page_label(page))
}

pub fn page_label(page: Option<u32>) -> String {
    page.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Unknown,
}

impl Confidence {
    pub fn from_text(text: &str) -> Self {
        let Some(level) = CONFIDENCE_RE
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_ascii_lowercase())
        else {
            return Confidence::Unknown;
        };

        match level.as_str() {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            "low" => Confidence::Low,
            _ => Confidence::Unknown,
        }
    }
}

/// How many kept evaluations reported each confidence level.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfidenceTally {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub unknown: usize,
}

impl ConfidenceTally {
    pub fn from_results(results: &[EvaluationResult]) -> Self {
        let mut tally = Self::default();
        for result in results {
            match result.confidence {
                Confidence::High => tally.high += 1,
                Confidence::Medium => tally.medium += 1,
                Confidence::Low => tally.low += 1,
                Confidence::Unknown => tally.unknown += 1,
            }
        }
        tally
    }

    pub fn total(&self) -> usize {
        self.high + self.medium + self.low + self.unknown
    }
}

/// One chunk's evaluation, validated at the point the raw service text enters
/// the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationResult {
    pub chunk_index: usize,
    pub page: Option<u32>,
    pub section_title: String,
    pub analysis_text: String,
    pub has_supporting_context: bool,
    pub confidence: Confidence,
}

impl EvaluationResult {
    /// Builds a result from the raw service response. An evaluation counts as
    /// supported only when one of its quoted excerpts occurs in the chunk it
    /// evaluated; anything else falls back to an unsupported record.
    pub fn parse(chunk: &Chunk, raw: &str) -> Self {
        let analysis_text = sanitize_model_output(raw);
        let has_supporting_context = quotes_chunk(&analysis_text, &chunk.text);
        let confidence = if analysis_text.is_empty() {
            Confidence::Unknown
        } else {
            Confidence::from_text(&analysis_text)
        };

        Self {
            chunk_index: chunk.index,
            page: chunk.source_page,
            section_title: chunk.section_title.clone(),
            analysis_text,
            has_supporting_context,
            confidence,
        }
    }

    /// Evaluation text with its provenance tags, as fed to the reductions.
    pub fn render(&self) -> String {
        let page = page_label(self.page);
        format!(
            "[Page {page}] {}:\n{}\n(Supporting context from Page {page}, {})",
            self.section_title, self.analysis_text, self.section_title
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub items: Vec<String>,
    pub token_count: usize,
}

impl Batch {
    pub fn joined(&self) -> String {
        self.items.join("\n\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntermediateSummary {
    pub batch_index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalReport {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub page: Option<u32>,
    pub attempts: u32,
    pub error: ServiceError,
}

/// Everything one run produced, in a shape the binary can print or serialize.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub report: FinalReport,
    pub chunk_count: usize,
    pub evaluated_count: usize,
    pub discarded_count: usize,
    pub batch_count: usize,
    pub confidence: ConfidenceTally,
    pub summaries: Vec<IntermediateSummary>,
    pub failures: Vec<ChunkFailure>,
    pub provenance: ProvenanceCheck,
}

/// True when a quoted excerpt in `analysis` appears in `chunk_text`, ignoring
/// case, whitespace runs and trailing punctuation.
fn quotes_chunk(analysis: &str, chunk_text: &str) -> bool {
    let haystack = normalize_text(chunk_text).to_lowercase();

    QUOTED_EXCERPT_RE.find_iter(analysis).any(|quoted| {
        let inner = quoted.as_str().trim_matches(['"', '\u{201C}', '\u{201D}']);
        let excerpt = normalize_text(inner).to_lowercase();
        let excerpt = excerpt.trim_end_matches(['.', ',', ';', ':', '!', '?']).trim();
        !excerpt.is_empty() && excerpt != NO_STANDARDS_PHRASE && haystack.contains(excerpt)
    })
}

pub fn sanitize_model_output(answer: &str) -> String {
    let text = answer.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }

    match FENCED_RE.captures(text).and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str().trim().to_string(),
        None => text.replace("```", "").trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(page: Option<u32>) -> Chunk {
        Chunk {
            index: 4,
            text: "Board oversight of climate risk".to_string(),
            source_page: page,
            section_title: section_title_for(page),
        }
    }

    #[test]
    fn section_title_marks_unknown_pages() {
        assert_eq!(section_title_for(Some(12)), "Section for Page 12");
        assert_eq!(section_title_for(None), "Section for Page ?");
    }

    #[test]
    fn confidence_is_parsed_case_insensitively() {
        assert_eq!(
            Confidence::from_text("... Confidence Level: high"),
            Confidence::High
        );
        assert_eq!(
            Confidence::from_text("**Confidence Level:** Medium"),
            Confidence::Medium
        );
        assert_eq!(Confidence::from_text("no label here"), Confidence::Unknown);
    }

    #[test]
    fn quoted_evaluation_has_supporting_context() {
        let raw = "Strengths: clear oversight.\nSupporting Quote: \u{201C}Board  oversight of climate risk.\u{201D}\nConfidence Level: Low";
        let result = EvaluationResult::parse(&chunk(Some(3)), raw);
        assert!(result.has_supporting_context);
        assert_eq!(result.page, Some(3));
        assert_eq!(result.chunk_index, 4);
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn malformed_response_falls_back_to_unsupported() {
        let empty = EvaluationResult::parse(&chunk(Some(1)), "   ");
        assert!(!empty.has_supporting_context);
        assert_eq!(empty.confidence, Confidence::Unknown);

        let unquoted = EvaluationResult::parse(&chunk(Some(1)), "Gaps: none found.");
        assert!(!unquoted.has_supporting_context);
    }

    #[test]
    fn boilerplate_quote_is_not_supporting_context() {
        let chunk = Chunk {
            text: "The company plans to improve sustainability.".to_string(),
            ..chunk(Some(2))
        };
        let raw = "Gaps: the section is vague.\nStandards Referenced: \"No specific standards referenced.\"\nConfidence Level: Low";
        let result = EvaluationResult::parse(&chunk, raw);
        assert!(!result.has_supporting_context);
    }

    #[test]
    fn quote_must_come_from_the_chunk() {
        let invented = EvaluationResult::parse(
            &chunk(Some(1)),
            "Supporting Quote: \"The board reviews climate risk quarterly\"",
        );
        assert!(!invented.has_supporting_context);

        let mixed = EvaluationResult::parse(
            &chunk(Some(1)),
            "Standards: \"No specific standards referenced.\" Quote: \"oversight of climate\"",
        );
        assert!(mixed.has_supporting_context);
    }

    #[test]
    fn render_keeps_page_and_section_tags() {
        let result = EvaluationResult::parse(&chunk(Some(7)), "Quote: \"net zero by 2040\"");
        let rendered = result.render();
        assert!(rendered.starts_with("[Page 7] Section for Page 7:\n"));
        assert!(rendered.ends_with("(Supporting context from Page 7, Section for Page 7)"));

        let unknown = EvaluationResult::parse(&chunk(None), "Quote: \"x y\"").render();
        assert!(unknown.starts_with("[Page ?] Section for Page ?:"));
    }

    #[test]
    fn tally_counts_each_confidence_level() {
        let quoted = |level: &str| {
            EvaluationResult::parse(
                &chunk(Some(1)),
                &format!("Quote: \"climate risk\"\nConfidence Level: {level}"),
            )
        };
        let results = vec![
            quoted("High"),
            quoted("high"),
            quoted("Low"),
            EvaluationResult::parse(&chunk(Some(2)), "no label"),
        ];

        let tally = ConfidenceTally::from_results(&results);
        assert_eq!(
            tally,
            ConfidenceTally {
                high: 2,
                medium: 0,
                low: 1,
                unknown: 1
            }
        );
        assert_eq!(tally.total(), 4);
    }

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(
            sanitize_model_output("```markdown\nHello world\n```"),
            "Hello world"
        );
        assert_eq!(sanitize_model_output("  plain  "), "plain");
    }
}
