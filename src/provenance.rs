//! Citation checks on reduction output. Nothing here rewrites text; the
//! results are reported next to the final report.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static PAGE_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpage\s+(\d+)\b").expect("valid page reference regex"));

static VARIOUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(\s*various\b|\bvarious\s+(?:pages?|sections?)\b|\bpages?\s*:?\s*various\b")
        .expect("valid placeholder regex")
});

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ProvenanceCheck {
    pub cited_pages: Vec<u32>,
    /// Cited in the report but never evaluated.
    pub fabricated_pages: Vec<u32>,
    /// Evaluated but not cited anywhere in the report.
    pub uncited_pages: Vec<u32>,
    pub uses_various: bool,
}

impl ProvenanceCheck {
    pub fn is_clean(&self) -> bool {
        self.fabricated_pages.is_empty() && !self.uses_various
    }
}

pub fn extract_page_refs(text: &str) -> BTreeSet<u32> {
    PAGE_REF_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().parse::<u32>().ok())
        .collect()
}

pub fn uses_various_placeholder(text: &str) -> bool {
    VARIOUS_RE.is_match(text)
}

pub fn check_report(report: &str, evaluated_pages: &BTreeSet<u32>) -> ProvenanceCheck {
    let cited = extract_page_refs(report);

    ProvenanceCheck {
        fabricated_pages: cited.difference(evaluated_pages).copied().collect(),
        uncited_pages: evaluated_pages.difference(&cited).copied().collect(),
        cited_pages: cited.into_iter().collect(),
        uses_various: uses_various_placeholder(report),
    }
}

/// Pages referenced in a reduction's input that its output no longer cites.
pub fn missing_citations(input: &str, output: &str) -> Vec<u32> {
    let kept = extract_page_refs(output);
    extract_page_refs(input)
        .difference(&kept)
        .copied()
        .collect()
}
