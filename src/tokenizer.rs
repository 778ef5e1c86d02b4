//! The fixed tokenizer shared by chunking and batching: whitespace-delimited
//! words, after the same normalization the page text goes through.

pub fn tokenize(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn normalize_text(input: &str) -> String {
    input
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace('\u{00A0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
