use std::sync::Arc;

use crate::models::{section_title_for, Chunk, Page};
use crate::tokenizer::{normalize_text, tokenize};

const PAGE_SEPARATOR: &str = "\n\n";

/// Maps a chunk back to the page it came from.
pub trait PageLocator: Send + Sync {
    /// `pages` carry normalized text, in the order the corpus supplied them.
    fn locate(&self, chunk_text: &str, pages: &[Page]) -> Option<u32>;
}

/// First page whose text contains the chunk's leading characters verbatim.
#[derive(Debug, Clone)]
pub struct PrefixLocator {
    prefix_chars: usize,
}

impl PrefixLocator {
    pub fn new(prefix_chars: usize) -> Self {
        Self {
            prefix_chars: prefix_chars.max(1),
        }
    }
}

impl Default for PrefixLocator {
    fn default() -> Self {
        Self::new(20)
    }
}

impl PageLocator for PrefixLocator {
    fn locate(&self, chunk_text: &str, pages: &[Page]) -> Option<u32> {
        let prefix: String = chunk_text.chars().take(self.prefix_chars).collect();
        if prefix.is_empty() {
            return None;
        }

        pages
            .iter()
            .find(|page| page.text.contains(prefix.as_str()))
            .map(|page| page.number)
    }
}

pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    locator: Box<dyn PageLocator>,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap,
            locator: Box::new(PrefixLocator::default()),
        }
    }

    pub fn with_locator(mut self, locator: Box<dyn PageLocator>) -> Self {
        self.locator = locator;
        self
    }

    /// Lazily windows the concatenated corpus. The returned iterator can be
    /// cloned to replay the sequence from its current position.
    pub fn chunks(&self, pages: &[Page]) -> Chunks<'_> {
        let pages: Vec<Page> = pages
            .iter()
            .map(|page| Page::new(page.number, normalize_text(&page.text)))
            .collect();

        let full_text = pages
            .iter()
            .map(|page| page.text.as_str())
            .collect::<Vec<_>>()
            .join(PAGE_SEPARATOR);
        let tokens = tokenize(&full_text)
            .into_iter()
            .map(str::to_string)
            .collect();

        Chunks {
            corpus: Arc::new(Corpus { pages, tokens }),
            locator: self.locator.as_ref(),
            window: self.chunk_size,
            step: self.chunk_size.saturating_sub(self.overlap).max(1),
            start: 0,
            next_index: 0,
            finished: false,
        }
    }
}

struct Corpus {
    pages: Vec<Page>,
    tokens: Vec<String>,
}

#[derive(Clone)]
pub struct Chunks<'a> {
    corpus: Arc<Corpus>,
    locator: &'a dyn PageLocator,
    window: usize,
    step: usize,
    start: usize,
    next_index: usize,
    finished: bool,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let tokens = &self.corpus.tokens;
        if self.finished || self.start >= tokens.len() {
            return None;
        }

        let end = (self.start + self.window).min(tokens.len());
        let text = tokens[self.start..end].join(" ");
        let source_page = self.locator.locate(&text, &self.corpus.pages);

        let chunk = Chunk {
            index: self.next_index,
            text,
            source_page,
            section_title: section_title_for(source_page),
        };

        self.next_index += 1;
        if end == tokens.len() {
            self.finished = true;
        } else {
            self.start += self.step;
        }

        Some(chunk)
    }
}
