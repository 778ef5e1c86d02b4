use crate::models::Batch;
use crate::tokenizer::count_tokens;

/// Greedily packs texts into batches of at most `max_tokens`. A text that is
/// larger than the budget on its own becomes a single-item batch; nothing is
/// split or dropped and input order is kept.
pub fn batch_texts<S: AsRef<str>>(texts: &[S], max_tokens: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut items: Vec<String> = Vec::new();
    let mut tokens = 0usize;

    for text in texts {
        let text = text.as_ref();
        let text_tokens = count_tokens(text);

        if !items.is_empty() && tokens + text_tokens > max_tokens {
            batches.push(Batch {
                index: batches.len(),
                items: std::mem::take(&mut items),
                token_count: tokens,
            });
            tokens = 0;
        }

        items.push(text.to_string());
        tokens += text_tokens;
    }

    if !items.is_empty() {
        batches.push(Batch {
            index: batches.len(),
            items,
            token_count: tokens,
        });
    }

    batches
}
