use crate::models::EvaluationResult;

/// Keeps supported evaluations and puts them in reading order: ascending page,
/// unknown pages last, chunk index breaking ties.
pub fn assemble(results: Vec<EvaluationResult>) -> Vec<EvaluationResult> {
    let mut kept: Vec<EvaluationResult> = results
        .into_iter()
        .filter(|result| result.has_supporting_context)
        .collect();

    kept.sort_by_key(|result| (result.page.is_none(), result.page, result.chunk_index));
    kept
}
