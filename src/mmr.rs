//! Maximal Marginal Relevance selection.

use crate::embedding::dot;

/// Default relevance/diversity trade-off.
pub const DEFAULT_LAMBDA: f32 = 0.7;

/// Candidate pool size for a reranked search of `top_k` results.
pub fn candidate_count(top_k: usize) -> usize {
    top_k.saturating_mul(4).max(20)
}

/// A candidate for selection: its ordinal id and its stored vector.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub ordinal: usize,
    pub vector: &'a [f32],
}

/// Select up to `top_k` candidates balancing relevance against redundancy.
///
/// All vectors are unit length, so inner products are cosine similarities.
/// The first pick is the most relevant candidate; each later pick maximizes
/// `lambda * relevance - (1 - lambda) * max_similarity_to_selected`. Ties
/// go to the lowest ordinal. Returns `(ordinal, relevance)` in selection
/// order.
pub fn select(
    query: &[f32],
    candidates: &[Candidate<'_>],
    top_k: usize,
    lambda: f32,
) -> Vec<(usize, f32)> {
    let relevance: Vec<f32> =
        candidates.iter().map(|c| dot(query, c.vector)).collect();
    // Highest similarity to any selected candidate, per candidate.
    let mut redundancy = vec![f32::NEG_INFINITY; candidates.len()];
    let mut taken = vec![false; candidates.len()];
    let mut selected = Vec::with_capacity(top_k.min(candidates.len()));

    while selected.len() < top_k {
        let mut best: Option<(usize, f32)> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            if taken[i] {
                continue;
            }
            let score = if selected.is_empty() {
                relevance[i]
            } else {
                lambda * relevance[i] - (1.0 - lambda) * redundancy[i]
            };
            let better = match best {
                None => true,
                Some((j, best_score)) => {
                    score > best_score
                        || (score == best_score
                            && candidate.ordinal < candidates[j].ordinal)
                }
            };
            if better {
                best = Some((i, score));
            }
        }

        let Some((pick, _)) = best else {
            break;
        };
        taken[pick] = true;
        selected.push((candidates[pick].ordinal, relevance[pick]));

        let picked = candidates[pick].vector;
        for (i, candidate) in candidates.iter().enumerate() {
            if !taken[i] {
                redundancy[i] = redundancy[i].max(dot(picked, candidate.vector));
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(values: &[f32]) -> Vec<f32> {
        let norm = dot(values, values).sqrt();
        values.iter().map(|v| v / norm).collect()
    }

    fn candidates(vectors: &[Vec<f32>]) -> Vec<Candidate<'_>> {
        vectors
            .iter()
            .enumerate()
            .map(|(ordinal, vector)| Candidate { ordinal, vector })
            .collect()
    }

    #[test]
    fn candidate_count_has_floor_of_twenty() {
        assert_eq!(candidate_count(1), 20);
        assert_eq!(candidate_count(5), 20);
        assert_eq!(candidate_count(10), 40);
        assert_eq!(candidate_count(usize::MAX), usize::MAX);
    }

    #[test]
    fn prefers_diverse_candidate_over_near_duplicate() {
        let query = unit(&[1.0, 1.0, 0.0]);
        // A: most relevant. B: near-duplicate of A, slightly less relevant.
        // C: as relevant as B but nearly orthogonal to A. The rest are weak
        // filler.
        let mut vectors = vec![
            unit(&[1.0, 0.0, 0.0]),
            unit(&[1.0, -0.05, 0.0]),
            unit(&[-0.05, 1.0, 0.0]),
        ];
        for i in 0..17 {
            vectors.push(unit(&[0.05, 0.01 * i as f32, 1.0]));
        }
        assert_eq!(vectors.len(), 20);

        let picks = select(&query, &candidates(&vectors), 2, DEFAULT_LAMBDA);
        let ids: Vec<usize> = picks.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 2]);

        // Raw relevance is reported, not the combined score.
        assert!((picks[0].1 - dot(&query, &vectors[0])).abs() < 1e-6);
    }

    #[test]
    fn lambda_one_is_pure_relevance() {
        let query = unit(&[1.0, 0.0]);
        let vectors = vec![unit(&[0.9, 0.1]), unit(&[1.0, 0.0]), unit(&[0.0, 1.0])];
        let picks = select(&query, &candidates(&vectors), 3, 1.0);
        let ids: Vec<usize> = picks.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 0, 2]);
    }

    #[test]
    fn ties_go_to_lowest_ordinal() {
        let query = unit(&[1.0, 0.0]);
        let v = unit(&[1.0, 1.0]);
        let pool = vec![
            Candidate { ordinal: 9, vector: &v },
            Candidate { ordinal: 4, vector: &v },
            Candidate { ordinal: 7, vector: &v },
        ];
        let picks = select(&query, &pool, 3, DEFAULT_LAMBDA);
        let ids: Vec<usize> = picks.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![4, 7, 9]);
    }

    #[test]
    fn top_k_beyond_pool_returns_everything() {
        let query = unit(&[1.0, 0.0]);
        let vectors = vec![unit(&[1.0, 0.0]), unit(&[0.0, 1.0])];
        assert_eq!(select(&query, &candidates(&vectors), 10, 0.5).len(), 2);
    }

    #[test]
    fn empty_pool_or_zero_k_selects_nothing() {
        let query = unit(&[1.0, 0.0]);
        assert!(select(&query, &[], 3, 0.7).is_empty());
        let vectors = vec![unit(&[1.0, 0.0])];
        assert!(select(&query, &candidates(&vectors), 0, 0.7).is_empty());
    }
}
