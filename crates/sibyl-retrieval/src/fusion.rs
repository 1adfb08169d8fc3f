//! Reciprocal rank fusion of vector and keyword result lists.

use std::collections::HashMap;

use sibyl_memory::{ChunkId, DocumentId};

/// A chunk with its fused relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedChunk {
    pub id: ChunkId,
    pub parent_id: DocumentId,
    pub score: f64,
}

/// Fuse two ranked lists with reciprocal rank fusion.
///
/// Each list contributes `1 / (rrf_k + rank)` per chunk, ranks starting
/// at 1. Chunks present in both lists accumulate both contributions, so
/// agreement between the searchers outranks a high position in either
/// one alone. Ties break on chunk id for a stable order.
#[must_use]
pub fn fuse(
    vector: &[(ChunkId, DocumentId)],
    keyword: &[(ChunkId, DocumentId)],
    rrf_k: u32,
    final_k: usize,
) -> Vec<FusedChunk> {
    let mut scores: HashMap<ChunkId, (DocumentId, f64)> = HashMap::new();
    for list in [vector, keyword] {
        for (rank, (id, parent_id)) in list.iter().enumerate() {
            #[expect(clippy::cast_precision_loss)]
            let contribution = 1.0 / (f64::from(rrf_k) + (rank + 1) as f64);
            scores
                .entry(*id)
                .and_modify(|(_, score)| *score += contribution)
                .or_insert((*parent_id, contribution));
        }
    }

    let mut fused: Vec<FusedChunk> = scores
        .into_iter()
        .map(|(id, (parent_id, score))| FusedChunk { id, parent_id, score })
        .collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
    });
    fused.truncate(final_k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(parent: DocumentId, ordinal: u32) -> (ChunkId, DocumentId) {
        (ChunkId::derive(parent, ordinal), parent)
    }

    #[test]
    fn chunk_in_both_lists_outranks_single_list_leaders() {
        let parent = DocumentId::new();
        let x = chunk(parent, 0);
        let y = chunk(parent, 1);
        let z = chunk(parent, 2);

        // vector ranks: x=1, y=2; keyword ranks: y=1, z=2
        let fused = fuse(&[x, y], &[y, z], 60, 10);

        assert_eq!(fused[0].id, y.0);
        let expected_y = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].score - expected_y).abs() < 1e-12);
        let expected_x = 1.0 / 61.0;
        assert!(fused
            .iter()
            .any(|c| c.id == x.0 && (c.score - expected_x).abs() < 1e-12));
    }

    #[test]
    fn final_k_caps_output() {
        let parent = DocumentId::new();
        let list: Vec<_> = (0..10).map(|i| chunk(parent, i)).collect();
        let fused = fuse(&list, &[], 60, 3);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn empty_inputs_fuse_to_empty() {
        assert!(fuse(&[], &[], 60, 5).is_empty());
    }

    #[test]
    fn equal_scores_break_ties_deterministically() {
        let parent = DocumentId::new();
        let a = chunk(parent, 0);
        let b = chunk(parent, 1);
        let first = fuse(&[a], &[b], 60, 10);
        let second = fuse(&[a], &[b], 60, 10);
        assert_eq!(first, second);
    }
}
