use std::collections::HashMap;

use crate::{
	passage::{FusedHit, PassageKey, SearchHit},
	scoring::cmp_f32_desc,
};

pub const RRF_K: f32 = 60.0;
/// Fused scores are multiplied by this to land on a human-legible scale.
pub const RRF_SCALE: f32 = 100.0;

/// Contribution of a hit at 0-based `rank` within one list, before scaling.
pub fn rrf_contribution(rank: usize) -> f32 {
	1.0 / (RRF_K + rank as f32 + 1.0)
}

/// Highest score a passage can reach when it ranks first in every one of `lists` lists.
pub fn max_fused_score(lists: usize) -> f32 {
	lists as f32 * rrf_contribution(0) * RRF_SCALE
}

/// Reciprocal rank fusion over several ranked lists.
///
/// Passages are keyed by `(document_id, chunk_index)`; a passage found by several lists sums its
/// contributions. Output is sorted by descending score, ties keep first-seen order.
pub fn fuse(result_lists: &[Vec<SearchHit>]) -> Vec<FusedHit> {
	let mut slots: HashMap<PassageKey, usize> = HashMap::new();
	let mut fused: Vec<FusedHit> = Vec::new();

	for list in result_lists {
		for (rank, hit) in list.iter().enumerate() {
			let contribution = rrf_contribution(rank);

			match slots.get(&hit.key()) {
				Some(&slot) => {
					let entry = &mut fused[slot];

					entry.fused_score += contribution;
					entry.list_count += 1;

					if hit.score > entry.hit.score {
						entry.hit.score = hit.score;
					}
				},
				None => {
					slots.insert(hit.key(), fused.len());
					fused.push(FusedHit { hit: hit.clone(), fused_score: contribution, list_count: 1 });
				},
			}
		}
	}

	for entry in &mut fused {
		entry.fused_score *= RRF_SCALE;
	}

	// `sort_by` is stable, so equal scores stay in first-seen order.
	fused.sort_by(|a, b| cmp_f32_desc(a.fused_score, b.fused_score));

	fused
}

/// Fuses and keeps the best `limit` passages.
pub fn fuse_top(result_lists: &[Vec<SearchHit>], limit: usize) -> Vec<FusedHit> {
	let mut fused = fuse(result_lists);

	fused.truncate(limit);

	fused
}
