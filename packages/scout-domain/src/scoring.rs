//! Score kinds and the one place where stage scores become comparable.
//!
//! Vector similarity and LLM rerank scores live on a 0-100 scale, fused scores on the scaled
//! reciprocal-rank scale (roughly 0.8-5 for a handful of lists). Every source carries the kind of
//! its current score so callers never have to guess which stage produced it.

use serde::{Deserialize, Serialize};

use crate::{fusion, passage::EnrichedSource};

/// Stage score assigned to chunks added by context expansion.
pub const SUPPORTING_SCORE: f32 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
	Vector,
	Fused,
	Rerank,
	Supporting,
}
impl ScoreKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Vector => "vector",
			Self::Fused => "fused",
			Self::Rerank => "rerank",
			Self::Supporting => "supporting",
		}
	}
}

/// Maps a stage score to 0-1. `fusion_lists` is the number of result lists that were fused.
pub fn normalize(kind: ScoreKind, value: f32, fusion_lists: usize) -> f32 {
	if !value.is_finite() {
		return 0.0;
	}

	let normalized = match kind {
		ScoreKind::Vector | ScoreKind::Rerank => value / 100.0,
		ScoreKind::Fused => {
			let ceiling = fusion::max_fused_score(fusion_lists.max(1));

			value / ceiling
		},
		ScoreKind::Supporting => 0.0,
	};

	normalized.clamp(0.0, 1.0)
}

pub fn relevance_of(source: &EnrichedSource, fusion_lists: usize) -> f32 {
	normalize(source.score_kind, source.score, fusion_lists)
}

pub fn finalize_relevance(sources: &mut [EnrichedSource], fusion_lists: usize) {
	for source in sources {
		source.relevance = relevance_of(source, fusion_lists);
	}
}

/// Mean relevance of primary sources. Supporting context does not count.
pub fn estimate_confidence(sources: &[EnrichedSource]) -> f32 {
	let primary: Vec<f32> =
		sources.iter().filter(|source| !source.is_supporting()).map(|s| s.relevance).collect();

	if primary.is_empty() {
		return 0.0;
	}

	primary.iter().sum::<f32>() / primary.len() as f32
}

pub fn cmp_f32_desc(a: f32, b: f32) -> std::cmp::Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => std::cmp::Ordering::Equal,
		(true, false) => std::cmp::Ordering::Greater,
		(false, true) => std::cmp::Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal),
	}
}
