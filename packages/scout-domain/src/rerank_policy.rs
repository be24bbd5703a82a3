//! When an LLM rerank is worth its latency, and how its scores are folded back in.

use crate::{
	passage::{EnrichedSource, FusedHit},
	scoring::{self, ScoreKind},
};

/// Fewer candidates than this carry too little signal to reorder.
pub const MIN_CANDIDATES: usize = 3;
/// A top fused score above this, and above `DOMINANCE_RATIO` times the runner-up, is decisive.
pub const DOMINANT_TOP_SCORE: f32 = 3.5;
pub const DOMINANCE_RATIO: f32 = 2.0;
/// Mean of the top three fused scores above this means every lead candidate ranked well.
pub const CONSENSUS_MEAN_SCORE: f32 = 2.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RerankDecision {
	TooFewCandidates,
	DominantTop,
	StrongConsensus,
	Rerank,
}
impl RerankDecision {
	pub fn should_rerank(self) -> bool {
		matches!(self, Self::Rerank)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::TooFewCandidates => "too_few_candidates",
			Self::DominantTop => "dominant_top",
			Self::StrongConsensus => "strong_consensus",
			Self::Rerank => "rerank",
		}
	}
}

/// Decides on fused scores sorted in descending order.
pub fn decide_rerank(fused_scores: &[f32]) -> RerankDecision {
	if fused_scores.len() < MIN_CANDIDATES {
		return RerankDecision::TooFewCandidates;
	}

	let top = fused_scores[0];
	let second = fused_scores[1];

	if top > DOMINANT_TOP_SCORE && top > DOMINANCE_RATIO * second {
		return RerankDecision::DominantTop;
	}

	let mean_top3 = fused_scores[..MIN_CANDIDATES].iter().sum::<f32>() / MIN_CANDIDATES as f32;

	if mean_top3 > CONSENSUS_MEAN_SCORE {
		return RerankDecision::StrongConsensus;
	}

	RerankDecision::Rerank
}

pub fn needs_rerank(fused_top: &[FusedHit]) -> bool {
	let scores: Vec<f32> = fused_top.iter().map(|hit| hit.fused_score).collect();

	decide_rerank(&scores).should_rerank()
}

/// Folds LLM relevance scores (0-100) into `candidates` and keeps the best `top_k`.
///
/// `llm_scores[i]` belongs to `candidates[i]`. A `None` keeps the candidate's previous score,
/// compared on the normalized scale. Candidates past the end of `llm_scores` were never shown to
/// the model and stay behind the scored window in their previous order.
pub fn apply_rerank(
	candidates: Vec<EnrichedSource>,
	llm_scores: &[Option<f32>],
	fusion_lists: usize,
	top_k: usize,
) -> Vec<EnrichedSource> {
	let window = llm_scores.len().min(candidates.len());
	let mut scored: Vec<(f32, EnrichedSource)> = Vec::with_capacity(window);
	let mut tail = Vec::new();

	for (idx, mut source) in candidates.into_iter().enumerate() {
		if idx >= window {
			tail.push(source);

			continue;
		}

		let key = match llm_scores[idx].filter(|score| score.is_finite()) {
			Some(score) => {
				let score = score.clamp(0.0, 100.0);

				source.score = score;
				source.score_kind = ScoreKind::Rerank;
				source.scores.rerank = Some(score);

				scoring::normalize(ScoreKind::Rerank, score, fusion_lists)
			},
			None => scoring::relevance_of(&source, fusion_lists),
		};

		scored.push((key, source));
	}

	scored.sort_by(|a, b| scoring::cmp_f32_desc(a.0, b.0));

	let mut out: Vec<EnrichedSource> = scored.into_iter().map(|(_, source)| source).collect();

	out.extend(tail);
	out.truncate(top_k);

	out
}
