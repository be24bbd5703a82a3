use serde::{Deserialize, Serialize};

use crate::scoring::ScoreKind;

/// Identity of a passage across result lists.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PassageKey {
	pub document_id: String,
	pub chunk_index: u32,
}

/// One hit from a single vector-index query. `score` is similarity on a 0-100 scale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
	pub document_id: String,
	pub chunk_index: u32,
	pub score: f32,
	pub text: String,
}
impl SearchHit {
	pub fn key(&self) -> PassageKey {
		PassageKey { document_id: self.document_id.clone(), chunk_index: self.chunk_index }
	}
}

/// A deduplicated hit carrying its reciprocal-rank-fusion score.
#[derive(Clone, Debug, PartialEq)]
pub struct FusedHit {
	/// First-seen instance of the passage, with the best vector score observed across lists.
	pub hit: SearchHit,
	pub fused_score: f32,
	/// Number of result lists that contained the passage.
	pub list_count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageScores {
	pub vector: Option<f32>,
	pub fused: Option<f32>,
	pub rerank: Option<f32>,
}

/// The unit returned to callers: a passage joined with document metadata and a citation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSource {
	pub citation: u32,
	pub document_id: String,
	pub document_name: String,
	pub chunk_index: u32,
	pub text: String,
	/// Score from the stage that last ordered this source; read it together with `score_kind`.
	pub score: f32,
	pub score_kind: ScoreKind,
	pub scores: StageScores,
	/// `score` normalized to 0-1. Filled once per response by `scoring::finalize_relevance`.
	pub relevance: f32,
}
impl EnrichedSource {
	pub fn from_vector_hit(hit: SearchHit, document_name: String) -> Self {
		Self {
			citation: 0,
			document_name,
			score: hit.score,
			score_kind: ScoreKind::Vector,
			scores: StageScores { vector: Some(hit.score), ..StageScores::default() },
			relevance: 0.0,
			document_id: hit.document_id,
			chunk_index: hit.chunk_index,
			text: hit.text,
		}
	}

	pub fn from_fused_hit(fused: FusedHit, document_name: String) -> Self {
		Self {
			citation: 0,
			document_name,
			score: fused.fused_score,
			score_kind: ScoreKind::Fused,
			scores: StageScores {
				vector: Some(fused.hit.score),
				fused: Some(fused.fused_score),
				rerank: None,
			},
			relevance: 0.0,
			document_id: fused.hit.document_id,
			chunk_index: fused.hit.chunk_index,
			text: fused.hit.text,
		}
	}

	pub fn key(&self) -> PassageKey {
		PassageKey { document_id: self.document_id.clone(), chunk_index: self.chunk_index }
	}

	pub fn is_supporting(&self) -> bool {
		self.score_kind == ScoreKind::Supporting
	}
}

/// Numbers sources 1..=n in their current order.
pub fn assign_citations(sources: &mut [EnrichedSource]) {
	for (idx, source) in sources.iter_mut().enumerate() {
		source.citation = idx as u32 + 1;
	}
}

/// Concatenates passages into the numbered context block handed to answer generation.
pub fn render_context_text(sources: &[EnrichedSource]) -> String {
	let mut out = String::new();

	for source in sources {
		if !out.is_empty() {
			out.push_str("\n\n");
		}

		out.push_str(&format!("[{}] {}\n{}", source.citation, source.document_name, source.text.trim()));
	}

	out
}
