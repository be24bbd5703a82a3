//! LLM relevance scoring over a short candidate window.

use std::time::Duration;

use serde_json::Value;

use crate::ScoutService;
use scout_domain::{passage::EnrichedSource, rerank_policy};

pub const RERANK_SYSTEM_PROMPT: &str = "\
You are a search relevance judge. Score how well each numbered passage answers the question, \
from 0 (irrelevant) to 100 (fully answers it). Respond with one JSON object only: \
{\"scores\": [{\"index\": number, \"score\": number}]}, one entry per passage, using the passage \
numbers as given.";

pub(crate) struct RerankOutcome {
	pub(crate) sources: Vec<EnrichedSource>,
	pub(crate) reranked: bool,
}

impl ScoutService {
	/// Scores up to `search.rerank.max_candidates` passages and keeps the best `top_k`.
	///
	/// Any failure keeps the incoming order, truncated to `top_k`.
	pub(crate) async fn rerank_sources(
		&self,
		query: &str,
		candidates: Vec<EnrichedSource>,
		fusion_lists: usize,
		top_k: usize,
	) -> RerankOutcome {
		let cfg = &self.cfg.search.rerank;
		let window = candidates.len().min(cfg.max_candidates as usize);

		if window == 0 {
			return RerankOutcome { sources: candidates, reranked: false };
		}

		let messages = build_messages(query, &candidates[..window], cfg.snippet_chars as usize);
		let call = self.providers.llm.complete_json(&self.cfg.providers.llm, &messages);
		let fallback = |mut sources: Vec<EnrichedSource>| {
			sources.truncate(top_k);

			RerankOutcome { sources, reranked: false }
		};
		let raw = match tokio::time::timeout(Duration::from_millis(cfg.timeout_ms), call).await {
			Ok(Ok(raw)) => raw,
			Ok(Err(err)) => {
				tracing::warn!(error = %err, "Rerank call failed. Keeping fused order.");

				return fallback(candidates);
			},
			Err(_) => {
				tracing::warn!(timeout_ms = cfg.timeout_ms, "Rerank timed out. Keeping fused order.");

				return fallback(candidates);
			},
		};
		let Some(scores) = parse_scores(&raw, window) else {
			tracing::warn!("Rerank response had no usable scores. Keeping fused order.");

			return fallback(candidates);
		};
		let sources = rerank_policy::apply_rerank(candidates, &scores, fusion_lists, top_k);

		RerankOutcome { sources, reranked: true }
	}
}

fn build_messages(query: &str, window: &[EnrichedSource], snippet_chars: usize) -> Vec<Value> {
	let passages = window
		.iter()
		.enumerate()
		.map(|(idx, source)| {
			let snippet: String = source.text.trim().chars().take(snippet_chars).collect();

			format!("[{}] {}", idx + 1, snippet)
		})
		.collect::<Vec<_>>()
		.join("\n\n");
	let user = format!("Question: {}\n\nPassages:\n{passages}", query.trim());

	vec![
		serde_json::json!({ "role": "system", "content": RERANK_SYSTEM_PROMPT }),
		serde_json::json!({ "role": "user", "content": user }),
	]
}

/// One slot per window position. Accepts `{"scores": [{"index", "score"}]}` with 1-based indices,
/// or a bare positional `{"scores": [number]}`. `None` when nothing usable came back.
fn parse_scores(raw: &Value, window: usize) -> Option<Vec<Option<f32>>> {
	let items = raw.get("scores").and_then(Value::as_array)?;
	let mut scores = vec![None; window];

	for (position, item) in items.iter().enumerate() {
		let (slot, score) = match item {
			Value::Number(number) => (Some(position), number.as_f64()),
			Value::Object(_) => (
				item.get("index").and_then(Value::as_u64).and_then(|index| (index as usize).checked_sub(1)),
				item.get("score").and_then(Value::as_f64),
			),
			_ => (None, None),
		};

		if let (Some(slot), Some(score)) = (slot, score)
			&& slot < window
			&& score.is_finite()
		{
			scores[slot] = Some(score as f32);
		}
	}

	scores.iter().any(Option::is_some).then_some(scores)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn maps_one_based_indices_to_slots() {
		let raw = serde_json::json!({
			"scores": [
				{ "index": 2, "score": 91 },
				{ "index": 1, "score": 12.5 },
				{ "index": 9, "score": 50 }
			]
		});

		assert_eq!(parse_scores(&raw, 3), Some(vec![Some(12.5), Some(91.0), None]));
	}

	#[test]
	fn accepts_positional_scores() {
		let raw = serde_json::json!({ "scores": [70, 20] });

		assert_eq!(parse_scores(&raw, 2), Some(vec![Some(70.0), Some(20.0)]));
	}

	#[test]
	fn empty_or_missing_scores_are_unusable() {
		assert_eq!(parse_scores(&serde_json::json!({ "scores": [] }), 2), None);
		assert_eq!(parse_scores(&serde_json::json!({ "ranking": [1, 2] }), 2), None);
		assert_eq!(parse_scores(&serde_json::json!({ "scores": [{ "index": 0, "score": 3 }] }), 2), None);
	}
}
