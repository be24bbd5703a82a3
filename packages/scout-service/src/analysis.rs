//! Query analysis: intent plus reformulated search queries, from one LLM call or a cheap fallback.

use std::{collections::HashSet, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use unicode_segmentation::UnicodeSegmentation;

use crate::ScoutService;

pub const ANALYSIS_SYSTEM_PROMPT: &str = "\
You analyze a user's question for a document search engine. Respond with one JSON object only:
{\"intent\": string, \"search_queries\": [string], \"keywords\": [string], \"confidence\": number, \
\"needs_clarification\": boolean, \"clarification_question\": string | null}.
search_queries holds 1 to 4 self-contained reformulations that would retrieve passages answering \
the question. Resolve pronouns using the conversation when it is given. confidence is between 0 and 1.";
pub const MAX_SEARCH_QUERIES: usize = 4;
pub const FALLBACK_INTENT: &str = "search";
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

const MAX_KEYWORDS: usize = 8;
const STOPWORDS: &[&str] = &[
	"the", "and", "for", "are", "was", "were", "what", "which", "who", "whom", "whose", "when",
	"where", "why", "how", "does", "did", "can", "could", "should", "would", "will", "with", "about",
	"from", "into", "this", "that", "these", "those", "there", "their", "our", "your", "you", "has",
	"have", "had", "not", "any", "all", "its", "is", "of", "to", "in", "on", "a", "an", "or", "be",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
	pub role: String,
	pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
	pub intent: String,
	/// The original query first, then up to three reformulations.
	pub search_queries: Vec<String>,
	pub keywords: Vec<String>,
	pub confidence: f32,
	pub needs_clarification: bool,
	pub clarification_question: Option<String>,
}
impl QueryAnalysis {
	pub fn fallback(query: &str) -> Self {
		Self {
			intent: FALLBACK_INTENT.to_string(),
			search_queries: vec![query.trim().to_string()],
			keywords: keywords_from(query),
			confidence: FALLBACK_CONFIDENCE,
			needs_clarification: false,
			clarification_question: None,
		}
	}
}

#[derive(Deserialize)]
struct RawAnalysis {
	#[serde(default)]
	intent: Option<String>,
	#[serde(default)]
	search_queries: Vec<String>,
	#[serde(default)]
	keywords: Vec<String>,
	#[serde(default)]
	confidence: Option<f32>,
	#[serde(default)]
	needs_clarification: bool,
	#[serde(default)]
	clarification_question: Option<String>,
}

impl ScoutService {
	/// Never fails: errors, timeouts and malformed output all yield `QueryAnalysis::fallback`.
	pub async fn analyze_query(&self, query: &str, history: &[HistoryMessage]) -> QueryAnalysis {
		let cfg = &self.cfg.search.analysis;
		let history = recent_history(history, cfg.history_messages as usize);
		let key = analysis_cache_key(query, history);

		if let Some(cached) = self.analyses.get(&key) {
			return cached;
		}

		let messages = build_messages(query, history);
		let call = self.providers.llm.complete_json(&self.cfg.providers.llm, &messages);
		let raw = match tokio::time::timeout(Duration::from_millis(cfg.timeout_ms), call).await {
			Ok(Ok(raw)) => raw,
			Ok(Err(err)) => {
				tracing::warn!(error = %err, "Query analysis failed. Using fallback analysis.");

				return QueryAnalysis::fallback(query);
			},
			Err(_) => {
				tracing::warn!(
					timeout_ms = cfg.timeout_ms,
					"Query analysis timed out. Using fallback analysis."
				);

				return QueryAnalysis::fallback(query);
			},
		};
		let Some(analysis) = parse_analysis(query, raw) else {
			tracing::warn!("Query analysis returned an unexpected shape. Using fallback analysis.");

			return QueryAnalysis::fallback(query);
		};

		self.analyses.insert(key, analysis.clone());

		analysis
	}
}

fn recent_history(history: &[HistoryMessage], keep: usize) -> &[HistoryMessage] {
	&history[history.len().saturating_sub(keep)..]
}

pub(crate) fn analysis_cache_key(query: &str, history: &[HistoryMessage]) -> String {
	let mut hasher = blake3::Hasher::new();

	hasher.update(query.trim().as_bytes());

	for message in history {
		hasher.update(b"\x1f");
		hasher.update(message.role.as_bytes());
		hasher.update(b"\x1e");
		hasher.update(message.content.as_bytes());
	}

	hasher.finalize().to_hex().to_string()
}

fn build_messages(query: &str, history: &[HistoryMessage]) -> Vec<Value> {
	let mut user = String::new();

	if !history.is_empty() {
		user.push_str("Conversation so far:\n");

		for message in history {
			user.push_str(&format!("{}: {}\n", message.role, message.content.trim()));
		}

		user.push('\n');
	}

	user.push_str("Question: ");
	user.push_str(query.trim());

	vec![
		serde_json::json!({ "role": "system", "content": ANALYSIS_SYSTEM_PROMPT }),
		serde_json::json!({ "role": "user", "content": user }),
	]
}

/// Trims, dedupes case-insensitively, pins the original query first and caps the query list.
pub(crate) fn parse_analysis(query: &str, raw: Value) -> Option<QueryAnalysis> {
	let raw: RawAnalysis = serde_json::from_value(raw).ok()?;
	let original = query.trim().to_string();
	let mut seen = HashSet::new();
	let mut search_queries = Vec::new();

	for candidate in std::iter::once(original.clone()).chain(raw.search_queries) {
		let candidate = candidate.trim().to_string();

		if candidate.is_empty() || !seen.insert(candidate.to_lowercase()) {
			continue;
		}

		search_queries.push(candidate);

		if search_queries.len() == MAX_SEARCH_QUERIES {
			break;
		}
	}

	let keywords: Vec<String> = {
		let mut seen = HashSet::new();

		raw.keywords
			.into_iter()
			.map(|keyword| keyword.trim().to_lowercase())
			.filter(|keyword| !keyword.is_empty() && seen.insert(keyword.clone()))
			.take(MAX_KEYWORDS)
			.collect()
	};
	let intent = raw
		.intent
		.map(|intent| intent.trim().to_string())
		.filter(|intent| !intent.is_empty())
		.unwrap_or_else(|| FALLBACK_INTENT.to_string());
	let clarification_question = raw
		.clarification_question
		.map(|question| question.trim().to_string())
		.filter(|question| !question.is_empty());

	Some(QueryAnalysis {
		intent,
		search_queries,
		keywords: if keywords.is_empty() { keywords_from(&original) } else { keywords },
		confidence: raw
			.confidence
			.filter(|value| value.is_finite())
			.map(|value| value.clamp(0.0, 1.0))
			.unwrap_or(FALLBACK_CONFIDENCE),
		needs_clarification: raw.needs_clarification && clarification_question.is_some(),
		clarification_question,
	})
}

fn keywords_from(query: &str) -> Vec<String> {
	let mut seen = HashSet::new();

	query
		.unicode_words()
		.map(str::to_lowercase)
		.filter(|word| word.chars().count() > 2 && !STOPWORDS.contains(&word.as_str()))
		.filter(|word| seen.insert(word.clone()))
		.take(MAX_KEYWORDS)
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn original_query_leads_and_duplicates_collapse() {
		let raw = serde_json::json!({
			"intent": "policy_lookup",
			"search_queries": ["Refund Policy", "what is the refund policy", "refund time limit", "returns", "extra"],
			"keywords": ["Refund", "refund", "policy"],
			"confidence": 1.7
		});
		let analysis = parse_analysis("what is the refund policy", raw).expect("Expected analysis.");

		assert_eq!(
			analysis.search_queries,
			vec!["what is the refund policy", "Refund Policy", "refund time limit", "returns"]
		);
		assert_eq!(analysis.keywords, vec!["refund", "policy"]);
		assert_eq!(analysis.confidence, 1.0);
		assert!(!analysis.needs_clarification);
	}

	#[test]
	fn fallback_keywords_skip_stopwords() {
		let analysis = QueryAnalysis::fallback("What is the refund policy for opened items?");

		assert_eq!(analysis.search_queries, vec!["What is the refund policy for opened items?"]);
		assert_eq!(analysis.keywords, vec!["refund", "policy", "opened", "items"]);
		assert_eq!(analysis.intent, "search");
	}

	#[test]
	fn non_object_output_is_rejected() {
		assert!(parse_analysis("q", serde_json::json!("I cannot help with that.")).is_none());
	}

	#[test]
	fn cache_key_depends_on_history() {
		let history = vec![HistoryMessage { role: "user".to_string(), content: "hi".to_string() }];

		assert_ne!(analysis_cache_key("q", &[]), analysis_cache_key("q", &history));
		assert_eq!(analysis_cache_key(" q ", &history), analysis_cache_key("q", &history));
		assert_eq!(recent_history(&history, 2).len(), 1);
		assert!(recent_history(&history, 0).is_empty());
	}
}
