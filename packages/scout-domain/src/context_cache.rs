//! Whether a conversation's cached retrieval can answer the next query.
//!
//! Checks run in a fixed order and the first match wins. Everything before the similarity step is
//! local string work; only a query that survives all of them costs an embedding call.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

use crate::passage::EnrichedSource;

pub const DEFAULT_CONTEXT_TTL: Duration = Duration::minutes(5);
pub const SHORT_QUERY_MAX_WORDS: usize = 5;
pub const FRAGMENT_MAX_WORDS: usize = 2;

/// Lexical classes recognized by the pattern table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryClass {
	FollowUp,
	NewTopic,
}

/// Patterns are matched against the NFKC-normalized, lowercased, trimmed query.
pub const QUERY_PATTERNS: &[(&str, QueryClass)] = &[
	(r"^tell me more\b", QueryClass::FollowUp),
	(r"^explain\b", QueryClass::FollowUp),
	(r"^(how|what) about\b", QueryClass::FollowUp),
	(r"^(why|how|when|where|who)\s+(does|do|did|is|are|was|were)\b", QueryClass::FollowUp),
	(r"\byou (mentioned|said)\b", QueryClass::FollowUp),
	(r"^(can you )?elaborate\b", QueryClass::FollowUp),
	(r"^(any )?more details?\b", QueryClass::FollowUp),
	(r"^now\b", QueryClass::NewTopic),
	(r"^moving on\b", QueryClass::NewTopic),
	(r"\bdifferent (question|topic)\b", QueryClass::NewTopic),
	(r"^forget (that|it|about)\b", QueryClass::NewTopic),
	(r"^(new|unrelated) (question|topic)\b", QueryClass::NewTopic),
];

const CONTEXT_PRONOUNS: &[&str] = &["it", "this", "that", "they", "these", "those"];
const QUESTION_WORDS: &[&str] = &["what", "why", "how", "when", "where", "who", "which"];

static COMPILED_PATTERNS: LazyLock<Vec<(Regex, QueryClass)>> = LazyLock::new(|| {
	QUERY_PATTERNS
		.iter()
		.filter_map(|(pattern, class)| Regex::new(pattern).ok().map(|re| (re, *class)))
		.collect()
});

/// A conversation's last fresh retrieval, overwritten on every fresh retrieval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedRetrievalContext {
	pub sources: Vec<EnrichedSource>,
	pub originating_query: String,
	pub context_text: String,
	#[serde(with = "crate::time_serde")]
	pub retrieved_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub expires_at: OffsetDateTime,
	pub document_ids: Vec<String>,
	#[serde(default)]
	pub query_embedding: Option<Vec<f32>>,
	/// Provider that produced `query_embedding`; vectors from other providers are not comparable.
	#[serde(default)]
	pub embedding_provider_id: Option<String>,
}
impl CachedRetrievalContext {
	pub fn is_expired(&self, now: OffsetDateTime) -> bool {
		now >= self.expires_at
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheReason {
	NoCache,
	Expired,
	FollowUpPattern,
	NewTopicPattern,
	ShortContextual,
	VerySimilar { similarity: f32 },
	FollowUp { similarity: f32 },
	DifferentTopic { similarity: f32 },
	SimilarityUnavailable,
}
impl CacheReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::NoCache => "no cache available",
			Self::Expired => "cache expired",
			Self::FollowUpPattern => "follow-up pattern",
			Self::NewTopicPattern => "new topic pattern",
			Self::ShortContextual => "short contextual query",
			Self::VerySimilar { .. } => "very similar query",
			Self::FollowUp { .. } => "follow-up",
			Self::DifferentTopic { .. } => "different topic",
			Self::SimilarityUnavailable => "similarity unavailable",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CacheDecision {
	pub use_cache: bool,
	pub reason: CacheReason,
}
impl CacheDecision {
	fn reuse(reason: CacheReason) -> Self {
		Self { use_cache: true, reason }
	}

	fn fresh(reason: CacheReason) -> Self {
		Self { use_cache: false, reason }
	}
}

/// Outcome of the checks that need no network call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CachePreliminary {
	Decided(CacheDecision),
	NeedsSimilarity,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarityThresholds {
	/// At or above: reuse as a very similar query.
	pub reuse: f32,
	/// Below: fresh retrieval for a different topic.
	pub fresh: f32,
}
impl Default for SimilarityThresholds {
	fn default() -> Self {
		Self { reuse: 0.7, fresh: 0.3 }
	}
}

pub fn normalize_query(query: &str) -> String {
	query.nfkc().collect::<String>().trim().to_lowercase()
}

pub fn matches_class(query: &str, class: QueryClass) -> bool {
	let normalized = normalize_query(query);

	COMPILED_PATTERNS
		.iter()
		.any(|(re, pattern_class)| *pattern_class == class && re.is_match(&normalized))
}

/// Short queries leaning on a pronoun, or bare question-word fragments such as "why?".
pub fn is_short_contextual(query: &str) -> bool {
	let normalized = normalize_query(query);
	let words: Vec<&str> = normalized.unicode_words().collect();

	if words.is_empty() {
		return false;
	}
	if words.len() <= SHORT_QUERY_MAX_WORDS && words.iter().any(|w| CONTEXT_PRONOUNS.contains(w)) {
		return true;
	}

	words.len() <= FRAGMENT_MAX_WORDS && QUESTION_WORDS.contains(&words[0])
}

pub fn preliminary_decision(
	query: &str,
	cached: Option<&CachedRetrievalContext>,
	now: OffsetDateTime,
) -> CachePreliminary {
	let Some(cached) = cached else {
		return CachePreliminary::Decided(CacheDecision::fresh(CacheReason::NoCache));
	};

	if cached.is_expired(now) {
		return CachePreliminary::Decided(CacheDecision::fresh(CacheReason::Expired));
	}
	if matches_class(query, QueryClass::FollowUp) {
		return CachePreliminary::Decided(CacheDecision::reuse(CacheReason::FollowUpPattern));
	}
	if matches_class(query, QueryClass::NewTopic) {
		return CachePreliminary::Decided(CacheDecision::fresh(CacheReason::NewTopicPattern));
	}
	if is_short_contextual(query) {
		return CachePreliminary::Decided(CacheDecision::reuse(CacheReason::ShortContextual));
	}

	CachePreliminary::NeedsSimilarity
}

/// Final step. `None` means the similarity could not be computed and the cache is reused.
pub fn decide_by_similarity(
	similarity: Option<f32>,
	thresholds: SimilarityThresholds,
) -> CacheDecision {
	let Some(similarity) = similarity.filter(|value| value.is_finite()) else {
		return CacheDecision::reuse(CacheReason::SimilarityUnavailable);
	};

	if similarity >= thresholds.reuse {
		CacheDecision::reuse(CacheReason::VerySimilar { similarity })
	} else if similarity < thresholds.fresh {
		CacheDecision::fresh(CacheReason::DifferentTopic { similarity })
	} else {
		CacheDecision::reuse(CacheReason::FollowUp { similarity })
	}
}

/// Runs the full state machine with a synchronous similarity source.
pub fn decide<F>(
	query: &str,
	cached: Option<&CachedRetrievalContext>,
	now: OffsetDateTime,
	thresholds: SimilarityThresholds,
	similarity: F,
) -> CacheDecision
where
	F: FnOnce(&CachedRetrievalContext) -> Option<f32>,
{
	match (preliminary_decision(query, cached, now), cached) {
		(CachePreliminary::Decided(decision), _) => decision,
		(CachePreliminary::NeedsSimilarity, Some(cached)) =>
			decide_by_similarity(similarity(cached), thresholds),
		(CachePreliminary::NeedsSimilarity, None) => CacheDecision::fresh(CacheReason::NoCache),
	}
}

/// Cosine similarity; 0.0 when either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}

	let mut dot = 0.0_f32;
	let mut norm_a = 0.0_f32;
	let mut norm_b = 0.0_f32;

	for (x, y) in a.iter().zip(b) {
		dot += x * y;
		norm_a += x * x;
		norm_b += y * y;
	}

	if norm_a == 0.0 || norm_b == 0.0 {
		return 0.0;
	}

	dot / (norm_a.sqrt() * norm_b.sqrt())
}
