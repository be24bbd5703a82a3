//! Adjacent-chunk expansion around a dominant document.

use std::collections::{HashMap, HashSet};

use crate::{
	passage::{EnrichedSource, PassageKey},
	scoring::{ScoreKind, SUPPORTING_SCORE},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpansionPlan {
	pub document_id: String,
	/// Neighbor chunk indices to fetch, in the order they should be added.
	pub candidates: Vec<u32>,
}

/// The document holding strictly more than half of `sources`, if any.
pub fn dominant_document(sources: &[EnrichedSource]) -> Option<&str> {
	let mut counts: HashMap<&str, usize> = HashMap::new();

	for source in sources {
		*counts.entry(source.document_id.as_str()).or_insert(0) += 1;
	}

	// A strict majority is unique, so map iteration order does not matter.
	counts.into_iter().find(|(_, count)| count * 2 > sources.len()).map(|(document_id, _)| document_id)
}

/// Lists the neighbors of the dominant document's chunks that are not already present.
///
/// Chunks are visited in rank order, left neighbor before right. Chunk 0 has no left neighbor.
pub fn plan_expansion(sources: &[EnrichedSource], max_added: usize) -> Option<ExpansionPlan> {
	let document_id = dominant_document(sources)?.to_string();

	if max_added == 0 {
		return Some(ExpansionPlan { document_id, candidates: Vec::new() });
	}

	let present: HashSet<u32> = sources
		.iter()
		.filter(|source| source.document_id == document_id)
		.map(|source| source.chunk_index)
		.collect();
	let mut seen = present.clone();
	let mut candidates = Vec::new();

	for source in sources.iter().filter(|source| source.document_id == document_id) {
		let left = source.chunk_index.checked_sub(1);
		let right = source.chunk_index.checked_add(1);

		for neighbor in [left, right].into_iter().flatten() {
			if seen.insert(neighbor) {
				candidates.push(neighbor);
			}
		}
	}

	Some(ExpansionPlan { document_id, candidates })
}

/// Adds fetched neighbors as supporting context, then reorders everything into reading order.
///
/// `fetched` holds the neighbor passages the index actually returned; plan candidates with no
/// stored chunk are skipped and do not count against `max_added`.
pub fn apply_expansion(
	mut sources: Vec<EnrichedSource>,
	plan: &ExpansionPlan,
	fetched: &HashMap<u32, String>,
	max_added: usize,
) -> Vec<EnrichedSource> {
	let document_name = sources
		.iter()
		.find(|source| source.document_id == plan.document_id)
		.map(|source| source.document_name.clone())
		.unwrap_or_default();
	let mut added = 0;

	for chunk_index in &plan.candidates {
		if added >= max_added {
			break;
		}

		let Some(text) = fetched.get(chunk_index) else {
			continue;
		};

		sources.push(supporting_source(&plan.document_id, &document_name, *chunk_index, text));

		added += 1;
	}

	reading_order(sources)
}

fn supporting_source(
	document_id: &str,
	document_name: &str,
	chunk_index: u32,
	text: &str,
) -> EnrichedSource {
	EnrichedSource {
		citation: 0,
		document_id: document_id.to_string(),
		document_name: document_name.to_string(),
		chunk_index,
		text: text.to_string(),
		score: SUPPORTING_SCORE,
		score_kind: ScoreKind::Supporting,
		scores: Default::default(),
		relevance: 0.0,
	}
}

/// Groups by document (groups ordered by first appearance) and sorts chunks ascending inside each.
pub fn reading_order(sources: Vec<EnrichedSource>) -> Vec<EnrichedSource> {
	let mut group_rank: HashMap<String, usize> = HashMap::new();

	for source in &sources {
		let next = group_rank.len();

		group_rank.entry(source.document_id.clone()).or_insert(next);
	}

	let mut seen: HashSet<PassageKey> = HashSet::new();
	let mut out: Vec<EnrichedSource> =
		sources.into_iter().filter(|source| seen.insert(source.key())).collect();

	out.sort_by_key(|source| (group_rank[&source.document_id], source.chunk_index));

	out
}
