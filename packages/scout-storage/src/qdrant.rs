//! Chunk search over the Qdrant collection, and the one adapter from point payloads to `SearchHit`.

use std::collections::HashMap;

use qdrant_client::qdrant::{
	Condition, Filter, MinShould, Query, QueryPointsBuilder, Value, value::Kind,
};

use crate::Result;
use scout_domain::{filter::RetrievalFilter, passage::SearchHit};

pub const TENANT_FIELD: &str = "tenant_id";
pub const DOCUMENT_FIELD: &str = "document_id";
pub const CHUNK_INDEX_FIELD: &str = "chunk_index";
pub const TEXT_FIELD: &str = "text";
/// Field names written by the previous indexer.
pub const LEGACY_DOCUMENT_FIELD: &str = "doc_id";
pub const LEGACY_TEXT_FIELD: &str = "content";

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}
impl QdrantStore {
	pub fn new(cfg: &scout_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	/// Nearest chunks to `vector` inside `filter`. Scores are cosine similarity scaled to 0-100.
	pub async fn search(
		&self,
		filter: &RetrievalFilter,
		vector: Vec<f32>,
		limit: u32,
	) -> Result<Vec<SearchHit>> {
		let search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector))
			.filter(scope_filter(filter))
			.with_payload(true)
			.limit(limit as u64);
		let response = self.client.query(search).await?;

		Ok(response
			.result
			.iter()
			.filter_map(|point| hit_from_payload(&point.payload, similarity_to_percent(point.score)))
			.filter(|hit| filter.contains_document(&hit.document_id))
			.collect())
	}

	/// Loads specific chunks of one document. Missing chunks are simply absent from the result.
	pub async fn fetch_chunks(
		&self,
		filter: &RetrievalFilter,
		document_id: &str,
		chunk_indices: &[u32],
	) -> Result<Vec<SearchHit>> {
		if chunk_indices.is_empty() || !filter.contains_document(document_id) {
			return Ok(Vec::new());
		}

		let indices: Vec<i64> = chunk_indices.iter().map(|idx| *idx as i64).collect();
		let chunk_filter = Filter {
			must: vec![
				Condition::matches(TENANT_FIELD, filter.tenant_id().to_string()),
				Condition::matches(CHUNK_INDEX_FIELD, indices),
			],
			should: Vec::new(),
			must_not: Vec::new(),
			min_should: Some(document_min_should(&[document_id.to_string()])),
		};
		let request = QueryPointsBuilder::new(self.collection.clone())
			.filter(chunk_filter)
			.with_payload(true)
			.limit(chunk_indices.len() as u64);
		let response = self.client.query(request).await?;

		Ok(response
			.result
			.iter()
			.filter_map(|point| hit_from_payload(&point.payload, 0.0))
			.filter(|hit| hit.document_id == document_id)
			.collect())
	}
}

/// Tenant is always a `must` term, next to the allowed document set.
pub fn scope_filter(filter: &RetrievalFilter) -> Filter {
	Filter {
		must: vec![Condition::matches(TENANT_FIELD, filter.tenant_id().to_string())],
		should: Vec::new(),
		must_not: Vec::new(),
		min_should: Some(document_min_should(filter.document_ids())),
	}
}

fn document_min_should(document_ids: &[String]) -> MinShould {
	MinShould {
		min_count: 1,
		conditions: vec![
			Condition::matches(DOCUMENT_FIELD, document_ids.to_vec()),
			Condition::matches(LEGACY_DOCUMENT_FIELD, document_ids.to_vec()),
		],
	}
}

pub fn similarity_to_percent(similarity: f32) -> f32 {
	if !similarity.is_finite() {
		return 0.0;
	}

	(similarity * 100.0).clamp(0.0, 100.0)
}

/// Builds a hit from a point payload, accepting the legacy field names. Points without a
/// document id, chunk index or text are dropped.
pub fn hit_from_payload(payload: &HashMap<String, Value>, score: f32) -> Option<SearchHit> {
	let document_id = payload_str(payload, DOCUMENT_FIELD)
		.or_else(|| payload_str(payload, LEGACY_DOCUMENT_FIELD))?;
	let chunk_index = payload_u32(payload, CHUNK_INDEX_FIELD)?;
	let text =
		payload_str(payload, TEXT_FIELD).or_else(|| payload_str(payload, LEGACY_TEXT_FIELD))?;

	Some(SearchHit { document_id, chunk_index, score, text })
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	match &payload.get(key)?.kind {
		Some(Kind::StringValue(text)) if !text.is_empty() => Some(text.clone()),
		_ => None,
	}
}

fn payload_u32(payload: &HashMap<String, Value>, key: &str) -> Option<u32> {
	match &payload.get(key)?.kind {
		Some(Kind::IntegerValue(value)) => u32::try_from(*value).ok(),
		Some(Kind::DoubleValue(value)) =>
			if value.fract() == 0.0 {
				u32::try_from(*value as i64).ok()
			} else {
				None
			},
		_ => None,
	}
}
