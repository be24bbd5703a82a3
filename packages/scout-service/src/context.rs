use std::{collections::HashSet, time::Duration};

use time::OffsetDateTime;

use crate::{EmbeddingTask, ScoutService};
use scout_config::EmbeddingProviderConfig;
use scout_domain::{
	context_cache::{
		self, CacheDecision, CachePreliminary, CachedRetrievalContext, SimilarityThresholds,
	},
	filter::FilterOutcome,
};

pub(crate) struct ContextReuse {
	pub(crate) decision: CacheDecision,
	/// Embedding of the new query, when the similarity step computed one.
	pub(crate) query_embedding: Option<Vec<f32>>,
}

impl ScoutService {
	/// Reads the conversation's cached context. A failed read is logged and treated as a miss.
	pub(crate) async fn load_context(
		&self,
		tenant_id: &str,
		conversation_id: &str,
	) -> Option<CachedRetrievalContext> {
		match self.backends.conversations.read(tenant_id, conversation_id).await {
			Ok(context) => context,
			Err(err) => {
				tracing::warn!(
					error = %err,
					conversation_id = %conversation_id,
					"Context cache read failed. Retrieving fresh."
				);

				None
			},
		}
	}

	/// Runs the reuse state machine. Only the last step touches the embedding provider, and its
	/// failure means reuse.
	pub(crate) async fn decide_context_reuse(
		&self,
		query: &str,
		cached: Option<&CachedRetrievalContext>,
		embedding_cfg: &EmbeddingProviderConfig,
	) -> ContextReuse {
		let now = OffsetDateTime::now_utc();
		let thresholds = self.similarity_thresholds();

		if let CachePreliminary::Decided(decision) =
			context_cache::preliminary_decision(query, cached, now)
		{
			return ContextReuse { decision, query_embedding: None };
		}

		let Some(cached) = cached else {
			return ContextReuse {
				decision: context_cache::decide(query, None, now, thresholds, |_| None),
				query_embedding: None,
			};
		};
		let (similarity, query_embedding) = self.query_similarity(query, cached, embedding_cfg).await;

		ContextReuse {
			decision: context_cache::decide_by_similarity(similarity, thresholds),
			query_embedding,
		}
	}

	async fn query_similarity(
		&self,
		query: &str,
		cached: &CachedRetrievalContext,
		embedding_cfg: &EmbeddingProviderConfig,
	) -> (Option<f32>, Option<Vec<f32>>) {
		let same_provider =
			cached.embedding_provider_id.as_deref() == Some(embedding_cfg.provider_id.as_str());
		let stored = cached
			.query_embedding
			.as_ref()
			.filter(|vec| same_provider && vec.len() == embedding_cfg.dimensions as usize);
		let mut texts = vec![query.to_string()];

		if stored.is_none() {
			texts.push(cached.originating_query.clone());
		}

		let call = self.providers.embedding.embed(embedding_cfg, &texts, EmbeddingTask::Query);
		let mut vectors = match tokio::time::timeout(
			Duration::from_millis(embedding_cfg.timeout_ms),
			call,
		)
		.await
		{
			Ok(Ok(vectors)) if vectors.len() == texts.len() => vectors,
			Ok(Ok(vectors)) => {
				tracing::warn!(
					expected = texts.len(),
					received = vectors.len(),
					"Similarity embedding returned the wrong number of vectors. Reusing context."
				);

				return (None, None);
			},
			Ok(Err(err)) => {
				tracing::warn!(error = %err, "Similarity embedding failed. Reusing context.");

				return (None, None);
			},
			Err(_) => {
				tracing::warn!(
					timeout_ms = embedding_cfg.timeout_ms,
					"Similarity embedding timed out. Reusing context."
				);

				return (None, None);
			},
		};
		let previous = match stored {
			Some(vec) => vec.clone(),
			None => vectors.pop().unwrap_or_default(),
		};
		let current = vectors.swap_remove(0);
		let similarity = context_cache::cosine_similarity(&current, &previous);

		(Some(similarity), Some(current))
	}

	/// Treats a context as absent once any of its documents left the project.
	pub(crate) fn is_context_current(
		cached: &CachedRetrievalContext,
		project_document_ids: &[String],
	) -> bool {
		let members: HashSet<&str> = project_document_ids.iter().map(String::as_str).collect();

		cached.document_ids.iter().all(|id| members.contains(id.as_str()))
	}

	/// Treats a context as absent when the request's sub-filter would exclude any of its documents.
	pub(crate) fn is_context_in_scope(
		cached: &CachedRetrievalContext,
		outcome: &FilterOutcome,
	) -> bool {
		match outcome {
			FilterOutcome::Scoped(filter) =>
				cached.document_ids.iter().all(|id| filter.contains_document(id)),
			FilterOutcome::NoMatch => false,
		}
	}

	fn similarity_thresholds(&self) -> SimilarityThresholds {
		SimilarityThresholds {
			reuse: self.cfg.cache.reuse_similarity,
			fresh: self.cfg.cache.fresh_similarity,
		}
	}
}
