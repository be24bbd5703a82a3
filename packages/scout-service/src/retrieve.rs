use std::{
	collections::{HashMap, HashSet},
	time::Duration,
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
	EmbeddingTask, Error, HistoryMessage, QueryAnalysis, Result, ScoutService,
	background::ContextWrite,
};
use scout_config::{EmbeddingProviderConfig, SearchFanout};
use scout_domain::{
	context_cache::CachedRetrievalContext,
	expansion,
	filter::{FilterOutcome, RetrievalFilter, SubFilter},
	fusion,
	passage::{self, EnrichedSource, FusedHit, SearchHit},
	rerank_policy, scoring,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
	/// One query, one search, no fusion or rerank.
	Fast,
	#[default]
	Smart,
	/// Always reranks, then expands around a dominant document.
	Deep,
}
impl SearchMode {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Fast => "fast",
			Self::Smart => "smart",
			Self::Deep => "deep",
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrieveRequest {
	pub tenant_id: String,
	pub project_id: String,
	pub query: String,
	#[serde(default)]
	pub mode: SearchMode,
	#[serde(default)]
	pub conversation_id: Option<String>,
	#[serde(default)]
	pub filter: Option<SubFilter>,
	#[serde(default)]
	pub history: Vec<HistoryMessage>,
	#[serde(default)]
	pub include_analysis: bool,
	/// Selects an alternate embedding provider by `provider_id`.
	#[serde(default)]
	pub embedding_provider: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrieveResponse {
	pub sources: Vec<EnrichedSource>,
	pub used_cache: bool,
	pub cache_reason: Option<String>,
	pub confidence: f32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub analysis: Option<QueryAnalysis>,
	/// Queries that were actually searched.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub queries: Option<Vec<String>>,
}

struct ModeRun {
	sources: Vec<EnrichedSource>,
	queries: Vec<String>,
	fusion_lists: usize,
	candidate_count: usize,
	reranked: bool,
	expanded: bool,
	query_embedding: Option<Vec<f32>>,
}

impl ScoutService {
	/// Retrieves ranked, cited passages for `req.query` inside one tenant's project.
	///
	/// Only authorization, request validation, the query embedding and the primary vector searches
	/// can fail the call. Analysis, rerank, expansion and the conversation cache degrade instead.
	pub async fn retrieve(&self, req: RetrieveRequest) -> Result<RetrieveResponse> {
		let tenant_id = required(&req.tenant_id, "tenant_id")?;
		let project_id = required(&req.project_id, "project_id")?;
		let query = required(&req.query, "query")?;
		let embedding_cfg =
			self.cfg.providers.embedding_for(req.embedding_provider.as_deref()).ok_or_else(|| {
				Error::invalid_request(format!(
					"Unknown embedding provider '{}'.",
					req.embedding_provider.as_deref().unwrap_or_default()
				))
			})?;
		let conversation_id =
			req.conversation_id.as_deref().map(str::trim).filter(|id| !id.is_empty());
		let project_ids = self.authorized_project_documents(tenant_id, project_id).await?;
		let wants_analysis = req.mode != SearchMode::Fast || req.include_analysis;
		let (analysis, cached) = tokio::join!(
			async {
				if wants_analysis { Some(self.analyze_query(query, &req.history).await) } else { None }
			},
			async {
				match conversation_id {
					Some(conversation_id) => self.load_context(tenant_id, conversation_id).await,
					None => None,
				}
			},
		);
		let filter_outcome =
			self.narrow_project_filter(tenant_id, &project_ids, req.filter.as_ref()).await?;
		let cached = cached.filter(|context| {
			if !Self::is_context_current(context, &project_ids) {
				tracing::info!(
					conversation_id = conversation_id.unwrap_or_default(),
					"Cached context references documents no longer in the project."
				);

				return false;
			}
			if !Self::is_context_in_scope(context, &filter_outcome) {
				tracing::info!(
					conversation_id = conversation_id.unwrap_or_default(),
					"Cached context falls outside the request filter."
				);

				return false;
			}

			true
		});
		let mut cache_reason = None;
		let mut similarity_embedding = None;

		if conversation_id.is_some() {
			let reuse = self.decide_context_reuse(query, cached.as_ref(), embedding_cfg).await;

			if reuse.decision.use_cache
				&& let Some(cached) = cached
			{
				let sources = cached.sources;
				let confidence = scoring::estimate_confidence(&sources);

				tracing::info!(
					mode = req.mode.as_str(),
					used_cache = true,
					cache_reason = reuse.decision.reason.as_str(),
					source_count = sources.len(),
					"Retrieval served from conversation cache."
				);

				return Ok(RetrieveResponse {
					sources,
					used_cache: true,
					cache_reason: Some(reuse.decision.reason.as_str().to_string()),
					confidence,
					analysis: analysis.filter(|_| req.include_analysis),
					queries: None,
				});
			}

			cache_reason = Some(reuse.decision.reason.as_str().to_string());
			similarity_embedding = reuse.query_embedding;
		}

		let filter = match filter_outcome {
			FilterOutcome::Scoped(filter) => filter,
			FilterOutcome::NoMatch => {
				tracing::info!(
					mode = req.mode.as_str(),
					used_cache = false,
					"Sub-filter matched no project documents."
				);

				return Ok(RetrieveResponse {
					sources: Vec::new(),
					used_cache: false,
					cache_reason,
					confidence: 0.0,
					analysis: analysis.filter(|_| req.include_analysis),
					queries: req.include_analysis.then(Vec::new),
				});
			},
		};
		let run = match req.mode {
			SearchMode::Fast =>
				self.search_fast(&filter, query, embedding_cfg, similarity_embedding.take()).await?,
			SearchMode::Smart => {
				let queries = fanout_queries(query, analysis.as_ref(), &self.cfg.search.smart);

				self.search_smart(&filter, query, queries, embedding_cfg).await?
			},
			SearchMode::Deep => {
				let queries = fanout_queries(query, analysis.as_ref(), &self.cfg.search.deep);

				self.search_deep(&filter, query, queries, embedding_cfg).await?
			},
		};
		let ModeRun {
			mut sources,
			queries,
			fusion_lists,
			candidate_count,
			reranked,
			expanded,
			query_embedding,
		} = run;

		passage::assign_citations(&mut sources);
		scoring::finalize_relevance(&mut sources, fusion_lists);

		let confidence = scoring::estimate_confidence(&sources);

		if let Some(conversation_id) = conversation_id
			&& !sources.is_empty()
		{
			self.submit_context(
				tenant_id,
				conversation_id,
				query,
				&sources,
				query_embedding.or(similarity_embedding),
				&embedding_cfg.provider_id,
			);
		}

		tracing::info!(
			mode = req.mode.as_str(),
			used_cache = false,
			query_count = queries.len(),
			candidate_count,
			reranked,
			expanded,
			source_count = sources.len(),
			"Retrieval completed."
		);

		Ok(RetrieveResponse {
			sources,
			used_cache: false,
			cache_reason,
			confidence,
			analysis: analysis.filter(|_| req.include_analysis),
			queries: req.include_analysis.then_some(queries),
		})
	}

	async fn search_fast(
		&self,
		filter: &RetrievalFilter,
		query: &str,
		embedding_cfg: &EmbeddingProviderConfig,
		precomputed: Option<Vec<f32>>,
	) -> Result<ModeRun> {
		let queries = vec![query.to_string()];
		let vector = match precomputed {
			Some(vector) => vector,
			None => self.embed_queries(embedding_cfg, &queries).await?.swap_remove(0),
		};
		let hits =
			self.backends.index.search(filter, vector.clone(), self.cfg.search.fast.max_hits).await?;
		let candidate_count = hits.len();
		let names = self.document_names(filter.tenant_id(), hits.iter().map(|hit| &hit.document_id)).await;
		let sources = hits
			.into_iter()
			.map(|hit| {
				let name = display_name(&names, &hit.document_id);

				EnrichedSource::from_vector_hit(hit, name)
			})
			.collect();

		Ok(ModeRun {
			sources,
			queries,
			fusion_lists: 1,
			candidate_count,
			reranked: false,
			expanded: false,
			query_embedding: Some(vector),
		})
	}

	/// Reranks only when the fused ranking is ambiguous.
	async fn search_smart(
		&self,
		filter: &RetrievalFilter,
		query: &str,
		queries: Vec<String>,
		embedding_cfg: &EmbeddingProviderConfig,
	) -> Result<ModeRun> {
		let fanout = &self.cfg.search.smart;
		let top_k = fanout.rerank_top_k as usize;
		let (fused, fusion_lists, query_embedding) =
			self.fused_candidates(filter, &queries, embedding_cfg, fanout).await?;
		let decision = rerank_policy::decide_rerank(
			&fused.iter().map(|hit| hit.fused_score).collect::<Vec<_>>(),
		);
		let candidate_count = fused.len();
		let candidates = self.enrich_fused(filter.tenant_id(), fused).await;

		tracing::debug!(decision = decision.as_str(), candidate_count, "Rerank decision.");

		let (sources, reranked) = if decision.should_rerank() {
			let outcome = self.rerank_sources(query, candidates, fusion_lists, top_k).await;

			(outcome.sources, outcome.reranked)
		} else {
			let mut candidates = candidates;

			candidates.truncate(top_k);

			(candidates, false)
		};

		Ok(ModeRun {
			sources,
			queries,
			fusion_lists,
			candidate_count,
			reranked,
			expanded: false,
			query_embedding,
		})
	}

	async fn search_deep(
		&self,
		filter: &RetrievalFilter,
		query: &str,
		queries: Vec<String>,
		embedding_cfg: &EmbeddingProviderConfig,
	) -> Result<ModeRun> {
		let fanout = &self.cfg.search.deep;
		let (fused, fusion_lists, query_embedding) =
			self.fused_candidates(filter, &queries, embedding_cfg, fanout).await?;
		let candidate_count = fused.len();
		let candidates = self.enrich_fused(filter.tenant_id(), fused).await;
		let outcome = self
			.rerank_sources(query, candidates, fusion_lists, fanout.rerank_top_k as usize)
			.await;
		let (sources, expanded) = self.expand_sources(filter, outcome.sources).await;

		Ok(ModeRun {
			sources,
			queries,
			fusion_lists,
			candidate_count,
			reranked: outcome.reranked,
			expanded,
			query_embedding,
		})
	}

	/// Embeds all queries in one call, searches them concurrently and fuses the lists.
	///
	/// Returns the fused top hits, the number of fused lists and the first query's vector.
	async fn fused_candidates(
		&self,
		filter: &RetrievalFilter,
		queries: &[String],
		embedding_cfg: &EmbeddingProviderConfig,
		fanout: &SearchFanout,
	) -> Result<(Vec<FusedHit>, usize, Option<Vec<f32>>)> {
		let vectors = self.embed_queries(embedding_cfg, queries).await?;
		let first = vectors.first().cloned();
		let searches = vectors
			.into_iter()
			.map(|vector| self.backends.index.search(filter, vector, fanout.per_query_limit));
		let lists = futures::future::join_all(searches)
			.await
			.into_iter()
			.collect::<Result<Vec<Vec<SearchHit>>>>()?;
		let fused = fusion::fuse_top(&lists, fanout.fused_limit as usize);

		Ok((fused, lists.len(), first))
	}

	async fn embed_queries(
		&self,
		embedding_cfg: &EmbeddingProviderConfig,
		queries: &[String],
	) -> Result<Vec<Vec<f32>>> {
		let call = self.providers.embedding.embed(embedding_cfg, queries, EmbeddingTask::Query);
		let vectors = tokio::time::timeout(Duration::from_millis(embedding_cfg.timeout_ms), call)
			.await
			.map_err(|_| Error::Timeout { operation: "query embedding".to_string() })??;

		if vectors.len() != queries.len() || vectors.is_empty() {
			return Err(Error::Provider {
				message: format!(
					"Embedding provider returned {} vectors for {} queries.",
					vectors.len(),
					queries.len()
				),
			});
		}

		Ok(vectors)
	}

	async fn enrich_fused(&self, tenant_id: &str, fused: Vec<FusedHit>) -> Vec<EnrichedSource> {
		let names = self.document_names(tenant_id, fused.iter().map(|hit| &hit.hit.document_id)).await;

		fused
			.into_iter()
			.map(|hit| {
				let name = display_name(&names, &hit.hit.document_id);

				EnrichedSource::from_fused_hit(hit, name)
			})
			.collect()
	}

	/// Display names are cosmetic, so a failed lookup falls back to document ids.
	async fn document_names<'a>(
		&self,
		tenant_id: &str,
		document_ids: impl Iterator<Item = &'a String>,
	) -> HashMap<String, String> {
		let ids = unique_document_ids(document_ids);

		if ids.is_empty() {
			return HashMap::new();
		}

		match self.backends.catalog.document_names(tenant_id, &ids).await {
			Ok(names) => names,
			Err(err) => {
				tracing::warn!(error = %err, "Document name lookup failed. Using document ids.");

				HashMap::new()
			},
		}
	}

	/// Adds neighbors of a dominant document's chunks. A failed chunk fetch adds nothing, but the
	/// set is still put into reading order.
	async fn expand_sources(
		&self,
		filter: &RetrievalFilter,
		sources: Vec<EnrichedSource>,
	) -> (Vec<EnrichedSource>, bool) {
		let max_added = self.cfg.search.expansion.max_added_chunks as usize;
		let Some(plan) = expansion::plan_expansion(&sources, max_added) else {
			return (sources, false);
		};
		let fetched: HashMap<u32, String> = if plan.candidates.is_empty() {
			HashMap::new()
		} else {
			match self.backends.index.fetch_chunks(filter, &plan.document_id, &plan.candidates).await {
				Ok(hits) => hits.into_iter().map(|hit| (hit.chunk_index, hit.text)).collect(),
				Err(err) => {
					tracing::warn!(
						error = %err,
						document_id = %plan.document_id,
						"Neighbor chunk fetch failed. Skipping expansion."
					);

					HashMap::new()
				},
			}
		};

		(expansion::apply_expansion(sources, &plan, &fetched, max_added), true)
	}

	fn submit_context(
		&self,
		tenant_id: &str,
		conversation_id: &str,
		query: &str,
		sources: &[EnrichedSource],
		query_embedding: Option<Vec<f32>>,
		embedding_provider_id: &str,
	) {
		let retrieved_at = OffsetDateTime::now_utc();
		let ttl = time::Duration::seconds(self.cfg.cache.context_ttl_seconds as i64);
		let context = CachedRetrievalContext {
			sources: sources.to_vec(),
			originating_query: query.to_string(),
			context_text: passage::render_context_text(sources),
			retrieved_at,
			expires_at: retrieved_at + ttl,
			document_ids: unique_document_ids(sources.iter().map(|source| &source.document_id)),
			embedding_provider_id: query_embedding
				.as_ref()
				.map(|_| embedding_provider_id.to_string()),
			query_embedding,
		};

		self.context_writer.submit(ContextWrite {
			tenant_id: tenant_id.to_string(),
			conversation_id: conversation_id.to_string(),
			context,
		});
	}
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
	let trimmed = value.trim();

	if trimmed.is_empty() {
		return Err(Error::invalid_request(format!("{field} must be non-empty.")));
	}

	Ok(trimmed)
}

/// The analysis queries capped by the mode's fan-out, never empty.
fn fanout_queries(query: &str, analysis: Option<&QueryAnalysis>, fanout: &SearchFanout) -> Vec<String> {
	let queries: Vec<String> = analysis
		.map(|analysis| {
			analysis.search_queries.iter().take(fanout.max_queries as usize).cloned().collect()
		})
		.unwrap_or_default();

	if queries.is_empty() { vec![query.to_string()] } else { queries }
}

fn unique_document_ids<'a>(document_ids: impl Iterator<Item = &'a String>) -> Vec<String> {
	let mut seen = HashSet::new();

	document_ids.filter(|id| seen.insert(id.as_str())).cloned().collect()
}

fn display_name(names: &HashMap<String, String>, document_id: &str) -> String {
	names.get(document_id).cloned().unwrap_or_else(|| document_id.to_string())
}
