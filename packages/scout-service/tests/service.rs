use std::time::Duration;

use time::OffsetDateTime;

use scout_domain::{
	context_cache::CachedRetrievalContext,
	filter::SubFilter,
	passage::{self, EnrichedSource},
	scoring::ScoreKind,
};
use scout_service::{Error, RetrieveRequest, SearchMode};
use scout_testkit::{Harness, hit, test_config};

const TENANT: &str = "tenant-a";
const PROJECT: &str = "handbook";
const REFUND_QUERY: &str = "what is the refund policy";

fn request(query: &str, mode: SearchMode) -> RetrieveRequest {
	RetrieveRequest {
		tenant_id: TENANT.to_string(),
		project_id: PROJECT.to_string(),
		query: query.to_string(),
		mode,
		conversation_id: None,
		filter: None,
		history: Vec::new(),
		include_analysis: false,
		embedding_provider: None,
	}
}

fn in_conversation(mut req: RetrieveRequest, conversation_id: &str) -> RetrieveRequest {
	req.conversation_id = Some(conversation_id.to_string());

	req
}

fn chunks(sources: &[EnrichedSource]) -> Vec<(String, u32)> {
	sources.iter().map(|source| (source.document_id.clone(), source.chunk_index)).collect()
}

fn cached_context(
	originating_query: &str,
	document_ids: &[&str],
	query_embedding: Option<Vec<f32>>,
) -> CachedRetrievalContext {
	let retrieved_at = OffsetDateTime::now_utc();
	let embedding_provider_id = query_embedding.as_ref().map(|_| "local".to_string());
	let mut sources =
		vec![EnrichedSource::from_vector_hit(hit("doc1", 0, 80.0), "Refunds.pdf".to_string())];

	passage::assign_citations(&mut sources);

	CachedRetrievalContext {
		context_text: passage::render_context_text(&sources),
		sources,
		originating_query: originating_query.to_string(),
		retrieved_at,
		expires_at: retrieved_at + time::Duration::minutes(5),
		document_ids: document_ids.iter().map(|id| id.to_string()).collect(),
		query_embedding,
		embedding_provider_id,
	}
}

/// doc1 chunks 0-2 retrieved by three reformulations with overlapping results.
fn arrange_refund_scenario(harness: &Harness) {
	harness.catalog.set_project(TENANT, PROJECT, &["doc1", "doc2"]);
	harness.catalog.name("doc1", "Refunds.pdf");
	harness.llm.set_analysis(serde_json::json!({
		"intent": "policy_lookup",
		"search_queries": ["refund policy", "refund rules", "returns window"],
		"keywords": ["refund", "policy"],
		"confidence": 0.9
	}));
	harness.embedding.register(REFUND_QUERY, vec![0.0, 1.0, 0.0]);
	harness.embedding.register("refund policy", vec![0.0, 0.0, 1.0]);
	harness.embedding.register("refund rules", vec![0.0, 1.0, 1.0]);
	harness.embedding.register("returns window", vec![1.0, 1.0, 0.0]);
	harness.index.add_results(TENANT, vec![0.0, 1.0, 0.0], vec![
		hit("doc1", 0, 88.0),
		hit("doc1", 1, 80.0),
		hit("doc1", 2, 75.0),
	]);
	harness.index.add_results(TENANT, vec![0.0, 0.0, 1.0], vec![hit("doc1", 0, 90.0), hit("doc1", 2, 70.0)]);
	harness.index.add_results(TENANT, vec![0.0, 1.0, 1.0], vec![hit("doc1", 0, 86.0), hit("doc1", 1, 79.0)]);
	harness.index.add_results(TENANT, vec![1.0, 1.0, 0.0], vec![hit("doc2", 5, 60.0)]);
}

/// One query whose five hits fuse into an ambiguous ranking.
fn arrange_flat_ranking(harness: &Harness, query: &str) {
	harness.catalog.set_project(TENANT, PROJECT, &["doc1", "doc2"]);
	harness.embedding.register(query, vec![0.0, 1.0, 0.0]);
	harness.index.add_results(
		TENANT,
		vec![0.0, 1.0, 0.0],
		(0..5).map(|chunk| hit("doc1", chunk, 70.0 - chunk as f32)).collect(),
	);
}

#[tokio::test]
async fn foreign_project_is_denied_not_empty() {
	let harness = Harness::new();

	harness.catalog.set_project(TENANT, PROJECT, &["doc1"]);

	let mut req = request(REFUND_QUERY, SearchMode::Fast);

	req.tenant_id = "tenant-b".to_string();

	let err = harness.service.retrieve(req).await.expect_err("Expected access denial.");

	assert!(matches!(err, Error::ProjectAccessDenied { .. }));
	assert_eq!(harness.index.search_calls(), 0);
	assert_eq!(harness.embedding.calls(), 0);
}

#[tokio::test]
async fn non_member_file_filter_returns_empty_without_searching() {
	let harness = Harness::new();

	harness.catalog.set_project(TENANT, PROJECT, &["doc1", "doc2", "doc3"]);

	let mut req = request(REFUND_QUERY, SearchMode::Fast);

	req.filter = Some(SubFilter { file_id: Some("doc9".to_string()), ..SubFilter::default() });

	let response = harness.service.retrieve(req).await.expect("Retrieve failed.");

	assert!(response.sources.is_empty());
	assert!(!response.used_cache);
	assert_eq!(response.confidence, 0.0);
	assert_eq!(harness.index.search_calls(), 0);
	assert_eq!(harness.embedding.calls(), 0);
}

#[tokio::test]
async fn tag_filter_scopes_search_to_tenant_and_tagged_documents() {
	let harness = Harness::new();

	harness.catalog.set_project(TENANT, PROJECT, &["doc1", "doc2", "doc3"]);
	harness.catalog.tag(TENANT, "legal", "doc2");
	harness.catalog.tag("tenant-b", "legal", "doc3");

	let mut req = request(REFUND_QUERY, SearchMode::Fast);

	req.filter = Some(SubFilter { tags: Some(vec!["legal".to_string()]), ..SubFilter::default() });

	harness.service.retrieve(req).await.expect("Retrieve failed.");

	let filters = harness.index.filters();

	assert_eq!(filters.len(), 1);
	assert_eq!(filters[0].tenant_id(), TENANT);
	assert_eq!(filters[0].document_ids(), &["doc2".to_string()]);
}

#[tokio::test]
async fn fast_mode_runs_one_search_without_llm_calls() {
	let harness = Harness::new();

	harness.catalog.set_project(TENANT, PROJECT, &["doc1", "doc2"]);
	harness.catalog.name("doc1", "Refunds.pdf");
	harness.embedding.register("refund window", vec![0.0, 1.0, 0.0]);
	harness.index.add_results(
		TENANT,
		vec![0.0, 1.0, 0.0],
		(0..7).map(|chunk| hit(if chunk % 2 == 0 { "doc1" } else { "doc2" }, chunk, 90.0 - chunk as f32)).collect(),
	);

	let response =
		harness.service.retrieve(request("refund window", SearchMode::Fast)).await.expect("Retrieve failed.");

	assert_eq!(response.sources.len(), 5);
	assert_eq!(harness.index.search_calls(), 1);
	assert_eq!(harness.embedding.calls(), 1);
	assert_eq!(harness.llm.analysis_calls(), 0);
	assert_eq!(harness.llm.rerank_calls(), 0);
	assert_eq!(response.sources[0].document_name, "Refunds.pdf");
	assert_eq!(response.sources[1].document_name, "doc2");
	assert!(response.sources.iter().all(|source| source.score_kind == ScoreKind::Vector));
	assert!((response.sources[0].relevance - 0.9).abs() < 1e-6);
	assert_eq!(
		response.sources.iter().map(|source| source.citation).collect::<Vec<_>>(),
		vec![1, 2, 3, 4, 5]
	);
}

#[tokio::test]
async fn smart_mode_fuses_reformulations_and_skips_rerank_on_consensus() {
	let harness = Harness::new();

	arrange_refund_scenario(&harness);

	let mut req = request(REFUND_QUERY, SearchMode::Smart);

	req.include_analysis = true;

	let response = harness.service.retrieve(req).await.expect("Retrieve failed.");

	// The original query plus the first two reformulations.
	assert_eq!(
		response.queries,
		Some(vec![REFUND_QUERY.to_string(), "refund policy".to_string(), "refund rules".to_string()])
	);
	assert_eq!(harness.embedding.calls(), 1);
	assert_eq!(harness.index.search_calls(), 3);
	assert_eq!(harness.llm.rerank_calls(), 0);
	assert_eq!(chunks(&response.sources), vec![
		("doc1".to_string(), 0),
		("doc1".to_string(), 1),
		("doc1".to_string(), 2),
	]);
	assert_eq!(
		response.sources.iter().map(|source| source.citation).collect::<Vec<_>>(),
		vec![1, 2, 3]
	);
	assert!(response.sources.iter().all(|source| source.score_kind == ScoreKind::Fused));
	assert!((response.sources[0].relevance - 1.0).abs() < 1e-4);
	assert_eq!(response.analysis.map(|analysis| analysis.intent), Some("policy_lookup".to_string()));
}

#[tokio::test]
async fn smart_mode_reranks_an_ambiguous_ranking() {
	let harness = Harness::new();

	arrange_flat_ranking(&harness, "opened items");
	harness.llm.set_rerank(serde_json::json!({
		"scores": [
			{ "index": 1, "score": 40 },
			{ "index": 2, "score": 10 },
			{ "index": 3, "score": 95 },
			{ "index": 4, "score": 30 },
			{ "index": 5, "score": 20 }
		]
	}));

	let response =
		harness.service.retrieve(request("opened items", SearchMode::Smart)).await.expect("Retrieve failed.");
	let order: Vec<u32> = response.sources.iter().map(|source| source.chunk_index).collect();

	assert_eq!(order, vec![2, 0, 3, 4, 1]);
	assert_eq!(harness.llm.rerank_calls(), 1);
	// Unscripted analysis falls back to the raw query.
	assert_eq!(harness.llm.analysis_calls(), 1);
	assert_eq!(harness.index.search_calls(), 1);
	assert!(response.sources.iter().all(|source| source.score_kind == ScoreKind::Rerank));
	assert!((response.sources[0].relevance - 0.95).abs() < 1e-6);
}

#[tokio::test]
async fn rerank_timeout_keeps_fused_order() {
	let harness = Harness::new();

	arrange_flat_ranking(&harness, "opened items");
	harness.llm.set_rerank(serde_json::json!({ "scores": [10, 20, 30, 40, 50] }));
	harness.llm.set_rerank_delay(Duration::from_secs(2));

	let response =
		harness.service.retrieve(request("opened items", SearchMode::Smart)).await.expect("Retrieve failed.");
	let order: Vec<u32> = response.sources.iter().map(|source| source.chunk_index).collect();

	assert_eq!(order, vec![0, 1, 2, 3, 4]);
	assert_eq!(harness.llm.rerank_calls(), 1);
	assert!(response.sources.iter().all(|source| source.score_kind == ScoreKind::Fused));
}

#[tokio::test]
async fn slow_analysis_falls_back_to_the_raw_query() {
	let harness = Harness::new();

	arrange_refund_scenario(&harness);
	harness.llm.set_analysis_delay(Duration::from_secs(2));

	let mut req = request(REFUND_QUERY, SearchMode::Smart);

	req.include_analysis = true;

	let response = harness.service.retrieve(req).await.expect("Retrieve failed.");

	assert_eq!(response.queries, Some(vec![REFUND_QUERY.to_string()]));
	assert_eq!(harness.index.search_calls(), 1);
	assert_eq!(response.analysis.map(|analysis| analysis.intent), Some("search".to_string()));
	assert_eq!(response.sources.len(), 3);
}

#[tokio::test]
async fn deep_mode_always_reranks_and_expands_the_dominant_document() {
	let harness = Harness::new();

	arrange_refund_scenario(&harness);
	harness.llm.set_rerank(serde_json::json!({
		"scores": [
			{ "index": 1, "score": 90 },
			{ "index": 2, "score": 60 },
			{ "index": 3, "score": 80 },
			{ "index": 4, "score": 20 }
		]
	}));
	harness.index.add_chunk(TENANT, hit("doc1", 3, 0.0));
	harness.index.add_chunk(TENANT, hit("doc1", 4, 0.0));

	let response =
		harness.service.retrieve(request(REFUND_QUERY, SearchMode::Deep)).await.expect("Retrieve failed.");

	assert_eq!(harness.index.search_calls(), 4);
	assert_eq!(harness.llm.rerank_calls(), 1);
	assert_eq!(harness.index.fetch_calls(), 1);
	// Reading order: doc1 first (it ranked first), chunks ascending, then doc2.
	assert_eq!(chunks(&response.sources), vec![
		("doc1".to_string(), 0),
		("doc1".to_string(), 1),
		("doc1".to_string(), 2),
		("doc1".to_string(), 3),
		("doc2".to_string(), 5),
	]);

	let supporting = &response.sources[3];

	assert_eq!(supporting.score_kind, ScoreKind::Supporting);
	assert_eq!(supporting.document_name, "Refunds.pdf");
	assert_eq!(supporting.citation, 4);
	assert!((response.confidence - 0.625).abs() < 1e-4);
}

#[tokio::test]
async fn failed_neighbor_fetch_still_returns_reranked_sources() {
	let harness = Harness::new();

	arrange_refund_scenario(&harness);
	harness.llm.set_rerank(serde_json::json!({ "scores": [90, 60, 80, 20] }));
	harness.index.set_fetch_failing(true);

	let response =
		harness.service.retrieve(request(REFUND_QUERY, SearchMode::Deep)).await.expect("Retrieve failed.");

	assert_eq!(response.sources.len(), 4);
	assert!(response.sources.iter().all(|source| source.score_kind == ScoreKind::Rerank));
	assert_eq!(response.sources[3].document_id, "doc2");
}

#[tokio::test]
async fn embedding_failure_on_the_primary_search_fails_the_request() {
	let harness = Harness::new();

	harness.catalog.set_project(TENANT, PROJECT, &["doc1"]);
	harness.embedding.set_failing(true);

	let err = harness
		.service
		.retrieve(request(REFUND_QUERY, SearchMode::Fast))
		.await
		.expect_err("Expected an embedding error.");

	assert!(matches!(err, Error::Provider { .. }));
}

#[tokio::test]
async fn unknown_embedding_provider_is_rejected() {
	let harness = Harness::new();

	harness.catalog.set_project(TENANT, PROJECT, &["doc1"]);

	let mut req = request(REFUND_QUERY, SearchMode::Fast);

	req.embedding_provider = Some("missing".to_string());

	let err = harness.service.retrieve(req).await.expect_err("Expected a request error.");

	assert!(matches!(err, Error::InvalidRequest { .. }));
}

#[tokio::test]
async fn follow_up_pattern_reuses_cache_without_embedding() {
	let harness = Harness::new();

	harness.catalog.set_project(TENANT, PROJECT, &["doc1"]);
	harness.conversations.insert(TENANT, "conv-1", cached_context(REFUND_QUERY, &["doc1"], None));

	let req = in_conversation(request("tell me more about that", SearchMode::Smart), "conv-1");
	let response = harness.service.retrieve(req).await.expect("Retrieve failed.");

	assert!(response.used_cache);
	assert_eq!(response.cache_reason.as_deref(), Some("follow-up pattern"));
	assert_eq!(response.sources.len(), 1);
	assert_eq!(harness.embedding.calls(), 0);
	assert_eq!(harness.index.search_calls(), 0);
}

#[tokio::test]
async fn new_topic_pattern_retrieves_fresh_without_similarity_call() {
	let harness = Harness::new();

	harness.catalog.set_project(TENANT, PROJECT, &["doc1"]);
	harness.conversations.insert(TENANT, "conv-1", cached_context(REFUND_QUERY, &["doc1"], None));

	let req = in_conversation(
		request("now, different question: what is the warranty?", SearchMode::Fast),
		"conv-1",
	);
	let response = harness.service.retrieve(req).await.expect("Retrieve failed.");

	assert!(!response.used_cache);
	assert_eq!(response.cache_reason.as_deref(), Some("new topic pattern"));
	// The only embedding call is the fresh search itself.
	assert_eq!(harness.embedding.calls(), 1);
	assert_eq!(harness.index.search_calls(), 1);
}

#[tokio::test]
async fn context_with_removed_documents_is_ignored() {
	let harness = Harness::new();

	harness.catalog.set_project(TENANT, PROJECT, &["doc1"]);
	harness
		.conversations
		.insert(TENANT, "conv-1", cached_context(REFUND_QUERY, &["doc1", "doc-removed"], None));

	let req = in_conversation(request("tell me more about that", SearchMode::Fast), "conv-1");
	let response = harness.service.retrieve(req).await.expect("Retrieve failed.");

	assert!(!response.used_cache);
	assert_eq!(response.cache_reason.as_deref(), Some("no cache available"));
}

#[tokio::test]
async fn expired_context_is_not_reused() {
	let harness = Harness::new();
	let mut context = cached_context(REFUND_QUERY, &["doc1"], None);

	context.expires_at = OffsetDateTime::now_utc() - time::Duration::seconds(1);

	harness.catalog.set_project(TENANT, PROJECT, &["doc1"]);
	harness.conversations.insert(TENANT, "conv-1", context);

	let req = in_conversation(request("tell me more about that", SearchMode::Fast), "conv-1");
	let response = harness.service.retrieve(req).await.expect("Retrieve failed.");

	assert!(!response.used_cache);
	assert_eq!(response.cache_reason.as_deref(), Some("cache expired"));
}

#[tokio::test]
async fn similarity_decides_ambiguous_queries() {
	let harness = Harness::new();
	let shipping = "Shipping costs for international orders please";
	let refunds = "Refund rules for opened electronics please";

	harness.catalog.set_project(TENANT, PROJECT, &["doc1"]);
	harness.embedding.register(shipping, vec![0.0, 0.0, 1.0]);
	harness.embedding.register(refunds, vec![0.0, 1.0, 0.0]);
	harness
		.conversations
		.insert(TENANT, "conv-1", cached_context(REFUND_QUERY, &["doc1"], Some(vec![0.0, 1.0, 0.0])));

	let similar = harness
		.service
		.retrieve(in_conversation(request(refunds, SearchMode::Fast), "conv-1"))
		.await
		.expect("Retrieve failed.");

	assert!(similar.used_cache);
	assert_eq!(similar.cache_reason.as_deref(), Some("very similar query"));
	assert_eq!(harness.embedding.calls(), 1);

	let different = harness
		.service
		.retrieve(in_conversation(request(shipping, SearchMode::Fast), "conv-1"))
		.await
		.expect("Retrieve failed.");

	assert!(!different.used_cache);
	assert_eq!(different.cache_reason.as_deref(), Some("different topic"));
	// Fast mode searches with the vector computed for the similarity check.
	assert_eq!(harness.embedding.calls(), 2);
	assert_eq!(harness.index.search_calls(), 1);
}

#[tokio::test]
async fn similarity_failure_reuses_the_cache() {
	let harness = Harness::new();

	harness.catalog.set_project(TENANT, PROJECT, &["doc1"]);
	harness.conversations.insert(TENANT, "conv-1", cached_context(REFUND_QUERY, &["doc1"], None));
	harness.embedding.set_failing(true);

	let req = in_conversation(
		request("Shipping costs for international orders please", SearchMode::Fast),
		"conv-1",
	);
	let response = harness.service.retrieve(req).await.expect("Retrieve failed.");

	assert!(response.used_cache);
	assert_eq!(response.cache_reason.as_deref(), Some("similarity unavailable"));
}

#[tokio::test]
async fn slow_similarity_embedding_reuses_the_cache() {
	let mut cfg = test_config();

	cfg.providers.embedding.timeout_ms = 50;

	let harness = Harness::with_config(cfg);

	harness.catalog.set_project(TENANT, PROJECT, &["doc1"]);
	harness.conversations.insert(TENANT, "conv-1", cached_context(REFUND_QUERY, &["doc1"], None));
	harness.embedding.set_delay(Duration::from_secs(5));

	let req = in_conversation(
		request("Shipping costs for international orders please", SearchMode::Fast),
		"conv-1",
	);
	let response = tokio::time::timeout(Duration::from_secs(2), harness.service.retrieve(req))
		.await
		.expect("Retrieve stalled on the similarity embedding.")
		.expect("Retrieve failed.");

	assert!(response.used_cache);
	assert_eq!(response.cache_reason.as_deref(), Some("similarity unavailable"));
	assert_eq!(harness.index.search_calls(), 0);
}

#[tokio::test]
async fn stored_embedding_from_another_provider_is_recomputed() {
	let harness = Harness::new();
	let refunds = "Refund rules for opened electronics please";

	harness.catalog.set_project(TENANT, PROJECT, &["doc1"]);
	// Stored under "local"; "alternate" maps both queries close together.
	harness
		.conversations
		.insert(TENANT, "conv-1", cached_context(REFUND_QUERY, &["doc1"], Some(vec![0.0, 1.0, 0.0])));
	harness.embedding.register_for("alternate", refunds, vec![0.0, 0.0, 1.0]);
	harness.embedding.register_for("alternate", REFUND_QUERY, vec![0.0, 0.0, 1.0]);

	let mut req = in_conversation(request(refunds, SearchMode::Fast), "conv-1");

	req.embedding_provider = Some("alternate".to_string());

	let response = harness.service.retrieve(req).await.expect("Retrieve failed.");

	assert!(response.used_cache);
	assert_eq!(response.cache_reason.as_deref(), Some("very similar query"));
	assert_eq!(harness.embedding.requests(), vec![(
		"alternate".to_string(),
		vec![refunds.to_string(), REFUND_QUERY.to_string()]
	)]);
}

#[tokio::test]
async fn cached_context_must_fit_the_request_filter() {
	let harness = Harness::new();

	harness.catalog.set_project(TENANT, PROJECT, &["doc1", "doc2"]);
	harness.conversations.insert(TENANT, "conv-1", cached_context(REFUND_QUERY, &["doc1"], None));
	harness.index.add_results(TENANT, vec![1.0, 0.0, 0.0], vec![hit("doc1", 0, 80.0), hit("doc2", 3, 70.0)]);

	let mut inside = in_conversation(request("tell me more about that", SearchMode::Fast), "conv-1");

	inside.filter = Some(SubFilter { file_id: Some("doc1".to_string()), ..SubFilter::default() });

	let reused = harness.service.retrieve(inside).await.expect("Retrieve failed.");

	assert!(reused.used_cache);
	assert_eq!(chunks(&reused.sources), vec![("doc1".to_string(), 0)]);

	let mut outside = in_conversation(request("tell me more about that", SearchMode::Fast), "conv-1");

	outside.filter = Some(SubFilter { file_id: Some("doc2".to_string()), ..SubFilter::default() });

	let fresh = harness.service.retrieve(outside).await.expect("Retrieve failed.");

	assert!(!fresh.used_cache);
	assert_eq!(fresh.cache_reason.as_deref(), Some("no cache available"));
	assert_eq!(chunks(&fresh.sources), vec![("doc2".to_string(), 3)]);
	assert_eq!(harness.index.search_calls(), 1);
}

#[tokio::test]
async fn cached_context_is_not_served_when_the_filter_matches_nothing() {
	let harness = Harness::new();

	harness.catalog.set_project(TENANT, PROJECT, &["doc1"]);
	harness.conversations.insert(TENANT, "conv-1", cached_context(REFUND_QUERY, &["doc1"], None));

	let mut req = in_conversation(request("tell me more about that", SearchMode::Smart), "conv-1");

	req.filter = Some(SubFilter { file_id: Some("doc9".to_string()), ..SubFilter::default() });

	let response = harness.service.retrieve(req).await.expect("Retrieve failed.");

	assert!(!response.used_cache);
	assert!(response.sources.is_empty());
	assert_eq!(harness.index.search_calls(), 0);
}

#[tokio::test]
async fn fresh_retrieval_is_written_back_and_reused() {
	let harness = Harness::new();

	arrange_refund_scenario(&harness);

	let first = harness
		.service
		.retrieve(in_conversation(request(REFUND_QUERY, SearchMode::Smart), "conv-2"))
		.await
		.expect("Retrieve failed.");

	assert_eq!(first.cache_reason.as_deref(), Some("no cache available"));

	harness.service.flush_context_writes().await;

	let stored = harness.conversations.get(TENANT, "conv-2").expect("Expected a stored context.");

	assert_eq!(stored.originating_query, REFUND_QUERY);
	assert_eq!(stored.document_ids, vec!["doc1".to_string()]);
	assert_eq!(stored.query_embedding, Some(vec![0.0, 1.0, 0.0]));
	assert_eq!(stored.embedding_provider_id.as_deref(), Some("local"));
	assert_eq!(stored.sources, first.sources);
	assert!(stored.context_text.starts_with("[1] Refunds.pdf"));
	assert!(harness.conversations.get("tenant-b", "conv-2").is_none());

	let second = harness
		.service
		.retrieve(in_conversation(request("tell me more about it", SearchMode::Smart), "conv-2"))
		.await
		.expect("Retrieve failed.");

	assert!(second.used_cache);
	assert_eq!(second.sources, first.sources);
}

#[tokio::test]
async fn failed_context_write_does_not_fail_the_request() {
	let harness = Harness::new();

	arrange_refund_scenario(&harness);
	harness.conversations.set_writes_failing(true);

	let response = harness
		.service
		.retrieve(in_conversation(request(REFUND_QUERY, SearchMode::Smart), "conv-3"))
		.await
		.expect("Retrieve failed.");

	harness.service.flush_context_writes().await;

	assert_eq!(response.sources.len(), 3);
	assert_eq!(harness.conversations.writes(), 1);
	assert!(harness.conversations.get(TENANT, "conv-3").is_none());
}

#[tokio::test]
async fn failed_context_read_retrieves_fresh() {
	let harness = Harness::new();

	arrange_refund_scenario(&harness);
	harness.conversations.set_reads_failing(true);

	let response = harness
		.service
		.retrieve(in_conversation(request("tell me more about that", SearchMode::Fast), "conv-4"))
		.await
		.expect("Retrieve failed.");

	assert!(!response.used_cache);
	assert_eq!(response.cache_reason.as_deref(), Some("no cache available"));
}

#[tokio::test]
async fn project_documents_are_cached_but_ownership_is_rechecked() {
	let harness = Harness::new();

	arrange_refund_scenario(&harness);

	for _ in 0..2 {
		harness.service.retrieve(request(REFUND_QUERY, SearchMode::Fast)).await.expect("Retrieve failed.");
	}

	assert_eq!(harness.catalog.document_id_loads(), 1);

	harness.service.invalidate_project_documents(TENANT, PROJECT);
	harness.service.retrieve(request(REFUND_QUERY, SearchMode::Fast)).await.expect("Retrieve failed.");

	assert_eq!(harness.catalog.document_id_loads(), 2);

	let mut foreign = request(REFUND_QUERY, SearchMode::Fast);

	foreign.tenant_id = "tenant-b".to_string();

	assert!(matches!(
		harness.service.retrieve(foreign).await,
		Err(Error::ProjectAccessDenied { .. })
	));
}

#[tokio::test]
async fn analysis_is_cached_per_query_and_history() {
	let harness = Harness::new();

	arrange_refund_scenario(&harness);

	harness.service.analyze_query(REFUND_QUERY, &[]).await;
	harness.service.analyze_query(REFUND_QUERY, &[]).await;

	assert_eq!(harness.llm.analysis_calls(), 1);
}
