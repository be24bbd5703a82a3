pub mod analysis;
pub mod backend;
pub mod filter;
pub mod rerank;
pub mod retrieve;

mod background;
mod context;
mod error;
mod ttl_cache;

pub use analysis::{HistoryMessage, QueryAnalysis};
pub use error::{Error, Result};
pub use retrieve::{RetrieveRequest, RetrieveResponse, SearchMode};
pub use scout_providers::embedding::EmbeddingTask;

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use serde_json::Value;

use background::ContextWriter;
use scout_config::{Config, EmbeddingProviderConfig, LlmProviderConfig};
use scout_domain::{
	context_cache::CachedRetrievalContext, filter::RetrievalFilter, passage::SearchHit,
};
use scout_providers::{embedding, llm};
use ttl_cache::TtlCache;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
		task: EmbeddingTask,
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

pub trait LlmProvider
where
	Self: Send + Sync,
{
	fn complete_json<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, Result<Value>>;
}

/// Nearest-neighbor search over indexed chunks. Implementations must honor `filter` exactly.
pub trait VectorIndex
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		filter: &'a RetrievalFilter,
		vector: Vec<f32>,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<SearchHit>>>;

	fn fetch_chunks<'a>(
		&'a self,
		filter: &'a RetrievalFilter,
		document_id: &'a str,
		chunk_indices: &'a [u32],
	) -> BoxFuture<'a, Result<Vec<SearchHit>>>;
}

/// Authoritative project and document metadata.
pub trait DocumentCatalog
where
	Self: Send + Sync,
{
	fn project_owned_by<'a>(
		&'a self,
		tenant_id: &'a str,
		project_id: &'a str,
	) -> BoxFuture<'a, Result<bool>>;

	fn project_document_ids<'a>(
		&'a self,
		tenant_id: &'a str,
		project_id: &'a str,
	) -> BoxFuture<'a, Result<Vec<String>>>;

	fn document_ids_for_tags<'a>(
		&'a self,
		tenant_id: &'a str,
		tags: &'a [String],
	) -> BoxFuture<'a, Result<Vec<String>>>;

	fn document_names<'a>(
		&'a self,
		tenant_id: &'a str,
		document_ids: &'a [String],
	) -> BoxFuture<'a, Result<HashMap<String, String>>>;
}

/// One cached retrieval context per conversation, scoped by tenant.
pub trait ConversationStore
where
	Self: Send + Sync,
{
	fn read<'a>(
		&'a self,
		tenant_id: &'a str,
		conversation_id: &'a str,
	) -> BoxFuture<'a, Result<Option<CachedRetrievalContext>>>;

	fn write<'a>(
		&'a self,
		tenant_id: &'a str,
		conversation_id: &'a str,
		context: &'a CachedRetrievalContext,
	) -> BoxFuture<'a, Result<()>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub llm: Arc<dyn LlmProvider>,
}
impl Providers {
	pub fn new(embedding: Arc<dyn EmbeddingProvider>, llm: Arc<dyn LlmProvider>) -> Self {
		Self { embedding, llm }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), llm: provider }
	}
}

#[derive(Clone)]
pub struct Backends {
	pub index: Arc<dyn VectorIndex>,
	pub catalog: Arc<dyn DocumentCatalog>,
	pub conversations: Arc<dyn ConversationStore>,
}

pub struct ScoutService {
	pub cfg: Config,
	pub backends: Backends,
	pub providers: Providers,
	project_documents: TtlCache<(String, String), Vec<String>>,
	analyses: TtlCache<String, QueryAnalysis>,
	context_writer: ContextWriter,
}
impl ScoutService {
	/// Starts the background context writer, so this must run inside a Tokio runtime.
	pub fn new(cfg: Config, backends: Backends, providers: Providers) -> Self {
		let project_documents =
			TtlCache::new(Duration::from_secs(cfg.cache.project_documents_ttl_seconds));
		let analyses = TtlCache::new(Duration::from_secs(cfg.search.analysis.cache_ttl_seconds));
		let context_writer = ContextWriter::spawn(
			backends.conversations.clone(),
			cfg.cache.write_queue_capacity as usize,
		);

		Self { cfg, backends, providers, project_documents, analyses, context_writer }
	}

	/// Waits until every context write submitted so far has been attempted.
	pub async fn flush_context_writes(&self) {
		self.context_writer.flush().await;
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
		task: EmbeddingTask,
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(embedding::embed(cfg, texts, task).await?) })
	}
}
impl LlmProvider for DefaultProviders {
	fn complete_json<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, Result<Value>> {
		Box::pin(async move { Ok(llm::complete_json(cfg, messages).await?) })
	}
}
