use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub search: Search,
	#[serde(default)]
	pub cache: Cache,
	#[serde(default)]
	pub security: Security,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub qdrant: Qdrant,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	/// Extra embedding providers a request may select by `provider_id`.
	#[serde(default)]
	pub embedding_alternates: Vec<EmbeddingProviderConfig>,
	pub llm: LlmProviderConfig,
}
impl Providers {
	/// Resolves the embedding provider for a request, falling back to the default one.
	pub fn embedding_for(&self, provider_id: Option<&str>) -> Option<&EmbeddingProviderConfig> {
		match provider_id.map(str::trim).filter(|id| !id.is_empty()) {
			None => Some(&self.embedding),
			Some(id) if id == self.embedding.provider_id => Some(&self.embedding),
			Some(id) => self.embedding_alternates.iter().find(|cfg| cfg.provider_id == id),
		}
	}
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum EmbeddingApiFormat {
	/// `{model, input, dimensions}` -> `{data: [{index, embedding}]}`.
	#[default]
	#[serde(rename = "openai")]
	OpenAi,
	/// `{texts}` -> `{embeddings}`.
	#[serde(rename = "sidecar")]
	Sidecar,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
	#[serde(default)]
	pub api_format: EmbeddingApiFormat,
	/// Request field carrying `query` or `document`, for providers that embed asymmetrically.
	pub input_type_field: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Search {
	pub fast: SearchFast,
	pub smart: SearchFanout,
	pub deep: SearchFanout,
	pub rerank: SearchRerank,
	pub expansion: SearchExpansion,
	pub analysis: SearchAnalysis,
}
impl Default for Search {
	fn default() -> Self {
		Self {
			fast: SearchFast::default(),
			smart: SearchFanout::smart(),
			deep: SearchFanout::deep(),
			rerank: SearchRerank::default(),
			expansion: SearchExpansion::default(),
			analysis: SearchAnalysis::default(),
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SearchFast {
	pub max_hits: u32,
}
impl Default for SearchFast {
	fn default() -> Self {
		Self { max_hits: 5 }
	}
}

#[derive(Debug, Deserialize)]
pub struct SearchFanout {
	pub max_queries: u32,
	pub per_query_limit: u32,
	pub fused_limit: u32,
	pub rerank_top_k: u32,
}
impl SearchFanout {
	pub fn smart() -> Self {
		Self { max_queries: 3, per_query_limit: 10, fused_limit: 20, rerank_top_k: 10 }
	}

	pub fn deep() -> Self {
		Self { max_queries: 4, per_query_limit: 15, fused_limit: 30, rerank_top_k: 15 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SearchRerank {
	pub max_candidates: u32,
	pub snippet_chars: u32,
	pub timeout_ms: u64,
}
impl Default for SearchRerank {
	fn default() -> Self {
		Self { max_candidates: 20, snippet_chars: 600, timeout_ms: 8_000 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SearchExpansion {
	pub max_added_chunks: u32,
}
impl Default for SearchExpansion {
	fn default() -> Self {
		Self { max_added_chunks: 3 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SearchAnalysis {
	pub timeout_ms: u64,
	pub cache_ttl_seconds: u64,
	pub history_messages: u32,
}
impl Default for SearchAnalysis {
	fn default() -> Self {
		Self { timeout_ms: 6_000, cache_ttl_seconds: 3_600, history_messages: 2 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Cache {
	pub project_documents_ttl_seconds: u64,
	pub context_ttl_seconds: u64,
	pub reuse_similarity: f32,
	pub fresh_similarity: f32,
	pub write_queue_capacity: u32,
}
impl Default for Cache {
	fn default() -> Self {
		Self {
			project_documents_ttl_seconds: 300,
			context_ttl_seconds: 300,
			reuse_similarity: 0.7,
			fresh_similarity: 0.3,
			write_queue_capacity: 256,
		}
	}
}

#[derive(Debug, Default, Deserialize)]
pub struct Security {
	pub api_auth_token: Option<String>,
}
