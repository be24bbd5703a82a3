mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Cache, Config, EmbeddingApiFormat, EmbeddingProviderConfig, LlmProviderConfig, Postgres,
	Providers, Qdrant, Search, SearchAnalysis, SearchExpansion, SearchFanout, SearchFast,
	SearchRerank, Security, Service, Storage,
};

use std::{collections::HashSet, fs, path::Path};

const MAX_FANOUT_QUERIES: u32 = 4;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.qdrant.collection.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.collection must be non-empty.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.qdrant.vector_dim."
				.to_string(),
		});
	}

	let mut provider_ids = HashSet::new();

	provider_ids.insert(cfg.providers.embedding.provider_id.as_str());

	for alternate in &cfg.providers.embedding_alternates {
		if !provider_ids.insert(alternate.provider_id.as_str()) {
			return Err(Error::Validation {
				message: format!(
					"providers.embedding_alternates provider_id '{}' must be unique.",
					alternate.provider_id
				),
			});
		}
		if alternate.dimensions != cfg.storage.qdrant.vector_dim {
			return Err(Error::Validation {
				message: format!(
					"providers.embedding_alternates '{}' dimensions must match storage.qdrant.vector_dim.",
					alternate.provider_id
				),
			});
		}
	}

	if cfg.search.fast.max_hits == 0 {
		return Err(Error::Validation {
			message: "search.fast.max_hits must be greater than zero.".to_string(),
		});
	}

	for (label, fanout) in [("smart", &cfg.search.smart), ("deep", &cfg.search.deep)] {
		validate_fanout(label, fanout)?;
	}

	if cfg.search.rerank.max_candidates == 0 {
		return Err(Error::Validation {
			message: "search.rerank.max_candidates must be greater than zero.".to_string(),
		});
	}
	if cfg.search.rerank.snippet_chars == 0 {
		return Err(Error::Validation {
			message: "search.rerank.snippet_chars must be greater than zero.".to_string(),
		});
	}

	for (label, timeout_ms) in [
		("search.rerank.timeout_ms", cfg.search.rerank.timeout_ms),
		("search.analysis.timeout_ms", cfg.search.analysis.timeout_ms),
	] {
		if timeout_ms == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if cfg.search.analysis.cache_ttl_seconds == 0 {
		return Err(Error::Validation {
			message: "search.analysis.cache_ttl_seconds must be greater than zero.".to_string(),
		});
	}
	if cfg.cache.project_documents_ttl_seconds == 0 {
		return Err(Error::Validation {
			message: "cache.project_documents_ttl_seconds must be greater than zero.".to_string(),
		});
	}
	if cfg.cache.context_ttl_seconds == 0 {
		return Err(Error::Validation {
			message: "cache.context_ttl_seconds must be greater than zero.".to_string(),
		});
	}
	if cfg.cache.write_queue_capacity == 0 {
		return Err(Error::Validation {
			message: "cache.write_queue_capacity must be greater than zero.".to_string(),
		});
	}

	for (label, value) in [
		("cache.reuse_similarity", cfg.cache.reuse_similarity),
		("cache.fresh_similarity", cfg.cache.fresh_similarity),
	] {
		if !value.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
		if !(0.0..=1.0).contains(&value) {
			return Err(Error::Validation {
				message: format!("{label} must be in the range 0.0-1.0."),
			});
		}
	}

	if cfg.cache.fresh_similarity >= cfg.cache.reuse_similarity {
		return Err(Error::Validation {
			message: "cache.fresh_similarity must be less than cache.reuse_similarity.".to_string(),
		});
	}

	for (label, key) in
		[("embedding", &cfg.providers.embedding.api_key), ("llm", &cfg.providers.llm.api_key)]
	{
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}

	Ok(())
}

fn validate_fanout(label: &str, fanout: &SearchFanout) -> Result<()> {
	if !(1..=MAX_FANOUT_QUERIES).contains(&fanout.max_queries) {
		return Err(Error::Validation {
			message: format!("search.{label}.max_queries must be in the range 1-{MAX_FANOUT_QUERIES}."),
		});
	}
	if fanout.per_query_limit == 0 {
		return Err(Error::Validation {
			message: format!("search.{label}.per_query_limit must be greater than zero."),
		});
	}
	if fanout.fused_limit == 0 {
		return Err(Error::Validation {
			message: format!("search.{label}.fused_limit must be greater than zero."),
		});
	}
	if fanout.rerank_top_k == 0 || fanout.rerank_top_k > fanout.fused_limit {
		return Err(Error::Validation {
			message: format!(
				"search.{label}.rerank_top_k must be between 1 and search.{label}.fused_limit."
			),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.security.api_auth_token.as_deref().map(|token| token.trim().is_empty()).unwrap_or(false)
	{
		cfg.security.api_auth_token = None;
	}

	for provider in
		std::iter::once(&mut cfg.providers.embedding).chain(cfg.providers.embedding_alternates.iter_mut())
	{
		if provider.input_type_field.as_deref().map(|field| field.trim().is_empty()).unwrap_or(false)
		{
			provider.input_type_field = None;
		}
	}
}
