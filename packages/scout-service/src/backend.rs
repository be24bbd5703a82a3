//! Capability implementations over Postgres and Qdrant.

use std::{collections::HashMap, sync::Arc};

use crate::{
	Backends, BoxFuture, ConversationStore, DocumentCatalog, Result, VectorIndex,
};
use scout_domain::{
	context_cache::CachedRetrievalContext, filter::RetrievalFilter, passage::SearchHit,
};
use scout_storage::{db::Db, qdrant::QdrantStore, queries};

pub struct PostgresCatalog {
	pub db: Db,
}
impl DocumentCatalog for PostgresCatalog {
	fn project_owned_by<'a>(
		&'a self,
		tenant_id: &'a str,
		project_id: &'a str,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			Ok(queries::project_owned_by(&self.db.pool, tenant_id, project_id).await?)
		})
	}

	fn project_document_ids<'a>(
		&'a self,
		tenant_id: &'a str,
		project_id: &'a str,
	) -> BoxFuture<'a, Result<Vec<String>>> {
		Box::pin(async move {
			Ok(queries::project_document_ids(&self.db.pool, tenant_id, project_id).await?)
		})
	}

	fn document_ids_for_tags<'a>(
		&'a self,
		tenant_id: &'a str,
		tags: &'a [String],
	) -> BoxFuture<'a, Result<Vec<String>>> {
		Box::pin(async move {
			Ok(queries::document_ids_for_tags(&self.db.pool, tenant_id, tags).await?)
		})
	}

	fn document_names<'a>(
		&'a self,
		tenant_id: &'a str,
		document_ids: &'a [String],
	) -> BoxFuture<'a, Result<HashMap<String, String>>> {
		Box::pin(async move {
			Ok(queries::document_names(&self.db.pool, tenant_id, document_ids).await?)
		})
	}
}
impl ConversationStore for PostgresCatalog {
	fn read<'a>(
		&'a self,
		tenant_id: &'a str,
		conversation_id: &'a str,
	) -> BoxFuture<'a, Result<Option<CachedRetrievalContext>>> {
		Box::pin(async move {
			Ok(queries::read_context(&self.db.pool, tenant_id, conversation_id).await?)
		})
	}

	fn write<'a>(
		&'a self,
		tenant_id: &'a str,
		conversation_id: &'a str,
		context: &'a CachedRetrievalContext,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			Ok(queries::write_context(&self.db.pool, tenant_id, conversation_id, context).await?)
		})
	}
}

impl VectorIndex for QdrantStore {
	fn search<'a>(
		&'a self,
		filter: &'a RetrievalFilter,
		vector: Vec<f32>,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
		Box::pin(async move { Ok(QdrantStore::search(self, filter, vector, limit).await?) })
	}

	fn fetch_chunks<'a>(
		&'a self,
		filter: &'a RetrievalFilter,
		document_id: &'a str,
		chunk_indices: &'a [u32],
	) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
		Box::pin(async move {
			Ok(QdrantStore::fetch_chunks(self, filter, document_id, chunk_indices).await?)
		})
	}
}

impl Backends {
	pub fn new(
		index: Arc<dyn VectorIndex>,
		catalog: Arc<dyn DocumentCatalog>,
		conversations: Arc<dyn ConversationStore>,
	) -> Self {
		Self { index, catalog, conversations }
	}

	/// One Postgres pool serves both the catalog and the conversation store.
	pub fn from_storage(db: Db, qdrant: QdrantStore) -> Self {
		let postgres = Arc::new(PostgresCatalog { db });

		Self { index: Arc::new(qdrant), catalog: postgres.clone(), conversations: postgres }
	}
}
