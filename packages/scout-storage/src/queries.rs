use std::collections::HashMap;

use sqlx::{PgExecutor, types::Json};

use crate::{
	Result,
	models::{DocumentName, DocumentRecord, INDEXED_STATUS, ProjectRecord},
};
use scout_domain::context_cache::CachedRetrievalContext;

pub async fn project_owned_by<'e, E>(executor: E, tenant_id: &str, project_id: &str) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let exists: bool = sqlx::query_scalar(
		"\
SELECT EXISTS (
	SELECT 1
	FROM projects
	WHERE tenant_id = $1
		AND project_id = $2
)",
	)
	.bind(tenant_id)
	.bind(project_id)
	.fetch_one(executor)
	.await?;

	Ok(exists)
}

pub async fn project_document_ids<'e, E>(
	executor: E,
	tenant_id: &str,
	project_id: &str,
) -> Result<Vec<String>>
where
	E: PgExecutor<'e>,
{
	let ids: Vec<String> = sqlx::query_scalar(
		"\
SELECT document_id
FROM documents
WHERE tenant_id = $1
	AND project_id = $2
	AND status = $3
ORDER BY created_at, document_id",
	)
	.bind(tenant_id)
	.bind(project_id)
	.bind(INDEXED_STATUS)
	.fetch_all(executor)
	.await?;

	Ok(ids)
}

pub async fn document_ids_for_tags<'e, E>(
	executor: E,
	tenant_id: &str,
	tags: &[String],
) -> Result<Vec<String>>
where
	E: PgExecutor<'e>,
{
	if tags.is_empty() {
		return Ok(Vec::new());
	}

	let ids: Vec<String> = sqlx::query_scalar(
		"\
SELECT DISTINCT document_id
FROM document_tags
WHERE tenant_id = $1
	AND tag = ANY($2)
ORDER BY document_id",
	)
	.bind(tenant_id)
	.bind(tags)
	.fetch_all(executor)
	.await?;

	Ok(ids)
}

pub async fn document_names<'e, E>(
	executor: E,
	tenant_id: &str,
	document_ids: &[String],
) -> Result<HashMap<String, String>>
where
	E: PgExecutor<'e>,
{
	if document_ids.is_empty() {
		return Ok(HashMap::new());
	}

	let rows: Vec<DocumentName> = sqlx::query_as(
		"\
SELECT document_id, display_name
FROM documents
WHERE tenant_id = $1
	AND document_id = ANY($2)",
	)
	.bind(tenant_id)
	.bind(document_ids)
	.fetch_all(executor)
	.await?;

	Ok(rows.into_iter().map(|row| (row.document_id, row.display_name)).collect())
}

pub async fn read_context<'e, E>(
	executor: E,
	tenant_id: &str,
	conversation_id: &str,
) -> Result<Option<CachedRetrievalContext>>
where
	E: PgExecutor<'e>,
{
	let payload: Option<Json<CachedRetrievalContext>> = sqlx::query_scalar(
		"\
SELECT payload
FROM conversation_contexts
WHERE tenant_id = $1
	AND conversation_id = $2",
	)
	.bind(tenant_id)
	.bind(conversation_id)
	.fetch_optional(executor)
	.await?;

	Ok(payload.map(|Json(context)| context))
}

/// Replaces the conversation's cached context.
pub async fn write_context<'e, E>(
	executor: E,
	tenant_id: &str,
	conversation_id: &str,
	context: &CachedRetrievalContext,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO conversation_contexts (
	conversation_id,
	tenant_id,
	payload,
	retrieved_at,
	expires_at
)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (tenant_id, conversation_id) DO UPDATE
SET
	payload = EXCLUDED.payload,
	retrieved_at = EXCLUDED.retrieved_at,
	expires_at = EXCLUDED.expires_at",
	)
	.bind(conversation_id)
	.bind(tenant_id)
	.bind(Json(context))
	.bind(context.retrieved_at)
	.bind(context.expires_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn upsert_project<'e, E>(executor: E, project: &ProjectRecord) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO projects (tenant_id, project_id, name)
VALUES ($1, $2, $3)
ON CONFLICT (tenant_id, project_id) DO UPDATE
SET name = EXCLUDED.name",
	)
	.bind(project.tenant_id.as_str())
	.bind(project.project_id.as_str())
	.bind(project.name.as_str())
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn upsert_document<'e, E>(executor: E, document: &DocumentRecord) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO documents (tenant_id, project_id, document_id, display_name, status)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (tenant_id, document_id) DO UPDATE
SET
	project_id = EXCLUDED.project_id,
	display_name = EXCLUDED.display_name,
	status = EXCLUDED.status",
	)
	.bind(document.tenant_id.as_str())
	.bind(document.project_id.as_str())
	.bind(document.document_id.as_str())
	.bind(document.display_name.as_str())
	.bind(document.status.as_str())
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn tag_document<'e, E>(
	executor: E,
	tenant_id: &str,
	document_id: &str,
	tag: &str,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO document_tags (tenant_id, document_id, tag)
VALUES ($1, $2, $3)
ON CONFLICT DO NOTHING",
	)
	.bind(tenant_id)
	.bind(document_id)
	.bind(tag)
	.execute(executor)
	.await?;

	Ok(())
}
