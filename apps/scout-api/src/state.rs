use std::sync::Arc;

use scout_service::{Backends, Providers, ScoutService};
use scout_storage::{db::Db, qdrant::QdrantStore};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<ScoutService>,
	/// Bearer token required on `/v1` routes when set.
	pub auth_token: Option<Arc<str>>,
}
impl AppState {
	pub async fn new(config: scout_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema().await?;

		let qdrant = QdrantStore::new(&config.storage.qdrant)?;
		let backends = Backends::from_storage(db, qdrant);
		let service = ScoutService::new(config, backends, Providers::default());

		Ok(Self::from_service(Arc::new(service)))
	}

	pub fn from_service(service: Arc<ScoutService>) -> Self {
		let auth_token = service
			.cfg
			.security
			.api_auth_token
			.as_deref()
			.map(str::trim)
			.filter(|token| !token.is_empty())
			.map(Arc::from);

		Self { service, auth_token }
	}
}
