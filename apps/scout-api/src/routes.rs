use axum::{
	Json, Router,
	body::Body,
	extract::State,
	http::{HeaderMap, Request, StatusCode, header::AUTHORIZATION},
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;

use crate::state::AppState;
use scout_service::{Error as ServiceError, RetrieveRequest, RetrieveResponse};

pub fn router(state: AppState) -> Router {
	let api = Router::new()
		.route("/v1/retrieve", post(retrieve))
		.layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

	Router::new().route("/health", get(health)).merge(api).with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn retrieve(
	State(state): State<AppState>,
	Json(payload): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, ApiError> {
	let response = state.service.retrieve(payload).await?;

	Ok(Json(response))
}

async fn auth_middleware(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
	if let Some(expected) = state.auth_token.as_deref()
		&& read_bearer_token(req.headers()).is_none_or(|token| token != expected)
	{
		return json_error(
			StatusCode::UNAUTHORIZED,
			"UNAUTHORIZED",
			"A valid Bearer token is required.",
		)
		.into_response();
	}

	next.run(req).await
}

fn read_bearer_token(headers: &HeaderMap) -> Option<&str> {
	let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
	let token = value.strip_prefix("Bearer ")?.trim();

	if token.is_empty() { None } else { Some(token) }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}

pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
	ApiError { status, error_code: code.to_string(), message: message.into() }
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		let message = err.to_string();

		match err {
			ServiceError::InvalidRequest { .. } =>
				json_error(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message),
			ServiceError::ProjectAccessDenied { .. } =>
				json_error(StatusCode::FORBIDDEN, "PROJECT_ACCESS_DENIED", message),
			ServiceError::Provider { .. } =>
				json_error(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", message),
			ServiceError::Timeout { .. } =>
				json_error(StatusCode::BAD_GATEWAY, "UPSTREAM_TIMEOUT", message),
			ServiceError::Storage { .. } | ServiceError::Qdrant { .. } => {
				tracing::error!(error = %message, "Retrieval failed on a storage backend.");

				json_error(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", "Internal storage error.")
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}
