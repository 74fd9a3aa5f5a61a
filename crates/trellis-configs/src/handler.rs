//! HTTP handlers for descriptor management

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use trellis_core::error_builder::ErrorBuilder;
use trellis_core::problemdetails::{Problem, ProblemDetails};
use trellis_entities::database_configs;
use utoipa::{OpenApi, ToSchema};

use crate::service::{ConfigService, ConfigServiceError, DatabaseConfigPayload};

pub struct ConfigsState {
    pub config_service: Arc<ConfigService>,
}

/// Stored descriptor as returned to clients; the password is masked
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfigResponse {
    pub id: String,
    pub name: String,
    pub db_type: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub schema: Option<String>,
}

impl From<database_configs::Model> for DatabaseConfigResponse {
    fn from(model: database_configs::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            db_type: model.db_type,
            host: model.host,
            port: model.port as u16,
            username: model.username,
            password: "******".to_string(),
            database: model.database,
            schema: model.db_schema,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(list_configs, get_config, create_config, update_config, delete_config),
    components(schemas(DatabaseConfigPayload, DatabaseConfigResponse, ProblemDetails)),
    info(
        title = "Database Configs API",
        description = "CRUD for stored backend descriptors. Every create and \
        update verifies connectivity with a disposable connection before \
        persisting, and refreshes the cached execution context.",
        version = "1.0.0"
    )
)]
pub struct ConfigsApiDoc;

pub fn configure_routes() -> Router<Arc<ConfigsState>> {
    Router::new()
        .route("/configs", get(list_configs).post(create_config))
        .route(
            "/configs/:id",
            get(get_config).put(update_config).delete(delete_config),
        )
}

fn problem_from(err: ConfigServiceError) -> Problem {
    let (status, title) = match &err {
        ConfigServiceError::Validation { .. } => (StatusCode::BAD_REQUEST, "Invalid Config"),
        ConfigServiceError::Conflict => (StatusCode::CONFLICT, "Config Conflict"),
        ConfigServiceError::NotFound { .. } => (StatusCode::NOT_FOUND, "Config Not Found"),
        ConfigServiceError::Connection(_) => (StatusCode::BAD_GATEWAY, "Connection Failed"),
        ConfigServiceError::Database(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Config Store Error")
        }
    };

    ErrorBuilder::new(status)
        .type_("https://trellis.sh/probs/config-error")
        .title(title)
        .detail(err.to_string())
        .build()
}

/// List all stored descriptors
#[utoipa::path(
    tag = "Configs",
    get,
    path = "/configs",
    responses(
        (status = 200, description = "All stored descriptors", body = [DatabaseConfigResponse]),
        (status = 500, description = "Config store failure", body = ProblemDetails)
    )
)]
async fn list_configs(
    State(state): State<Arc<ConfigsState>>,
) -> Result<impl IntoResponse, Problem> {
    let configs = state
        .config_service
        .find_all()
        .await
        .map_err(problem_from)?;

    let response: Vec<DatabaseConfigResponse> = configs
        .into_iter()
        .map(DatabaseConfigResponse::from)
        .collect();

    Ok(Json(response))
}

/// Get one descriptor by id
#[utoipa::path(
    tag = "Configs",
    get,
    path = "/configs/{id}",
    params(("id" = String, Path, description = "Descriptor id")),
    responses(
        (status = 200, description = "The descriptor", body = DatabaseConfigResponse),
        (status = 404, description = "Unknown id", body = ProblemDetails)
    )
)]
async fn get_config(
    State(state): State<Arc<ConfigsState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let config = state
        .config_service
        .find_by_id(&id)
        .await
        .map_err(problem_from)?;

    match config {
        Some(model) => Ok(Json(DatabaseConfigResponse::from(model))),
        None => Err(problem_from(ConfigServiceError::NotFound { id })),
    }
}

/// Create a descriptor after verifying connectivity
#[utoipa::path(
    tag = "Configs",
    post,
    path = "/configs",
    request_body = DatabaseConfigPayload,
    responses(
        (status = 201, description = "Created descriptor", body = DatabaseConfigResponse),
        (status = 400, description = "Missing fields or unsupported db type", body = ProblemDetails),
        (status = 409, description = "Name already in use", body = ProblemDetails),
        (status = 502, description = "Connection verification failed", body = ProblemDetails)
    )
)]
async fn create_config(
    State(state): State<Arc<ConfigsState>>,
    Json(payload): Json<DatabaseConfigPayload>,
) -> Result<impl IntoResponse, Problem> {
    let model = state
        .config_service
        .create(payload)
        .await
        .map_err(problem_from)?;

    Ok((
        StatusCode::CREATED,
        Json(DatabaseConfigResponse::from(model)),
    ))
}

/// Update a descriptor after verifying connectivity
#[utoipa::path(
    tag = "Configs",
    put,
    path = "/configs/{id}",
    params(("id" = String, Path, description = "Descriptor id")),
    request_body = DatabaseConfigPayload,
    responses(
        (status = 200, description = "Updated descriptor", body = DatabaseConfigResponse),
        (status = 400, description = "Missing fields or unsupported db type", body = ProblemDetails),
        (status = 404, description = "Unknown id", body = ProblemDetails),
        (status = 409, description = "Name already in use by another descriptor", body = ProblemDetails),
        (status = 502, description = "Connection verification failed", body = ProblemDetails)
    )
)]
async fn update_config(
    State(state): State<Arc<ConfigsState>>,
    Path(id): Path<String>,
    Json(payload): Json<DatabaseConfigPayload>,
) -> Result<impl IntoResponse, Problem> {
    let model = state
        .config_service
        .update(&id, payload)
        .await
        .map_err(problem_from)?;

    Ok(Json(DatabaseConfigResponse::from(model)))
}

/// Delete a descriptor and evict its cached context
#[utoipa::path(
    tag = "Configs",
    delete,
    path = "/configs/{id}",
    params(("id" = String, Path, description = "Descriptor id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown id", body = ProblemDetails)
    )
)]
async fn delete_config(
    State(state): State<Arc<ConfigsState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    state
        .config_service
        .delete(&id)
        .await
        .map_err(problem_from)?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> database_configs::Model {
        database_configs::Model {
            id: "cfg-1".into(),
            name: "analytics".into(),
            db_type: "POSTGRES".into(),
            host: "localhost".into(),
            port: 5432,
            username: "app".into(),
            password: "super-secret".into(),
            database: "orders".into(),
            db_schema: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn response_masks_password() {
        let response = DatabaseConfigResponse::from(model());
        assert_eq!(response.password, "******");

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["password"], "******");
        assert_eq!(json["dbType"], "POSTGRES");
    }

    #[test]
    fn conflict_maps_to_409() {
        let problem = problem_from(ConfigServiceError::Conflict);
        assert_eq!(problem.status_code, StatusCode::CONFLICT);
    }

    #[test]
    fn not_found_maps_to_404() {
        let problem = problem_from(ConfigServiceError::NotFound { id: "x".into() });
        assert_eq!(problem.status_code, StatusCode::NOT_FOUND);
    }
}
