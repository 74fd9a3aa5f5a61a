//! HTTP handlers for the four query operations.
//!
//! `/query/data` streams NDJSON: rows are serialized one per LF-terminated
//! record as the backend produces them, so client back-pressure propagates
//! to row production. The other operations answer with a single JSON value.

use axum::{
    body::Body,
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use trellis_core::error_builder::ErrorBuilder;
use trellis_core::problemdetails::{Problem, ProblemDetails};
use trellis_query::{QueryError, QueryRequest};
use utoipa::{OpenApi, ToSchema};

use crate::engine::FetchEngine;

pub struct QueryState {
    pub engine: Arc<FetchEngine>,
}

/// Count result wrapper
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CountResponse {
    pub value: i64,
}

#[derive(OpenApi)]
#[openapi(
    paths(query_data, query_count, query_delete, query_schema),
    components(schemas(
        QueryRequest,
        trellis_query::Search,
        trellis_query::JoinRequest,
        trellis_query::DirectDatabaseConfig,
        trellis_query::FilterOperator,
        trellis_query::LogicalOperator,
        trellis_query::OrderDirection,
        trellis_query::JoinType,
        CountResponse,
        ProblemDetails,
    )),
    info(
        title = "Query API",
        description = "Dynamic relational queries against stored or inline \
        backend descriptors: row streaming, counting, filtered deletion and \
        table schema introspection, all driven by one request shape.",
        version = "1.0.0"
    )
)]
pub struct QueryApiDoc;

pub fn configure_routes() -> Router<Arc<QueryState>> {
    Router::new()
        .route("/query/data", post(query_data))
        .route("/query/count", post(query_count))
        .route("/query/delete", post(query_delete))
        .route("/query/schema", post(query_schema))
}

fn problem_from(err: QueryError) -> Problem {
    let (status, title) = match &err {
        QueryError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "Invalid Query"),
        QueryError::NotFound(_) => (StatusCode::NOT_FOUND, "Not Found"),
        QueryError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
        QueryError::Backend(_) => (StatusCode::BAD_GATEWAY, "Backend Error"),
        QueryError::Cancelled(_) | QueryError::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error")
        }
    };

    ErrorBuilder::new(status)
        .type_("https://trellis.sh/probs/query-error")
        .title(title)
        .detail(err.to_string())
        .build()
}

/// Stream matching rows as NDJSON
#[utoipa::path(
    tag = "Query",
    post,
    path = "/query/data",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "application/x-ndjson: one JSON object per row, LF-separated"),
        (status = 400, description = "Malformed request", body = ProblemDetails),
        (status = 404, description = "Unknown config id or table", body = ProblemDetails),
        (status = 502, description = "Backend failure", body = ProblemDetails)
    )
)]
async fn query_data(
    State(state): State<Arc<QueryState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, Problem> {
    let pretty = request.pretty;
    let rows = state
        .engine
        .fetch_data(&request)
        .await
        .map_err(problem_from)?;

    let body = rows.map(move |row| match row {
        Ok(row) => {
            let mut line = if pretty {
                serde_json::to_string_pretty(&row).unwrap_or_default()
            } else {
                serde_json::to_string(&row).unwrap_or_default()
            };
            line.push('\n');
            Ok(Bytes::from(line))
        }
        Err(e) => {
            // Terminates the stream; rows already sent remain valid
            error!("Row streaming failed: {}", e);
            Err(axum::Error::new(e))
        }
    });

    Response::builder()
        .header(CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(body))
        .map_err(|e| {
            problem_from(QueryError::Internal(format!(
                "Could not build response: {}",
                e
            )))
        })
}

/// Count matching rows
#[utoipa::path(
    tag = "Query",
    post,
    path = "/query/count",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Matching row count", body = CountResponse),
        (status = 400, description = "Malformed request", body = ProblemDetails),
        (status = 404, description = "Unknown config id or table", body = ProblemDetails),
        (status = 502, description = "Backend failure", body = ProblemDetails)
    )
)]
async fn query_count(
    State(state): State<Arc<QueryState>>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, Problem> {
    let value = state
        .engine
        .fetch_count(&request)
        .await
        .map_err(problem_from)?;

    Ok(Json(CountResponse { value }))
}

/// Delete matching rows; a non-empty predicate is required
#[utoipa::path(
    tag = "Query",
    post,
    path = "/query/delete",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Number of rows deleted", body = u64),
        (status = 400, description = "Missing predicate or malformed request", body = ProblemDetails),
        (status = 404, description = "No rows matched", body = ProblemDetails),
        (status = 502, description = "Backend failure", body = ProblemDetails)
    )
)]
async fn query_delete(
    State(state): State<Arc<QueryState>>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, Problem> {
    let deleted = state
        .engine
        .delete_data(&request)
        .await
        .map_err(problem_from)?;

    if deleted == 0 {
        return Err(ErrorBuilder::new(StatusCode::NOT_FOUND)
            .type_("https://trellis.sh/probs/query-error")
            .title("Not Found")
            .detail("No rows matched the delete predicate")
            .build());
    }

    Ok(Json(deleted))
}

/// Resolve the table's column-to-type map
#[utoipa::path(
    tag = "Query",
    post,
    path = "/query/schema",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Ordered column name to declared type map"),
        (status = 400, description = "Malformed request", body = ProblemDetails),
        (status = 404, description = "Unknown config id or table", body = ProblemDetails),
        (status = 502, description = "Backend failure", body = ProblemDetails)
    )
)]
async fn query_schema(
    State(state): State<Arc<QueryState>>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, Problem> {
    let schema = state
        .engine
        .table_schema(&request)
        .await
        .map_err(problem_from)?;

    let mut map = serde_json::Map::with_capacity(schema.columns.len());
    for column in &schema.columns {
        map.insert(
            column.name.clone(),
            serde_json::Value::String(column.type_name.clone()),
        );
    }

    Ok(Json(serde_json::Value::Object(map)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_expected_statuses() {
        let cases = [
            (
                QueryError::InvalidArgument("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (QueryError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (QueryError::Conflict("x".into()), StatusCode::CONFLICT),
            (QueryError::Backend("x".into()), StatusCode::BAD_GATEWAY),
            (
                QueryError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(problem_from(err).status_code, status);
        }
    }
}
