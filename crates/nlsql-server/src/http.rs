//! HTTP API
//!
//! - `POST /query`   natural-language query through the repair loop
//! - `GET  /catalog` schema catalog (`?format=markdown` for a readable table)
//! - `GET  /rules`   loaded guardrail rules
//! - `GET  /metrics` Prometheus text exposition
//! - `GET  /health`

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::app::{AppState, QueryInput, ServerError};

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Catalog(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Metrics(_) | ServerError::Pattern(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

#[derive(Deserialize)]
struct CatalogParams {
    format: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query", post(execute_query))
        .route("/catalog", get(get_catalog))
        .route("/rules", get(get_rules))
        .route("/metrics", get(get_metrics))
        .route("/health", get(health_check))
        .with_state(state)
}

pub async fn serve(state: AppState, host: &str, port: u16) -> Result<(), std::io::Error> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("nlsql HTTP server listening on {}", addr);

    axum::serve(listener, router(state)).await
}

async fn execute_query(State(state): State<AppState>, body: Result<Json<QueryInput>, JsonRejection>) -> Response {
    let Json(input) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: rejection.body_text(),
                }),
            )
                .into_response();
        }
    };

    match state.answer(input).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_catalog(State(state): State<AppState>, Query(params): Query<CatalogParams>) -> Response {
    let catalog = match state.catalog().await {
        Ok(catalog) => catalog,
        Err(e) => return e.into_response(),
    };

    match params.format.as_deref() {
        Some("markdown") => (
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            catalog.to_markdown(),
        )
            .into_response(),
        _ => Json(catalog.as_ref().clone()).into_response(),
    }
}

async fn get_rules(State(state): State<AppState>) -> Response {
    Json(state.rule_summaries()).into_response()
}

async fn get_metrics(State(state): State<AppState>) -> Response {
    match state.metrics().render() {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response(),
        Err(e) => ServerError::from(e).into_response(),
    }
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::state;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const GOOD: &str = "SELECT region, SUM(amount) AS total FROM sales WHERE year = 2024 GROUP BY region";

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn post_query(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/query")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_query_success() {
        let app = router(state(vec![GOOD], 2));
        let (status, body) = send(app, post_query(r#"{"query": "total sales per region in 2024"}"#)).await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["rows"]["rows"].as_array().unwrap().len(), 4);
        assert_eq!(json["history"].as_array().unwrap().len(), 1);
        assert_eq!(json["chart"]["kind"], "bar");
        assert!(json["request_id"].is_string());
    }

    #[tokio::test]
    async fn test_exhausted_run_is_still_ok() {
        let app = router(state(vec!["DROP TABLE sales"], 1));
        let (status, body) = send(app, post_query(r#"{"query": "drop the sales table"}"#)).await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["outcome"], "exhausted");
        assert_eq!(json["last_failure"]["stage"], "validation");
        assert_eq!(json["last_failure"]["violations"][0]["rule"], "no-destructive");
        assert_eq!(json["history"].as_array().unwrap().len(), 2);
        assert!(json.get("chart").is_none());
    }

    #[tokio::test]
    async fn test_bad_input_is_400() {
        let (status, _) = send(router(state(vec![GOOD], 2)), post_query(r#"{"query": "   "}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(router(state(vec![GOOD], 2)), post_query(r#"{"text": "no query field"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(router(state(vec![GOOD], 2)), post_query("not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_catalog_and_rules() {
        let app = router(state(vec![GOOD], 2));

        let (status, body) = send(app.clone(), get("/catalog")).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["tables"][0]["name"], "sales");

        let (status, body) = send(app.clone(), get("/catalog?format=markdown")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("## Table: `sales`"));

        let (status, body) = send(app, get("/rules")).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json[0]["name"], json!("no-destructive"));
        assert_eq!(json[0]["severity"], json!("blocking"));
    }

    #[tokio::test]
    async fn test_metrics_after_query() {
        let app = router(state(vec![GOOD], 2));
        send(app.clone(), post_query(r#"{"query": "total sales per region in 2024"}"#)).await;

        let (status, body) = send(app, get("/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body)
            .unwrap()
            .contains("nlsql_runs_total{outcome=\"success\"} 1"));
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(router(state(vec![GOOD], 2)), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }
}
