//! Backend management routes

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use gate_core::CoreError;
use gate_proxy::{Backend, BackendConfig};
use tracing::{debug, error, info};

use crate::error::ApiError;
use crate::state::AppState;

use super::RESERVED_IDS;

/// Maximum length for a backend id
const MAX_ID_LENGTH: usize = 128;

/// Validate a backend id taken from the request path
fn validate_backend_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty() {
        return Err(ApiError::BadRequest("Backend id cannot be empty".to_string()));
    }

    if id.len() > MAX_ID_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Backend id exceeds maximum length of {} characters",
            MAX_ID_LENGTH
        )));
    }

    if RESERVED_IDS.contains(&id) {
        return Err(ApiError::BadRequest(format!(
            "Backend id '{}' is reserved",
            id
        )));
    }

    Ok(())
}

/// GET /
async fn list_backends(State(state): State<AppState>) -> Json<Vec<Backend>> {
    debug!("Listing backends");
    Json(state.registry.list())
}

/// GET /{id}
async fn get_backend(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Backend>, ApiError> {
    debug!(id = %id, "Getting backend");
    Ok(Json(state.registry.get(&id)?))
}

/// POST /{id}
///
/// The id comes from the path; a `name` in the body is kept, otherwise
/// it defaults to the id.
async fn add_backend(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    debug!(id = %id, "Adding new backend");

    validate_backend_id(&id)?;

    if state.registry.contains(&id) {
        return Err(CoreError::Conflict(id).into());
    }

    let config: BackendConfig = serde_json::from_slice(&body).map_err(|e| {
        error!(id = %id, error = %e, "Decoding backend json");
        ApiError::BadRequest(e.to_string())
    })?;

    let backend = Backend::from_config(&id, config)?;
    let local_addr = state.registry.add(&id, backend)?;

    info!(id = %id, bind_addr = %local_addr, "Backend added");
    Ok(StatusCode::CREATED)
}

/// DELETE /{id}
///
/// A close failure is reported as 500 but the backend is removed anyway.
async fn delete_backend(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.remove(&id).await?;

    info!(id = %id, "Backend deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Create backend management routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(list_backends)).route(
        "/{id}",
        get(get_backend).post(add_backend).delete(delete_backend),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::create_router;
    use axum::body::Body;
    use axum::http::Request;
    use gate_core::ProxyRegistry;
    use gate_proxy::{GateStats, TcpProxyFactory};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn test_app() -> (Router, Arc<ProxyRegistry>) {
        let factory = Arc::new(TcpProxyFactory::new(Arc::new(GateStats::new())));
        let registry = Arc::new(ProxyRegistry::new(factory));
        let app = create_router(AppState::new(registry.clone()), None);
        (app, registry)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes)
    }

    fn backend_body(bind_port: u16) -> String {
        format!(
            r#"{{"bind_ip":"127.0.0.1","bind_port":{},"ip":"10.0.0.5","port":27017}}"#,
            bind_port
        )
    }

    #[tokio::test]
    async fn test_add_then_get_applies_defaults() {
        let (app, registry) = test_app();
        let port = free_port();

        let (status, body) = send(&app, "POST", "/db2", &backend_body(port)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body.is_empty());

        let (status, body) = send(&app, "GET", "/db2", "").await;
        assert_eq!(status, StatusCode::OK);

        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["id"], "db2");
        assert_eq!(value["name"], "db2");
        assert_eq!(value["protocol"], "tcp");
        assert_eq!(value["bind_ip"], "127.0.0.1");
        assert_eq!(value["bind_port"], port);
        assert_eq!(value["ip"], "10.0.0.5");
        assert_eq!(value["port"], 27017);
        assert_eq!(value["max_concurrent"], 0);

        registry.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_supplied_name_is_kept() {
        let (app, registry) = test_app();
        let body = format!(
            r#"{{"id":"ignored","name":"primary","proto":"mongodb","bind_ip":"127.0.0.1",
                "bind_port":{},"ip":"127.0.0.1","port":27017,"max_concurrent":4}}"#,
            free_port()
        );

        let (status, _) = send(&app, "POST", "/db1", &body).await;
        assert_eq!(status, StatusCode::CREATED);

        let backend = registry.get("db1").unwrap();
        assert_eq!(backend.id, "db1");
        assert_eq!(backend.name, "primary");
        assert_eq!(backend.protocol, "mongodb");
        assert_eq!(backend.max_concurrent, 4);

        registry.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_add_conflicts() {
        let (app, registry) = test_app();

        let (status, _) = send(&app, "POST", "/db1", &backend_body(free_port())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(&app, "POST", "/db1", &backend_body(free_port())).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&app, "POST", "/db1", "not json").await;
        assert_eq!(status, StatusCode::CONFLICT);

        assert_eq!(registry.len(), 1);
        registry.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_bodies_are_rejected() {
        let (app, registry) = test_app();

        for body in [
            "",
            "not json",
            "{}",
            r#"{"bind_ip":"127.0.0.1","bind_port":0,"ip":"127.0.0.1","port":27017}"#,
            r#"{"bind_ip":"127.0.0.1","bind_port":27016,"ip":"127.0.0.1","port":27017,"max_concurrent":-1}"#,
        ] {
            let (status, response) = send(&app, "POST", "/db1", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", body);

            let value: Value = serde_json::from_slice(&response).unwrap();
            assert!(value["error"]["message"].is_string());
        }

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reserved_ids_are_rejected() {
        let (app, registry) = test_app();

        let (status, _) = send(&app, "POST", "/metrics", &backend_body(free_port())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "POST", "/healthz", &backend_body(free_port())).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_id_is_a_single_path_segment() {
        let (app, registry) = test_app();

        let (status, _) = send(&app, "POST", "/a/b", &backend_body(free_port())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "GET", "/a/b", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_bind_failure_returns_500() {
        let (app, registry) = test_app();
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let (status, body) = send(&app, "POST", "/db1", &backend_body(port)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["code"], "BIND_FAILURE");
        assert!(registry.is_empty());

        let (status, _) = send(&app, "GET", "/db1", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let (app, registry) = test_app();

        let (status, body) = send(&app, "GET", "/", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), Value::Array(vec![]));

        send(&app, "POST", "/db1", &backend_body(free_port())).await;
        send(&app, "POST", "/db2", &backend_body(free_port())).await;

        let (_, body) = send(&app, "GET", "/", "").await;
        let listed: Vec<Backend> = serde_json::from_slice(&body).unwrap();
        assert_eq!(listed.len(), 2);

        let (status, body) = send(&app, "DELETE", "/db1", "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());

        let (status, _) = send(&app, "GET", "/db1", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "DELETE", "/db1", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert_eq!(registry.list().len(), 1);
        registry.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_reports_backend_count() {
        let (app, registry) = test_app();
        send(&app, "POST", "/db1", &backend_body(free_port())).await;

        let (status, body) = send(&app, "GET", "/healthz", "").await;
        assert_eq!(status, StatusCode::OK);

        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["backends"], 1);

        registry.close_all().await.unwrap();
    }

    #[test]
    fn test_validate_backend_id() {
        assert!(validate_backend_id("db1").is_ok());
        assert!(validate_backend_id("").is_err());
        assert!(validate_backend_id("metrics").is_err());
        assert!(validate_backend_id(&"a".repeat(MAX_ID_LENGTH + 1)).is_err());
    }
}
