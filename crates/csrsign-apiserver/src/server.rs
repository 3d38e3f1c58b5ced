use crate::handlers::*;
use crate::AppState;
use axum::routing::{get, patch, put};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

const CSR_PATH: &str = "/apis/certificates.k8s.io/v1/certificatesigningrequests";

/// API server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to listen on
    pub listen_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 6443)),
        }
    }
}

/// API server
pub struct ApiServer {
    config: Config,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: Config, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            // Health checks
            .route("/healthz", get(healthz))
            .route("/livez", get(livez))
            .route("/readyz", get(readyz))
            // CertificateSigningRequests
            .route(CSR_PATH, get(list_csrs).post(create_csr))
            .route(
                &format!("{CSR_PATH}/{{name}}"),
                get(get_csr).delete(delete_csr),
            )
            .route(
                &format!("{CSR_PATH}/{{name}}/status"),
                patch(patch_csr_status),
            )
            .route(
                &format!("{CSR_PATH}/{{name}}/approval"),
                put(approve_csr),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run the server
    pub async fn run(self) -> Result<(), std::io::Error> {
        let app = self.router();

        info!("Starting API server on {}", self.config.listen_addr);

        let listener = TcpListener::bind(self.config.listen_addr).await?;

        axum::serve(listener, app).await
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn livez() -> &'static str {
    "ok"
}

async fn readyz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use csrsign_storage::{RedbBackend, ResourceStore};
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:6443");
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::new(dir.path().join("test.redb")).unwrap();
        let state = Arc::new(AppState::new(ResourceStore::new(Arc::new(backend))));
        let router = ApiServer::new(Config::default(), state).router();

        for path in ["/healthz", "/livez", "/readyz"] {
            let response = router
                .clone()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
