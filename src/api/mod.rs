//! Read-only reporting HTTP surface.

mod handlers;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::Store;

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config_path: PathBuf,
}

/// The reporting API server.
pub struct Server {
    state: AppState,
    port: u16,
}

impl Server {
    pub fn new(store: Arc<Store>, config_path: PathBuf, port: u16) -> Self {
        Self {
            state: AppState { store, config_path },
            port,
        }
    }

    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/health", get(handlers::handle_health))
            .route("/api/uptime/reports", get(handlers::handle_reports))
            .route("/api/uptime/config", post(handlers::handle_update_config))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Serve until the shared stop signal fires.
    pub async fn start(
        &self,
        mut stop: broadcast::Receiver<()>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!("api server listening on {}", addr);

        axum::serve(listener, self.routes())
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await?;

        tracing::info!("api server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Target;
    use crate::util::short_id;

    async fn spawn_api(store: Arc<Store>) -> (String, tempfile::TempDir) {
        let tmp = tempfile::TempDir::new().unwrap();
        let config_path = tmp.path().join("config.yml");

        let server = Server::new(store, config_path, 0);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = server.routes();
        tokio::spawn(async move {
            axum::serve(listener, routes).await.unwrap();
        });
        (format!("http://{addr}"), tmp)
    }

    #[tokio::test]
    async fn test_health_and_reports() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let target = Target {
            id: short_id(),
            url: "https://example.com".to_string(),
            ..Default::default()
        };
        store.upsert_target_config(&target).unwrap();

        let (base, _tmp) = spawn_api(store).await;
        let client = reqwest::Client::new();

        let health: serde_json::Value = client
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "healthy");

        let all: serde_json::Value = client
            .get(format!("{base}/api/uptime/reports"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(all.as_array().unwrap().len(), 1);
        assert_eq!(all[0]["url"], "https://example.com");

        let one = client
            .get(format!("{base}/api/uptime/reports?url=https://example.com&limit=5"))
            .send()
            .await
            .unwrap();
        assert_eq!(one.status(), reqwest::StatusCode::OK);

        let missing = client
            .get(format!("{base}/api/uptime/reports?url=https://nope.example"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_config_update() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (base, _tmp) = spawn_api(store).await;
        let client = reqwest::Client::new();

        let ok = client
            .post(format!("{base}/api/uptime/config"))
            .body(r#"{"configs": [{"url": "example.com"}]}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), reqwest::StatusCode::OK);

        let bad = client
            .post(format!("{base}/api/uptime/config"))
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
