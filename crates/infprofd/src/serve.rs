//! HTTP endpoints serving live captures as JSON.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, Json};
use axum::routing::get;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use infprof_core::collector::FileSystem;
use infprof_core::profiler::{CaptureMap, CaptureScope, Capturer, SignalGuard};

type AppState<F> = State<Arc<Capturer<F>>>;

const INDEX: &str = "<!DOCTYPE html>
<html>
<head><title>infprofd</title></head>
<body>
<h1>infprofd</h1>
<ul>
<li><a href=\"/static\">/static</a> - run-constant host information</li>
<li><a href=\"/dynamic\">/dynamic</a> - one sample of dynamic metrics</li>
<li><a href=\"/both\">/both</a> - static and dynamic merged</li>
</ul>
</body>
</html>
";

pub fn router<F: FileSystem + 'static>(capturer: Arc<Capturer<F>>) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/static", get(handle_static::<F>))
        .route("/dynamic", get(handle_dynamic::<F>))
        .route("/both", get(handle_both::<F>))
        .with_state(capturer)
}

/// Serves until `cancel` fires or SIGINT/SIGTERM arrives.
pub async fn serve<F: FileSystem + 'static>(
    addr: SocketAddr,
    capturer: Arc<Capturer<F>>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(capturer))
        .with_graceful_shutdown(shutdown(cancel))
        .await
}

async fn shutdown(cancel: CancellationToken) {
    let mut guard = match SignalGuard::install() {
        Ok(guard) => Some(guard),
        Err(e) => {
            warn!(error = %e, "Failed to install signal handlers");
            None
        }
    };
    tokio::select! {
        _ = cancel.cancelled() => info!("Cancellation requested"),
        name = async {
            match guard.as_mut() {
                Some(guard) => guard.recv().await,
                None => std::future::pending().await,
            }
        } => info!("Received {}, shutting down", name),
    }
}

async fn handle_index() -> Html<&'static str> {
    Html(INDEX)
}

async fn handle_static<F: FileSystem + 'static>(
    State(capturer): AppState<F>,
) -> Result<Json<CaptureMap>, StatusCode> {
    capture(&capturer, CaptureScope::Static).await
}

async fn handle_dynamic<F: FileSystem + 'static>(
    State(capturer): AppState<F>,
) -> Result<Json<CaptureMap>, StatusCode> {
    capture(&capturer, CaptureScope::Dynamic).await
}

async fn handle_both<F: FileSystem + 'static>(
    State(capturer): AppState<F>,
) -> Result<Json<CaptureMap>, StatusCode> {
    capture(&capturer, CaptureScope::Both).await
}

async fn capture<F: FileSystem + 'static>(
    capturer: &Capturer<F>,
    scope: CaptureScope,
) -> Result<Json<CaptureMap>, StatusCode> {
    capturer.capture(scope).await.map(Json).map_err(|e| {
        error!(%scope, "Capture failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use infprof_core::collector::{Collector, MockFs};
    use infprof_core::config::{CollectorToggles, ProfilerConfig};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(fs: MockFs) -> Router {
        let config = ProfilerConfig {
            session_id: "srv".into(),
            collectors: CollectorToggles {
                inference: false,
                ..CollectorToggles::default()
            },
            ..ProfilerConfig::default()
        };
        let collector = Collector::new(fs, "/proc", "/sys/fs/cgroup");
        router(Arc::new(Capturer::new(&config, collector)))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn static_endpoint_returns_host_info() {
        let (status, body) = get_json(app(MockFs::typical_system()), "/static").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uuid"], "srv");
        assert!(body.get("timestamp").is_none());
    }

    #[tokio::test]
    async fn both_endpoint_merges_scopes() {
        let (status, body) = get_json(app(MockFs::typical_system()), "/both").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uuid"], "srv");
        assert!(body["timestamp"].as_i64().unwrap() > 0);
        assert!(body.get("vCpuTime").is_some());
    }

    #[tokio::test]
    async fn capture_failure_is_server_error() {
        let (status, _) = get_json(app(MockFs::new()), "/static").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, body) = get_json(app(MockFs::new()), "/dynamic").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("timestamp").is_some());
    }

    #[tokio::test]
    async fn index_lists_endpoints() {
        let response = app(MockFs::new())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("/dynamic"));
    }

    #[tokio::test]
    async fn cancelled_server_stops() {
        let capturer = Arc::new(Capturer::new(
            &ProfilerConfig::default(),
            Collector::new(MockFs::new(), "/proc", "/sys/fs/cgroup"),
        ));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        tokio::time::timeout(Duration::from_secs(5), serve(addr, capturer, cancel))
            .await
            .unwrap()
            .unwrap();
    }
}
