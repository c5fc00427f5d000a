use crate::*;

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Clone)]
pub struct HttpState {
    repository: Arc<dyn Repository>,
    metrics: Arc<Metrics>,
}

impl HttpState {
    pub fn new(repository: Arc<dyn Repository>, metrics: Arc<Metrics>) -> Self {
        HttpState { repository, metrics }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn status(State(state): State<HttpState>) -> (StatusCode, &'static str) {
    match state.repository.ping().await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            error!("Health check failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "DB error")
        }
    }
}

async fn metrics(State(state): State<HttpState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], state.metrics.render())
}

pub async fn serve(addr: SocketAddr, state: HttpState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    serve_on(listener, state).await
}

pub async fn serve_on(listener: TcpListener, state: HttpState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start(state: HttpState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move { serve_on(listener, state).await.expect("serve") });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn status_and_metrics_are_served() {
        let metrics = Arc::new(Metrics::new());
        metrics.command("start");
        let base = start(HttpState::new(Arc::new(JsonRepository::in_memory()), metrics)).await;
        let client = reqwest::Client::new();

        let status = client.get(format!("{}/status", base)).send().await.expect("status response");
        assert_eq!(status.status().as_u16(), 200);
        assert_eq!(status.text().await.expect("status body"), "OK");

        let response = client.get(format!("{}/metrics", base)).send().await.expect("metrics response");
        assert_eq!(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some(METRICS_CONTENT_TYPE)
        );
        let body = response.text().await.expect("metrics body");
        assert!(body.contains("telegram_commands_processed_total{command=\"start\"} 1"));
    }
}
