//! HTTP liveness endpoint.

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::lifecycle::ShutdownSignal;

/// Answers `200 OK` with body `OK` on any path and method.
pub struct HealthServer {
    listener: TcpListener,
}

impl HealthServer {
    pub async fn bind(address: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn router() -> Router {
        Router::new()
            .fallback(ok)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> std::io::Result<()> {
        let addr = self.listener.local_addr()?;
        tracing::info!(address = %addr, "Health endpoint listening");

        axum::serve(self.listener, Self::router())
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("Health endpoint stopped");
        Ok(())
    }
}

async fn ok() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;

    #[tokio::test]
    async fn answers_ok_on_any_path() {
        let server = HealthServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(server.run(shutdown.subscribe()));

        let client = reqwest::Client::new();
        for path in ["/", "/health", "/anything/else"] {
            let response = client
                .get(format!("http://{addr}{path}"))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), 200);
            assert_eq!(response.text().await.unwrap(), "OK");
        }

        shutdown.trigger();
        handle.await.unwrap().unwrap();
    }
}
