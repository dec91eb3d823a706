//! Local static server for http-transport scenarios
//!
//! Serves the site checkout over 127.0.0.1 on an ephemeral port so
//! scenarios can exercise behavior that differs under a real origin
//! (history navigation, relative links). Readiness is confirmed by
//! polling `/health`; shutdown is explicit and also happens on drop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::error::{HarnessError, HarnessResult};

/// Handle to the running static server
pub struct StaticServer {
    base_url: String,
    port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StaticServer {
    /// Bind, serve `site_root`, and wait until `/health` answers
    pub async fn spawn(config: ServerConfig) -> HarnessResult<Self> {
        if !config.site_root.is_dir() {
            return Err(HarnessError::ServerStartup(format!(
                "site root is not a directory: {}",
                config.site_root.display()
            )));
        }

        let addr = SocketAddr::from(([127, 0, 0, 1], config.port.unwrap_or(0)));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            HarnessError::ServerStartup(format!("failed to bind {addr}: {e}"))
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| HarnessError::ServerStartup(e.to_string()))?
            .port();
        let base_url = format!("http://127.0.0.1:{port}");

        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .fallback_service(ServeDir::new(&config.site_root));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                warn!("static server error: {e}");
            }
        });

        let server = Self {
            base_url: base_url.clone(),
            port,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        };

        server.wait_for_healthy(config.startup_timeout).await?;
        info!("static server serving {} at {}", config.site_root.display(), base_url);

        Ok(server)
    }

    /// Poll `/health` until the server answers or the timeout elapses
    async fn wait_for_healthy(&self, timeout: Duration) -> HarnessResult<()> {
        let health_url = format!("{}/health", self.base_url);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = std::time::Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout {
            attempts += 1;
            match client.get(&health_url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => warn!("health check returned {}", resp.status()),
                Err(e) => {
                    // Connection refused is expected while the listener spins up
                    if !e.is_connect() {
                        warn!("health check error: {e}");
                    }
                }
            }
            sleep(Duration::from_millis(50)).await;
        }

        Err(HarnessError::ServerHealthCheck(attempts))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Signal shutdown and wait for the serve task to finish
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Configuration for the static server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory of static HTML to serve
    pub site_root: PathBuf,

    /// Port to listen on (None = ephemeral)
    pub port: Option<u16>,

    /// How long to wait for the listener to answer health checks
    pub startup_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            site_root: PathBuf::from("site"),
            port: None,
            startup_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_site_and_health() {
        let site = tempfile::tempdir().unwrap();
        std::fs::write(
            site.path().join("index.html"),
            "<html><body><div class=\"course-grid\"></div></body></html>",
        )
        .unwrap();

        let server = StaticServer::spawn(ServerConfig {
            site_root: site.path().to_path_buf(),
            ..ServerConfig::default()
        })
        .await
        .unwrap();

        let body = reqwest::get(format!("{}/index.html", server.base_url()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("course-grid"));

        let health = reqwest::get(format!("{}/health", server.base_url()))
            .await
            .unwrap();
        assert!(health.status().is_success());

        server.stop().await;
    }

    #[tokio::test]
    async fn missing_site_root_fails_startup() {
        let result = StaticServer::spawn(ServerConfig {
            site_root: PathBuf::from("/definitely/not/a/dir"),
            ..ServerConfig::default()
        })
        .await;
        assert!(matches!(result, Err(HarnessError::ServerStartup(_))));
    }

    #[tokio::test]
    async fn ephemeral_ports_differ() {
        let site = tempfile::tempdir().unwrap();
        let a = StaticServer::spawn(ServerConfig {
            site_root: site.path().to_path_buf(),
            ..ServerConfig::default()
        })
        .await
        .unwrap();
        let b = StaticServer::spawn(ServerConfig {
            site_root: site.path().to_path_buf(),
            ..ServerConfig::default()
        })
        .await
        .unwrap();

        assert_ne!(a.port(), b.port());
        a.stop().await;
        b.stop().await;
    }
}
