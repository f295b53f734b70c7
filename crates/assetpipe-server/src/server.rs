//! Development server implementation.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tower_http::services::ServeDir;

use crate::livereload::{client_script, LiveReloadHub, ReloadMessage};

/// WebSocket endpoint browsers connect to.
pub const LIVERELOAD_PATH: &str = "/__livereload";

/// Path of the injected client script.
pub const LIVERELOAD_SCRIPT_PATH: &str = "/__livereload.js";

/// Configuration for the development server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DevServerConfig {
    /// Directory served (the output root)
    #[serde(skip)]
    pub root: PathBuf,

    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Open browser on start
    pub open: bool,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("dist"),
            host: "127.0.0.1".to_string(),
            port: 3000,
            open: true,
        }
    }
}

impl DevServerConfig {
    /// Socket address to bind.
    pub fn addr(&self) -> Result<SocketAddr, ServerError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ServerError::InvalidAddress(addr))
    }
}

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to {0}: {1}")]
    Bind(SocketAddr, String),

    #[error("Server error: {0}")]
    Serve(String),

    #[error("File watch error: {0}")]
    Watch(String),
}

/// Development server.
pub struct DevServer {
    config: DevServerConfig,
    hub: LiveReloadHub,
}

impl DevServer {
    /// Create a server broadcasting through `hub`.
    pub fn new(config: DevServerConfig, hub: LiveReloadHub) -> Self {
        Self { config, hub }
    }

    /// Bind and serve until the process exits.
    pub async fn start(self) -> Result<(), ServerError> {
        let addr = self.config.addr()?;
        let app = router(self.config.root.clone(), self.hub);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(addr, e.to_string()))?;

        tracing::info!("Serving {} at http://{}", self.config.root.display(), addr);

        if self.config.open {
            let url = format!("http://{}", addr);
            if let Err(e) = open::that(&url) {
                tracing::warn!("Failed to open browser: {}", e);
            }
        }

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))
    }
}

/// Router serving `root` with live reload.
pub fn router(root: PathBuf, hub: LiveReloadHub) -> Router {
    Router::new()
        .route(LIVERELOAD_PATH, get(ws_handler))
        .route(LIVERELOAD_SCRIPT_PATH, get(script_handler))
        .fallback_service(ServeDir::new(root))
        .layer(middleware::from_fn(inject_livereload))
        .with_state(hub)
}

/// Insert the client script tag before `</body>`, or append it.
pub fn inject_script(html: &str) -> String {
    let tag = format!(r#"<script src="{}"></script>"#, LIVERELOAD_SCRIPT_PATH);

    match html.rfind("</body>") {
        Some(pos) => format!("{}{}{}", &html[..pos], tag, &html[pos..]),
        None => format!("{}{}", html, tag),
    }
}

/// Rewrites successful HTML responses to load the live-reload client.
async fn inject_livereload(request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"));
    if !is_html || response.status() != StatusCode::OK {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Failed to read HTML response: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes));
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(html))
}

/// Handler for the live-reload WebSocket endpoint.
async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<LiveReloadHub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, hub))
}

async fn handle_ws(mut socket: WebSocket, hub: LiveReloadHub) {
    let mut rx = hub.subscribe();

    if send(&mut socket, &ReloadMessage::Connected).await.is_err() {
        return;
    }

    loop {
        let msg = match rx.recv().await {
            Ok(msg) => msg,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Live reload client lagged by {} messages", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if send(&mut socket, &msg).await.is_err() {
            break;
        }
    }
}

async fn send(socket: &mut WebSocket, msg: &ReloadMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    socket.send(Message::Text(json.into())).await
}

/// Handler for the client script.
async fn script_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        client_script(LIVERELOAD_PATH),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn serve(root: PathBuf) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(root, LiveReloadHub::new());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn injects_before_closing_body() {
        assert_eq!(
            inject_script("<html><body><p>hi</p></body></html>"),
            r#"<html><body><p>hi</p><script src="/__livereload.js"></script></body></html>"#
        );
    }

    #[test]
    fn appends_when_body_is_missing() {
        assert_eq!(
            inject_script("<p>fragment</p>"),
            r#"<p>fragment</p><script src="/__livereload.js"></script>"#
        );
    }

    #[test]
    fn defaults_to_local_port_3000() {
        let config = DevServerConfig::default();

        assert_eq!(config.addr().unwrap(), "127.0.0.1:3000".parse::<std::net::SocketAddr>().unwrap());
    }

    #[test]
    fn rejects_invalid_host() {
        let config = DevServerConfig {
            host: "not a host".to_string(),
            ..DevServerConfig::default()
        };

        assert!(matches!(config.addr(), Err(ServerError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn serves_pages_with_client_script() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("index.html"), "<body>home</body>").unwrap();
        fs::create_dir_all(temp.path().join("assets/css")).unwrap();
        fs::write(temp.path().join("assets/css/main.css"), "body{}").unwrap();
        let addr = serve(temp.path().to_path_buf()).await;

        let page = get(addr, "/index.html").await;
        assert!(page.starts_with("HTTP/1.1 200"));
        assert!(page.contains(r#"home<script src="/__livereload.js"></script></body>"#));

        let css = get(addr, "/assets/css/main.css").await;
        assert!(css.ends_with("body{}"));
        assert!(!css.contains("__livereload"));

        let script = get(addr, LIVERELOAD_SCRIPT_PATH).await;
        assert!(script.contains("application/javascript"));
        assert!(script.contains("location.reload()"));
    }
}
