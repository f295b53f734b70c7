//! WebSocket-based live reload.

use std::path::Path;

use assetpipe_tasks::{ErrorReport, Notifier};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Messages sent to connected browsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReloadMessage {
    /// An output file changed
    Reload {
        /// Written path
        path: String,
    },

    /// A stylesheet changed; swapped in place without a page reload
    Css {
        /// Written path
        path: String,
    },

    /// A file failed to build
    Error {
        /// Notification title
        title: String,
        /// Formatted message
        message: String,
        /// Source file
        file: String,
    },

    /// Connection established
    Connected,
}

/// Hub for broadcasting live-reload messages to all connected clients.
#[derive(Debug, Clone)]
pub struct LiveReloadHub {
    sender: broadcast::Sender<ReloadMessage>,
}

impl LiveReloadHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Send a message to all connected clients.
    pub fn send(&self, msg: ReloadMessage) {
        // No receivers is fine
        let _ = self.sender.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.sender.subscribe()
    }

    /// Get the number of connected clients.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LiveReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for LiveReloadHub {
    fn reload(&self, path: &Path) {
        tracing::debug!("Reload: {}", path.display());
        let path = path.to_string_lossy().replace('\\', "/");
        if path.ends_with(".css") {
            self.send(ReloadMessage::Css { path });
        } else {
            self.send(ReloadMessage::Reload { path });
        }
    }

    fn error(&self, report: &ErrorReport) {
        tracing::error!(
            task = %report.task,
            stage = %report.stage,
            file = %report.file.display(),
            "{}: {}",
            report.title,
            report.formatted()
        );
        self.send(ReloadMessage::Error {
            title: report.title.clone(),
            message: report.formatted(),
            file: report.file.display().to_string(),
        });
    }
}

/// Client-side live-reload script.
///
/// Connects back to whatever host served the page.
pub fn client_script(endpoint: &str) -> String {
    format!(
        r#"
(function() {{
  'use strict';

  var ws = new WebSocket('ws://' + location.host + '{}');

  function fileName(path) {{
    return path.split('?')[0].split('/').pop();
  }}

  // Re-fetch stylesheets named like the changed file. Unlinked sheets
  // (the unminified twin of a linked one) are ignored.
  function refreshCss(path) {{
    var name = fileName(path);
    var links = document.querySelectorAll('link[rel="stylesheet"]');

    for (var i = 0; i < links.length; i++) {{
      var href = links[i].getAttribute('href');
      if (href && fileName(href) === name) {{
        links[i].setAttribute('href', href.split('?')[0] + '?livereload=' + Date.now());
      }}
    }}
  }}

  ws.onmessage = function(event) {{
    var msg = JSON.parse(event.data);

    switch (msg.type) {{
      case 'reload':
        location.reload();
        break;

      case 'css':
        refreshCss(msg.path);
        break;

      case 'error':
        console.error('[assetpipe] ' + msg.title + ' in ' + msg.file + '\n' + msg.message);
        break;

      case 'connected':
        console.log('[assetpipe] Live reload connected');
        break;
    }}
  }};

  ws.onclose = function() {{
    console.log('[assetpipe] Live reload disconnected');
  }};
}})();
"#,
        endpoint
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn hub_broadcasts_reloads() {
        let hub = LiveReloadHub::new();
        let mut rx = hub.subscribe();

        hub.reload(Path::new("dist/index.html"));

        assert_eq!(
            rx.try_recv().unwrap(),
            ReloadMessage::Reload {
                path: "dist/index.html".to_string()
            }
        );
    }

    #[test]
    fn stylesheets_refresh_in_place() {
        let hub = LiveReloadHub::new();
        let mut rx = hub.subscribe();

        hub.reload(Path::new("dist/assets/css/main.min.css"));

        let msg = rx.try_recv().unwrap();
        assert_eq!(
            msg,
            ReloadMessage::Css {
                path: "dist/assets/css/main.min.css".to_string()
            }
        );
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"css","path":"dist/assets/css/main.min.css"}"#
        );

        let script = client_script("/__livereload");
        assert!(script.contains("case 'css':\n        refreshCss(msg.path);"));
        assert!(script.contains("'?livereload=' + Date.now()"));
    }

    #[test]
    fn forwards_error_reports() {
        let hub = LiveReloadHub::new();
        let mut rx = hub.subscribe();
        let report = ErrorReport {
            task: "css".to_string(),
            stage: "scss".to_string(),
            file: PathBuf::from("src/assets/scss/main.scss"),
            title: "SCSS error".to_string(),
            message: "expected \";\"".to_string(),
        };

        hub.error(&report);

        match rx.try_recv().unwrap() {
            ReloadMessage::Error { title, message, .. } => {
                assert_eq!(title, "SCSS error");
                assert_eq!(message, "Error: expected \";\"");
            }
            other => panic!("Expected Error message, got {other:?}"),
        }
    }

    #[test]
    fn serializes_tagged_messages() {
        let json = serde_json::to_string(&ReloadMessage::Connected).unwrap();
        assert_eq!(json, r#"{"type":"connected"}"#);

        let json = serde_json::to_string(&ReloadMessage::Reload {
            path: "index.html".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"reload","path":"index.html"}"#);
    }

    #[test]
    fn client_connects_to_serving_host() {
        let script = client_script("/__livereload");

        assert!(script.contains("'ws://' + location.host + '/__livereload'"));
    }
}
