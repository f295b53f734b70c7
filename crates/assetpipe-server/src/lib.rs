//! Development server with live reload for assetpipe output.
//!
//! Serves the output tree, injects a live-reload client into HTML pages and
//! watches the source tree for changes.

pub mod livereload;
pub mod server;
pub mod watcher;

pub use livereload::{client_script, LiveReloadHub, ReloadMessage};
pub use server::{inject_script, router, DevServer, DevServerConfig, ServerError};
pub use watcher::{FileWatcher, WatchEvent};
