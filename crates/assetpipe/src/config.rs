//! Configuration file (assetpipe.toml).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use assetpipe_server::DevServerConfig;
use assetpipe_tasks::{CssOptions, FontOptions, ImageOptions, TaskOptions};
use serde::Deserialize;

/// Configuration file structure.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub server: DevServerConfig,
    pub css: CssOptions,
    pub images: ImageOptions,
    pub fonts: FontOptions,
}

/// Source and output roots.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub src: PathBuf,
    pub dist: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            src: PathBuf::from("src"),
            dist: PathBuf::from("dist"),
        }
    }
}

impl Config {
    /// Options handed to the asset tasks.
    pub fn task_options(&self) -> TaskOptions {
        TaskOptions {
            css: self.css.clone(),
            images: self.images.clone(),
            fonts: self.fonts.clone(),
        }
    }

    /// Dev server settings, serving the output root.
    pub fn server_config(&self) -> DevServerConfig {
        DevServerConfig {
            root: self.paths.dist.clone(),
            ..self.server.clone()
        }
    }
}

/// Load configuration from `path` if it exists.
/// Returns an error if the config file exists but is malformed.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!("No {} found, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempdir().unwrap();

        let config = load_config(&temp.path().join("assetpipe.toml")).unwrap();

        assert_eq!(config.paths.src, PathBuf::from("src"));
        assert_eq!(config.paths.dist, PathBuf::from("dist"));
        assert_eq!(config.server.port, 3000);
        assert!(config.server.open);
        assert_eq!(config.css.browsers, vec!["defaults".to_string()]);
        assert_eq!(config.images.jpeg_quality, 75);
        assert!(config.fonts.copy);
    }

    #[test]
    fn reads_partial_sections() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("assetpipe.toml");
        fs::write(
            &path,
            r#"
[paths]
dist = "public"

[server]
port = 8080
open = false

[css]
browsers = ["last 2 versions"]

[images]
svg_cleanup_ids = true

[fonts]
copy = false
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();

        assert_eq!(config.paths.src, PathBuf::from("src"));
        assert_eq!(config.paths.dist, PathBuf::from("public"));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(!config.server.open);
        assert_eq!(config.css.browsers, vec!["last 2 versions".to_string()]);
        assert_eq!(config.css.indent, "    ");
        assert!(config.images.svg_cleanup_ids);
        assert!(config.images.gif_interlaced);
        assert!(!config.fonts.copy);
        assert_eq!(config.server_config().root, PathBuf::from("public"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("assetpipe.toml");
        fs::write(&path, "[server]\nport = \"not a number\"\n").unwrap();

        let err = load_config(&path).unwrap_err();

        assert!(err.to_string().contains("Failed to parse"));
    }
}
