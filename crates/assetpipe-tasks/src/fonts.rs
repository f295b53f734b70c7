//! Font files.

use std::path::Path;

use serde::Deserialize;

use crate::pipeline::{Dest, Pipeline, Reload};

/// Options for the fonts task.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FontOptions {
    /// Copy fonts into the output tree. When off, changes only trigger a reload.
    pub copy: bool,
}

impl Default for FontOptions {
    fn default() -> Self {
        Self { copy: true }
    }
}

/// Pipeline for the fonts task.
pub fn pipeline(options: &FontOptions, output: &Path) -> Pipeline {
    let pipeline = Pipeline::new("fonts", "Font error");
    let pipeline = if options.copy {
        pipeline.stage(Dest::new(output))
    } else {
        pipeline
    };
    pipeline.stage(Reload)
}
