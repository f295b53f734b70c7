//! Asset tasks: one pipeline run per category.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use lightningcss::targets::Targets;
use serde::Deserialize;

use crate::css::{self, CssOptions};
use crate::error::TaskError;
use crate::fonts::{self, FontOptions};
use crate::html::{self, TemplateCache};
use crate::images::{self, ImageOptions};
use crate::js;
use crate::paths::{Category, PathTable};
use crate::pipeline::Pipeline;
use crate::report::{ErrorReport, Notifier};
use crate::stream::FileStream;

/// Per-task options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    pub css: CssOptions,
    pub images: ImageOptions,
    pub fonts: FontOptions,
}

/// Result of one task run.
#[derive(Debug)]
pub struct TaskResult {
    /// Category that ran
    pub category: Category,

    /// Files written (or signalled) successfully
    pub processed: usize,

    /// Files skipped because a stage failed
    pub reports: Vec<ErrorReport>,

    /// Total run time in milliseconds
    pub duration_ms: u64,

    /// Output directory
    pub output_dir: PathBuf,
}

impl TaskResult {
    /// Number of skipped files.
    pub fn failed(&self) -> usize {
        self.reports.len()
    }
}

/// Runs the asset task of any category against a fixed path table.
pub struct AssetTasks {
    paths: PathTable,
    options: TaskOptions,
    targets: Targets,
    templates: Arc<TemplateCache>,
}

impl AssetTasks {
    /// Create the task runner. Browser targets are resolved here so bad
    /// queries fail before any file is touched.
    pub fn new(paths: PathTable, options: TaskOptions) -> Result<Self, TaskError> {
        let targets = options.css.targets()?;

        Ok(Self {
            paths,
            options,
            targets,
            templates: Arc::new(TemplateCache::new()),
        })
    }

    pub fn paths(&self) -> &PathTable {
        &self.paths
    }

    /// Pipeline a category runs.
    pub fn pipeline(&self, category: Category) -> Pipeline {
        let output = self.paths.get(category).output();

        match category {
            Category::Html => html::pipeline(Arc::clone(&self.templates), output),
            Category::Css => css::pipeline(&self.options.css, self.targets, output),
            Category::Js => js::pipeline(output),
            Category::Images => images::pipeline(&self.options.images, output),
            Category::Fonts => fonts::pipeline(&self.options.fonts, output),
        }
    }

    /// Run a category's task over every file its build glob matches.
    ///
    /// Per-file failures are reported to `notifier` and collected in the
    /// result. Read and write failures fail the task.
    pub fn run(&self, category: Category, notifier: &dyn Notifier) -> Result<TaskResult, TaskError> {
        let start = Instant::now();
        let paths = self.paths.get(category);
        let mut reports = Vec::new();

        if category == Category::Html {
            let summary = self
                .templates
                .refresh(&self.paths.layouts_dir(), &self.paths.partials_dir())?;
            for (file, message) in summary.errors {
                let report = ErrorReport {
                    task: category.name().to_string(),
                    stage: "template".to_string(),
                    file,
                    title: "HTML error".to_string(),
                    message,
                };
                notifier.error(&report);
                reports.push(report);
            }
        }

        let stream = FileStream::new(paths, self.paths.source_root());
        let outcome = self.pipeline(category).run(stream, notifier)?;
        reports.extend(outcome.reports);

        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            "{}: {} processed, {} failed in {}ms",
            category,
            outcome.processed,
            reports.len(),
            duration_ms
        );

        Ok(TaskResult {
            category,
            processed: outcome.processed,
            reports,
            duration_ms,
            output_dir: paths.output().to_path_buf(),
        })
    }
}
