//! Stage pipelines with per-file error isolation.

use std::fs;
use std::path::PathBuf;

use rayon::prelude::*;

use crate::error::{StageError, TaskError};
use crate::report::{ErrorReport, Notifier};
use crate::stream::{Asset, FileStream};

/// Context handed to every stage.
pub struct StageContext<'a> {
    /// Name of the running task
    pub task: &'static str,
    /// Receiver for reload signals
    pub notifier: &'a dyn Notifier,
}

/// One transform step of a pipeline.
pub trait Stage: Send + Sync {
    /// Stage identifier used in error reports.
    fn name(&self) -> &'static str;

    /// Transform an asset.
    fn apply(&self, asset: Asset, cx: &StageContext<'_>) -> Result<Asset, StageError>;
}

/// Result of running a pipeline over a stream.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// Files that went through every stage
    pub processed: usize,
    /// Reports for files that were skipped
    pub reports: Vec<ErrorReport>,
}

enum FileOutcome {
    Done,
    Skipped(ErrorReport),
}

/// Linear chain of stages.
pub struct Pipeline {
    task: &'static str,
    title: &'static str,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Create an empty pipeline; `title` heads error notifications.
    pub fn new(task: &'static str, title: &'static str) -> Self {
        Self {
            task,
            title,
            stages: Vec::new(),
        }
    }

    /// Append a stage.
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Stage names, in order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every file of the stream through the stages.
    ///
    /// Files are processed in parallel. Compile errors skip the file; read and
    /// write errors fail the run.
    pub fn run(
        &self,
        stream: FileStream,
        notifier: &dyn Notifier,
    ) -> Result<PipelineOutcome, TaskError> {
        let cx = StageContext {
            task: self.task,
            notifier,
        };

        let results: Vec<Result<FileOutcome, TaskError>> = stream
            .par_bridge()
            .map(|item| self.process(item?, &cx))
            .collect();

        let mut outcome = PipelineOutcome::default();
        for result in results {
            match result? {
                FileOutcome::Done => outcome.processed += 1,
                FileOutcome::Skipped(report) => outcome.reports.push(report),
            }
        }

        Ok(outcome)
    }

    fn process(&self, mut asset: Asset, cx: &StageContext<'_>) -> Result<FileOutcome, TaskError> {
        for stage in &self.stages {
            asset = match self.isolate(stage.as_ref(), asset, cx)? {
                Ok(next) => next,
                Err(report) => return Ok(FileOutcome::Skipped(report)),
            };
        }
        Ok(FileOutcome::Done)
    }

    /// Apply one stage, turning compile errors into a notified report.
    fn isolate(
        &self,
        stage: &dyn Stage,
        asset: Asset,
        cx: &StageContext<'_>,
    ) -> Result<Result<Asset, ErrorReport>, TaskError> {
        let file = asset.source.clone();

        match stage.apply(asset, cx) {
            Ok(asset) => Ok(Ok(asset)),
            Err(StageError::Compile(message)) => {
                let report = ErrorReport {
                    task: self.task.to_string(),
                    stage: stage.name().to_string(),
                    file,
                    title: self.title.to_string(),
                    message,
                };
                cx.notifier.error(&report);
                Ok(Err(report))
            }
            Err(StageError::Write { path, source }) => Err(TaskError::Write { path, source }),
        }
    }
}

/// Writes the asset under a directory, keeping its relative path.
pub struct Dest {
    dir: PathBuf,
}

impl Dest {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Stage for Dest {
    fn name(&self) -> &'static str {
        "dest"
    }

    fn apply(&self, mut asset: Asset, _cx: &StageContext<'_>) -> Result<Asset, StageError> {
        let path = self.dir.join(&asset.relative);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StageError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(&path, &asset.contents).map_err(|source| StageError::Write {
            path: path.clone(),
            source,
        })?;

        asset.written = Some(path);
        Ok(asset)
    }
}

/// Inserts a suffix before the file extension (`main.css` -> `main.min.css`).
pub struct Rename {
    suffix: &'static str,
}

impl Rename {
    pub fn suffix(suffix: &'static str) -> Self {
        Self { suffix }
    }
}

impl Stage for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn apply(&self, mut asset: Asset, _cx: &StageContext<'_>) -> Result<Asset, StageError> {
        let stem = asset
            .relative
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let file_name = match asset.relative.extension() {
            Some(ext) => format!("{}{}.{}", stem, self.suffix, ext.to_string_lossy()),
            None => format!("{}{}", stem, self.suffix),
        };

        asset.relative.set_file_name(file_name);
        Ok(asset)
    }
}

/// Signals the notifier that the asset's output changed.
pub struct Reload;

impl Stage for Reload {
    fn name(&self) -> &'static str {
        "reload"
    }

    fn apply(&self, asset: Asset, cx: &StageContext<'_>) -> Result<Asset, StageError> {
        let path = asset.written.as_deref().unwrap_or(&asset.relative);
        cx.notifier.reload(path);
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::{Category, PathTable};
    use crate::report::LogNotifier;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Uppercases text, failing on files containing "broken".
    struct Shout;

    impl Stage for Shout {
        fn name(&self) -> &'static str {
            "shout"
        }

        fn apply(&self, mut asset: Asset, _cx: &StageContext<'_>) -> Result<Asset, StageError> {
            let text = asset.text()?.to_string();
            if text.contains("broken") {
                return Err(StageError::compile("cannot shout"));
            }
            asset.set_text(text.to_uppercase());
            Ok(asset)
        }
    }

    #[derive(Default)]
    struct Recorder {
        reloads: Mutex<Vec<PathBuf>>,
        errors: Mutex<Vec<ErrorReport>>,
    }

    impl Notifier for Recorder {
        fn reload(&self, path: &Path) {
            self.reloads.lock().unwrap().push(path.to_path_buf());
        }

        fn error(&self, report: &ErrorReport) {
            self.errors.lock().unwrap().push(report.clone());
        }
    }

    #[test]
    fn renames_with_suffix_before_extension() {
        let cx = StageContext {
            task: "css",
            notifier: &LogNotifier,
        };
        let asset = Asset::new("src/main.css", "nested/main.css", Vec::new());

        let renamed = Rename::suffix(".min").apply(asset, &cx).unwrap();

        assert_eq!(renamed.relative, Path::new("nested/main.min.css"));
    }

    #[test]
    fn isolates_compile_errors_per_file() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let out = temp.path().join("dist");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("good.html"), "hello").unwrap();
        fs::write(src.join("bad.html"), "broken").unwrap();

        let table = PathTable::new(&src, &out).unwrap();
        let pipeline = Pipeline::new("html", "HTML error")
            .stage(Shout)
            .stage(Dest::new(&out))
            .stage(Reload);
        let recorder = Recorder::default();

        let outcome = pipeline
            .run(FileStream::new(table.get(Category::Html), &src), &recorder)
            .unwrap();

        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].stage, "shout");
        assert_eq!(outcome.reports[0].title, "HTML error");
        assert_eq!(fs::read_to_string(out.join("good.html")).unwrap(), "HELLO");
        assert!(!out.join("bad.html").exists());
        assert_eq!(recorder.errors.lock().unwrap().len(), 1);
        assert_eq!(*recorder.reloads.lock().unwrap(), vec![out.join("good.html")]);
    }

    #[test]
    fn lists_stage_names() {
        let pipeline = Pipeline::new("js", "JS error")
            .stage(Dest::new("dist"))
            .stage(Rename::suffix(".min"))
            .stage(Reload);

        assert_eq!(pipeline.stage_names(), vec!["dest", "rename", "reload"]);
    }
}
