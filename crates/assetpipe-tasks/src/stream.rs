//! Lazy file streams over a category's build glob.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{StageError, TaskError};
use crate::paths::{CategoryPaths, Depth};

/// A file moving through a pipeline.
#[derive(Debug, Clone)]
pub struct Asset {
    /// Source file path
    pub source: PathBuf,

    /// Path relative to the category base; stages may rename it
    pub relative: PathBuf,

    /// Current contents
    pub contents: Vec<u8>,

    /// Last path this asset was written to
    pub written: Option<PathBuf>,
}

impl Asset {
    /// Create an asset from already loaded contents.
    pub fn new(source: impl Into<PathBuf>, relative: impl Into<PathBuf>, contents: Vec<u8>) -> Self {
        Self {
            source: source.into(),
            relative: relative.into(),
            contents,
            written: None,
        }
    }

    /// Contents as UTF-8 text.
    pub fn text(&self) -> Result<&str, StageError> {
        std::str::from_utf8(&self.contents).map_err(|e| {
            StageError::compile(format!("{} is not valid UTF-8: {}", self.source.display(), e))
        })
    }

    /// Replace contents with text.
    pub fn set_text(&mut self, text: String) {
        self.contents = text.into_bytes();
    }
}

/// Ordered, lazy sequence of files matched by a category's build glob.
///
/// Files are read when the stream is advanced, not up front.
pub struct FileStream {
    source_root: PathBuf,
    base: PathBuf,
    entries: Option<walkdir::IntoIter>,
    paths: CategoryPaths,
}

impl FileStream {
    /// Stream the files a category builds.
    ///
    /// A missing base directory yields an empty stream.
    pub fn new(paths: &CategoryPaths, source_root: &Path) -> Self {
        let base = paths.base().to_path_buf();
        let entries = base.is_dir().then(|| {
            let walker = WalkDir::new(&base).follow_links(true).sort_by_file_name();
            match paths.depth() {
                Depth::Direct => walker.max_depth(1).into_iter(),
                Depth::Recursive => walker.into_iter(),
            }
        });

        Self {
            source_root: source_root.to_path_buf(),
            base,
            entries,
            paths: paths.clone(),
        }
    }

    fn load(&self, path: &Path) -> Result<Asset, TaskError> {
        let contents = fs::read(path).map_err(|source| TaskError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let relative = path.strip_prefix(&self.base).unwrap_or(path).to_path_buf();
        Ok(Asset::new(path, relative, contents))
    }
}

impl Iterator for FileStream {
    type Item = Result<Asset, TaskError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.entries.as_mut()?.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(&self.base).to_path_buf();
                    return Some(Err(TaskError::Walk {
                        path,
                        message: e.to_string(),
                    }));
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let rel = path.strip_prefix(&self.source_root).unwrap_or(path);
            if !self.paths.matches_build(rel) {
                continue;
            }

            return Some(self.load(path));
        }
    }
}
