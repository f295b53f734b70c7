//! Category path table.
//!
//! Maps every asset category to its source base, build glob, watch glob and
//! output directory. Globs are built from explicit extension lists rather than
//! from user-supplied strings, and `*` never crosses a path separator.

use std::fmt;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};

/// Extensions picked up by the images task.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpeg", "jpg", "png", "svg", "webp", "gif", "ico", "xml", "json",
];

/// Extensions picked up by the fonts task.
pub const FONT_EXTENSIONS: &[&str] = &["eot", "woff", "woff2", "svg", "ttf"];

/// Layout templates used by the HTML task, relative to the source root.
pub const LAYOUTS_DIR: &str = "template/layouts";

/// Partial templates used by the HTML task, relative to the source root.
pub const PARTIALS_DIR: &str = "template/partials";

/// An asset category with its own pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Html,
    Css,
    Js,
    Images,
    Fonts,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 5] = [
        Category::Html,
        Category::Css,
        Category::Js,
        Category::Images,
        Category::Fonts,
    ];

    /// Task name of the category.
    pub fn name(self) -> &'static str {
        match self {
            Category::Html => "html",
            Category::Css => "css",
            Category::Js => "js",
            Category::Images => "images",
            Category::Fonts => "fonts",
        }
    }

    /// Look up a category by task name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    fn layout(self) -> Layout {
        match self {
            Category::Html => Layout {
                base: "",
                output: "",
                build_depth: Depth::Direct,
                extensions: &["html"],
                skip_partials: false,
            },
            Category::Css => Layout {
                base: "assets/scss",
                output: "assets/css",
                build_depth: Depth::Direct,
                extensions: &["scss"],
                skip_partials: true,
            },
            Category::Js => Layout {
                base: "assets/js",
                output: "assets/js",
                build_depth: Depth::Direct,
                extensions: &["js"],
                skip_partials: false,
            },
            Category::Images => Layout {
                base: "assets/images",
                output: "assets/images",
                build_depth: Depth::Recursive,
                extensions: IMAGE_EXTENSIONS,
                skip_partials: false,
            },
            Category::Fonts => Layout {
                base: "assets/fonts",
                output: "assets/fonts",
                build_depth: Depth::Recursive,
                extensions: FONT_EXTENSIONS,
                skip_partials: false,
            },
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How deep a build glob reaches below the category base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Direct children of the base only
    Direct,
    /// Any depth below the base
    Recursive,
}

/// Static row of the path table.
struct Layout {
    base: &'static str,
    output: &'static str,
    build_depth: Depth,
    extensions: &'static [&'static str],
    /// Files starting with `_` are only pulled in by other files
    skip_partials: bool,
}

/// Errors that can occur while building the path table.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Invalid glob pattern {pattern}: {message}")]
    InvalidGlob { pattern: String, message: String },
}

/// Resolved paths and matchers for one category.
#[derive(Debug, Clone)]
pub struct CategoryPaths {
    category: Category,
    base: PathBuf,
    output: PathBuf,
    depth: Depth,
    skip_partials: bool,
    build_glob: String,
    watch_glob: String,
    build: GlobMatcher,
    watch: GlobMatcher,
}

impl CategoryPaths {
    fn new(category: Category, source_root: &Path, output_root: &Path) -> Result<Self, PathError> {
        let layout = category.layout();
        let build_glob = glob_pattern(layout.base, layout.build_depth, layout.extensions);
        let watch_glob = glob_pattern(layout.base, Depth::Recursive, layout.extensions);

        Ok(Self {
            category,
            base: source_root.join(layout.base),
            output: output_root.join(layout.output),
            depth: layout.build_depth,
            skip_partials: layout.skip_partials,
            build: compile_glob(&build_glob)?,
            watch: compile_glob(&watch_glob)?,
            build_glob,
            watch_glob,
        })
    }

    /// Category these paths belong to.
    pub fn category(&self) -> Category {
        self.category
    }

    /// Directory that output paths are relative to.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Output directory for this category.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build depth below the base.
    pub fn depth(&self) -> Depth {
        self.depth
    }

    /// Build glob, relative to the source root.
    pub fn build_glob(&self) -> &str {
        &self.build_glob
    }

    /// Watch glob, relative to the source root.
    pub fn watch_glob(&self) -> &str {
        &self.watch_glob
    }

    /// Whether a path relative to the source root is built by this category.
    pub fn matches_build(&self, rel_path: &Path) -> bool {
        if self.skip_partials && is_partial(rel_path) {
            return false;
        }
        self.build.is_match(rel_path)
    }

    /// Whether a change to a path relative to the source root should rerun this category.
    pub fn matches_watch(&self, rel_path: &Path) -> bool {
        self.watch.is_match(rel_path)
    }
}

/// Immutable table of category paths, built once at startup.
#[derive(Debug, Clone)]
pub struct PathTable {
    source_root: PathBuf,
    output_root: PathBuf,
    entries: Vec<CategoryPaths>,
}

impl PathTable {
    /// Build the table for a source root and an output root.
    pub fn new(
        source_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Result<Self, PathError> {
        let source_root = source_root.into();
        let output_root = output_root.into();

        let entries = Category::ALL
            .into_iter()
            .map(|category| CategoryPaths::new(category, &source_root, &output_root))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source_root,
            output_root,
            entries,
        })
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Layout templates directory.
    pub fn layouts_dir(&self) -> PathBuf {
        self.source_root.join(LAYOUTS_DIR)
    }

    /// Partial templates directory.
    pub fn partials_dir(&self) -> PathBuf {
        self.source_root.join(PARTIALS_DIR)
    }

    /// Paths for a single category.
    pub fn get(&self, category: Category) -> &CategoryPaths {
        // Entries are built from Category::ALL, in order.
        &self.entries[category as usize]
    }

    /// All category entries.
    pub fn iter(&self) -> impl Iterator<Item = &CategoryPaths> {
        self.entries.iter()
    }

    /// Categories whose watch glob matches a path relative to the source root.
    pub fn watching(&self, rel_path: &Path) -> Vec<Category> {
        self.entries
            .iter()
            .filter(|entry| entry.matches_watch(rel_path))
            .map(|entry| entry.category)
            .collect()
    }
}

/// Build a glob such as `assets/images/**/*.{png,jpg}`.
fn glob_pattern(base: &str, depth: Depth, extensions: &[&str]) -> String {
    let dir = if base.is_empty() {
        String::new()
    } else {
        format!("{base}/")
    };
    let depth = match depth {
        Depth::Direct => "",
        Depth::Recursive => "**/",
    };
    let ext = match extensions {
        [single] => (*single).to_string(),
        many => format!("{{{}}}", many.join(",")),
    };
    format!("{dir}{depth}*.{ext}")
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher, PathError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| PathError::InvalidGlob {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('_'))
}
