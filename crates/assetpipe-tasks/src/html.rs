//! HTML pages rendered with layouts and partials.
//!
//! Layouts and partials live in a [`TemplateCache`] that is refreshed at the
//! start of every HTML run, since page files do not track the templates they
//! pull in.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use minijinja::{AutoEscape, Environment, ErrorKind, Value};
use walkdir::WalkDir;

use crate::error::{StageError, TaskError};
use crate::frontmatter::{extract_frontmatter, PageMeta};
use crate::pipeline::{Dest, Pipeline, Reload, Stage, StageContext};
use crate::stream::Asset;

/// Layout used when a page does not name one.
pub const DEFAULT_LAYOUT: &str = "default";

/// Layout name that disables wrapping.
pub const NO_LAYOUT: &str = "none";

/// Summary of a cache refresh.
#[derive(Debug, Default)]
pub struct RefreshSummary {
    /// Templates loaded
    pub templates: usize,
    /// Templates that failed to compile, with their error
    pub errors: Vec<(PathBuf, String)>,
}

/// Layout and partial templates shared by all pages of a run.
pub struct TemplateCache {
    env: RwLock<Environment<'static>>,
}

impl TemplateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            env: RwLock::new(Self::environment()),
        }
    }

    fn environment() -> Environment<'static> {
        let mut env = Environment::new();
        // Pages, layouts and partials are authored HTML.
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env
    }

    /// Drop every cached template and reload layouts and partials from disk.
    ///
    /// Layouts are registered as `layouts/<stem>`, partials under their path
    /// relative to the partials directory. Missing directories are skipped.
    pub fn refresh(&self, layouts_dir: &Path, partials_dir: &Path) -> Result<RefreshSummary, TaskError> {
        let mut env = Self::environment();
        let mut summary = RefreshSummary::default();

        for (path, relative) in template_files(layouts_dir)? {
            let stem = relative
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            load_template(&mut env, &mut summary, format!("layouts/{stem}"), &path)?;
        }

        for (path, relative) in template_files(partials_dir)? {
            let name = relative.to_string_lossy().replace('\\', "/");
            load_template(&mut env, &mut summary, name, &path)?;
        }

        *self.env.write().unwrap_or_else(|e| e.into_inner()) = env;

        tracing::debug!("Loaded {} templates", summary.templates);
        Ok(summary)
    }

    /// Render a page body and wrap it in its layout.
    pub fn render(&self, page: &Path, meta: &PageMeta, body: &str) -> Result<String, minijinja::Error> {
        let env = self.env.read().unwrap_or_else(|e| e.into_inner());

        let mut ctx: BTreeMap<String, Value> = meta
            .data
            .iter()
            .map(|(key, value)| (key.clone(), Value::from_serialize(value)))
            .collect();
        ctx.insert("page".to_string(), Value::from(page_name(page)));
        ctx.insert("root".to_string(), Value::from(root_prefix(page)));

        let body = env.render_str(body, &ctx)?;

        let layout = meta.layout.as_deref().unwrap_or(DEFAULT_LAYOUT);
        if layout == NO_LAYOUT {
            return Ok(body);
        }

        match env.get_template(&format!("layouts/{layout}")) {
            Ok(template) => {
                ctx.insert("body".to_string(), Value::from(body));
                template.render(&ctx)
            }
            Err(e) if e.kind() == ErrorKind::TemplateNotFound && meta.layout.is_none() => Ok(body),
            Err(e) => Err(e),
        }
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new()
    }
}

fn template_files(dir: &Path) -> Result<Vec<(PathBuf, PathBuf)>, TaskError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| TaskError::Walk {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path()).to_path_buf();
        files.push((entry.path().to_path_buf(), relative));
    }
    Ok(files)
}

fn load_template(
    env: &mut Environment<'static>,
    summary: &mut RefreshSummary,
    name: String,
    path: &Path,
) -> Result<(), TaskError> {
    let source = fs::read_to_string(path).map_err(|source| TaskError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    match env.add_template_owned(name, source) {
        Ok(()) => summary.templates += 1,
        Err(e) => summary.errors.push((path.to_path_buf(), e.to_string())),
    }
    Ok(())
}

fn page_name(page: &Path) -> String {
    page.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Relative prefix from a page back to the output root.
fn root_prefix(page: &Path) -> String {
    let depth = page.components().count().saturating_sub(1);
    "../".repeat(depth)
}

/// Renders a page through the template cache.
pub struct RenderPage {
    cache: Arc<TemplateCache>,
}

impl RenderPage {
    pub fn new(cache: Arc<TemplateCache>) -> Self {
        Self { cache }
    }
}

impl Stage for RenderPage {
    fn name(&self) -> &'static str {
        "template"
    }

    fn apply(&self, mut asset: Asset, _cx: &StageContext<'_>) -> Result<Asset, StageError> {
        let source = asset.text()?;
        let (meta, body) =
            extract_frontmatter(source).map_err(|e| StageError::compile(e.to_string()))?;
        let meta = meta.unwrap_or_default();

        let html = self
            .cache
            .render(&asset.relative, &meta, body)
            .map_err(|e| StageError::compile(format!("{:#}", e)))?;

        asset.set_text(html);
        Ok(asset)
    }
}

/// Pipeline for the HTML task.
pub fn pipeline(cache: Arc<TemplateCache>, output: &Path) -> Pipeline {
    Pipeline::new("html", "HTML error")
        .stage(RenderPage::new(cache))
        .stage(Dest::new(output))
        .stage(Reload)
}
