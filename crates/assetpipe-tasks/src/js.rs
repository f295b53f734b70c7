//! JavaScript include expansion and minification.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_minifier::{CompressOptions, MangleOptions, Minifier, MinifierOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;
use regex::Regex;

use crate::error::StageError;
use crate::pipeline::{Dest, Pipeline, Reload, Rename, Stage, StageContext};
use crate::stream::Asset;

/// A line holding only an include directive:
/// `//= file.js`, `//= include file.js`, `// =include file.js`, `/*= file.js */`.
static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<indent>[ \t]*)(?://\s*=\s*(?:include\s+)?(?P<line>[^=\s]\S*)|/\*\s*=\s*(?:include\s+)?(?P<block>[^=\s*]\S*?)\s*\*/)\s*$",
    )
    .expect("Invalid include directive regex")
});

/// Errors while expanding includes.
#[derive(Debug, thiserror::Error)]
pub enum IncludeError {
    #[error("Included file not found: {} (from {})", path.display(), from.display())]
    Missing { path: PathBuf, from: PathBuf },

    #[error("Include cycle through {}", path.display())]
    Cycle { path: PathBuf },
}

/// Splice included files into `source`, recursively.
///
/// Paths resolve relative to the including file. Included lines take the
/// indentation of the directive.
pub fn resolve_includes(source: &str, path: &Path) -> Result<String, IncludeError> {
    let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let mut stack = vec![root];
    expand(source, path, &mut stack)
}

fn expand(source: &str, path: &Path, stack: &mut Vec<PathBuf>) -> Result<String, IncludeError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut out = String::with_capacity(source.len());

    for line in source.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\n', '\r']);
        let Some(caps) = INCLUDE_RE.captures(bare) else {
            out.push_str(line);
            continue;
        };

        let indent = caps.name("indent").map_or("", |m| m.as_str());
        let target = caps
            .name("line")
            .or_else(|| caps.name("block"))
            .map_or("", |m| m.as_str())
            .trim_matches(['"', '\'']);

        let target_path = dir.join(target);
        let missing = || IncludeError::Missing {
            path: target_path.clone(),
            from: path.to_path_buf(),
        };
        let resolved = target_path.canonicalize().map_err(|_| missing())?;

        if stack.contains(&resolved) {
            return Err(IncludeError::Cycle { path: resolved });
        }

        let text = fs::read_to_string(&resolved).map_err(|_| missing())?;
        stack.push(resolved.clone());
        let expanded = expand(&text, &resolved, stack)?;
        stack.pop();

        for included in expanded.split_inclusive('\n') {
            if !included.trim().is_empty() {
                out.push_str(indent);
            }
            out.push_str(included);
        }
        if line.ends_with('\n') && !expanded.ends_with('\n') {
            out.push('\n');
        }
    }

    Ok(out)
}

/// Minify a browser script. Top-level names are kept.
pub fn minify_js(source: &str) -> Result<String, String> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::cjs()).parse();

    if let Some(error) = parsed.errors.first() {
        return Err(format!("JS parse error: {}", error));
    }
    if parsed.panicked {
        return Err("JS parse error: parser gave up".to_string());
    }

    let mut program = parsed.program;
    let minified = Minifier::new(MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::default()),
    })
    .build(&allocator, &mut program);

    let code = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            ..CodegenOptions::default()
        })
        .with_scoping(minified.scoping)
        .build(&program)
        .code;

    Ok(code)
}

/// Include expansion.
pub struct ResolveIncludes;

impl Stage for ResolveIncludes {
    fn name(&self) -> &'static str {
        "include"
    }

    fn apply(&self, mut asset: Asset, _cx: &StageContext<'_>) -> Result<Asset, StageError> {
        let expanded = resolve_includes(asset.text()?, &asset.source)
            .map_err(|e| StageError::compile(e.to_string()))?;
        asset.set_text(expanded);
        Ok(asset)
    }
}

/// Minification.
pub struct MinifyJs;

impl Stage for MinifyJs {
    fn name(&self) -> &'static str {
        "minify"
    }

    fn apply(&self, mut asset: Asset, _cx: &StageContext<'_>) -> Result<Asset, StageError> {
        let code = minify_js(asset.text()?).map_err(StageError::Compile)?;
        asset.set_text(code);
        Ok(asset)
    }
}

/// Pipeline for the JS task.
pub fn pipeline(output: &Path) -> Pipeline {
    Pipeline::new("js", "JS error")
        .stage(ResolveIncludes)
        .stage(Dest::new(output))
        .stage(MinifyJs)
        .stage(Rename::suffix(".min"))
        .stage(Dest::new(output))
        .stage(Reload)
}
