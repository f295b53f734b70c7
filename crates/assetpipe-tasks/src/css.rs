//! SCSS compilation and CSS post-processing.

use std::path::Path;

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use serde::Deserialize;

use crate::error::{StageError, TaskError};
use crate::pipeline::{Dest, Pipeline, Reload, Rename, Stage, StageContext};
use crate::stream::Asset;

/// Options for the CSS task.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CssOptions {
    /// Browserslist queries driving vendor prefixes
    pub browsers: Vec<String>,

    /// Indentation of the canonical (unminified) output
    pub indent: String,
}

impl Default for CssOptions {
    fn default() -> Self {
        Self {
            browsers: vec!["defaults".to_string()],
            indent: "    ".to_string(),
        }
    }
}

impl CssOptions {
    /// Resolve the browser queries into lightningcss targets.
    pub fn targets(&self) -> Result<Targets, TaskError> {
        let browsers = Browsers::from_browserslist(self.browsers.iter())
            .map_err(|e| TaskError::Config(format!("invalid browsers query: {}", e)))?;

        Ok(Targets {
            browsers,
            ..Targets::default()
        })
    }
}

/// Compile SCSS into plain CSS. Imports resolve relative to `load_path`.
pub fn compile_scss(source: &str, load_path: &Path) -> Result<String, String> {
    let options = grass::Options::default()
        .load_path(load_path)
        .style(grass::OutputStyle::Expanded);

    grass::from_string(source.to_string(), &options).map_err(|e| e.to_string())
}

/// Add the vendor prefixes the targets need.
///
/// Prefixing runs through the lightningcss minify passes, so the output is
/// also optimized: duplicate rules merge, longhands fold into shorthands and
/// colours take their shortest form. Printing stays expanded.
pub fn autoprefix(css: &str, filename: &str, targets: Targets) -> Result<String, String> {
    let mut stylesheet = StyleSheet::parse(
        css,
        ParserOptions {
            filename: filename.to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| format!("CSS parse error: {}", e))?;

    stylesheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| format!("CSS prefix error: {}", e))?;

    let printed = stylesheet
        .to_css(PrinterOptions {
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| format!("CSS print error: {}", e))?;

    Ok(printed.code)
}

/// Re-indent printed CSS with `indent` per nesting level.
///
/// Expects the two-space indentation lightningcss prints.
pub fn beautify(css: &str, indent: &str) -> String {
    let mut out = String::with_capacity(css.len());

    for line in css.lines() {
        let content = line.trim_start_matches(' ');
        if content.trim().is_empty() {
            out.push('\n');
            continue;
        }

        let depth = (line.len() - content.len()) / 2;
        for _ in 0..depth {
            out.push_str(indent);
        }
        out.push_str(content.trim_end());
        out.push('\n');
    }

    out
}

/// Minify CSS. z-index values are left as written.
pub fn minify(css: &str, filename: &str, targets: Targets) -> Result<String, String> {
    let mut stylesheet = StyleSheet::parse(
        css,
        ParserOptions {
            filename: filename.to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| format!("CSS parse error: {}", e))?;

    stylesheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| format!("CSS minify error: {}", e))?;

    let minified = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| format!("CSS minify error: {}", e))?;

    Ok(minified.code)
}

/// Remove every `/* ... */` comment, including `/*! ... */`, outside strings.
pub fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut chars = css.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push(c);
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

fn display_name(asset: &Asset) -> String {
    asset.relative.to_string_lossy().into_owned()
}

/// SCSS → CSS.
pub struct CompileScss;

impl Stage for CompileScss {
    fn name(&self) -> &'static str {
        "scss"
    }

    fn apply(&self, mut asset: Asset, _cx: &StageContext<'_>) -> Result<Asset, StageError> {
        let load_path = asset.source.parent().unwrap_or(Path::new("."));
        let css = compile_scss(asset.text()?, load_path).map_err(StageError::Compile)?;

        asset.set_text(css);
        asset.relative.set_extension("css");
        Ok(asset)
    }
}

/// Vendor prefixing for the configured browsers.
pub struct Autoprefix {
    targets: Targets,
}

impl Stage for Autoprefix {
    fn name(&self) -> &'static str {
        "autoprefix"
    }

    fn apply(&self, mut asset: Asset, _cx: &StageContext<'_>) -> Result<Asset, StageError> {
        let css = autoprefix(asset.text()?, &display_name(&asset), self.targets)
            .map_err(StageError::Compile)?;
        asset.set_text(css);
        Ok(asset)
    }
}

/// Canonical pretty-printing.
pub struct Beautify {
    indent: String,
}

impl Stage for Beautify {
    fn name(&self) -> &'static str {
        "beautify"
    }

    fn apply(&self, mut asset: Asset, _cx: &StageContext<'_>) -> Result<Asset, StageError> {
        let css = beautify(asset.text()?, &self.indent);
        asset.set_text(css);
        Ok(asset)
    }
}

/// Minification.
pub struct MinifyCss {
    targets: Targets,
}

impl Stage for MinifyCss {
    fn name(&self) -> &'static str {
        "minify"
    }

    fn apply(&self, mut asset: Asset, _cx: &StageContext<'_>) -> Result<Asset, StageError> {
        let css = minify(asset.text()?, &display_name(&asset), self.targets)
            .map_err(StageError::Compile)?;
        asset.set_text(css);
        Ok(asset)
    }
}

/// Removes comments the minifier kept.
pub struct StripComments;

impl Stage for StripComments {
    fn name(&self) -> &'static str {
        "strip-comments"
    }

    fn apply(&self, mut asset: Asset, _cx: &StageContext<'_>) -> Result<Asset, StageError> {
        let css = strip_comments(asset.text()?);
        asset.set_text(css);
        Ok(asset)
    }
}

/// Pipeline for the CSS task.
pub fn pipeline(options: &CssOptions, targets: Targets, output: &Path) -> Pipeline {
    Pipeline::new("css", "SCSS error")
        .stage(CompileScss)
        .stage(Autoprefix { targets })
        .stage(Beautify {
            indent: options.indent.clone(),
        })
        .stage(Dest::new(output))
        .stage(MinifyCss { targets })
        .stage(StripComments)
        .stage(Rename::suffix(".min"))
        .stage(Dest::new(output))
        .stage(Reload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn compiles_variables_and_nesting() {
        let temp = tempdir().unwrap();
        let scss = "$brand: #ff0000;\n.nav { a { color: $brand; } }";

        let css = compile_scss(scss, temp.path()).unwrap();

        assert!(css.contains(".nav a"));
        assert!(css.contains("color: #ff0000"));
    }

    #[test]
    fn resolves_imports_from_load_path() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("_vars.scss"), "$gap: 4px;").unwrap();

        let css = compile_scss("@import 'vars';\n.a { margin: $gap; }", temp.path()).unwrap();

        assert!(css.contains("margin: 4px"));
    }

    #[test]
    fn reports_scss_syntax_errors() {
        let temp = tempdir().unwrap();

        assert!(compile_scss(".a { color: ", temp.path()).is_err());
    }

    #[test]
    fn adds_vendor_prefixes_for_old_browsers() {
        let targets = CssOptions {
            browsers: vec!["safari 10".to_string()],
            ..CssOptions::default()
        }
        .targets()
        .unwrap();

        let css = autoprefix(".a { user-select: none; }", "a.css", targets).unwrap();

        assert!(css.contains("-webkit-user-select: none"));
    }

    #[test]
    fn prefixing_also_optimizes_rules() {
        let targets = CssOptions::default().targets().unwrap();

        let css = autoprefix(
            ".a { color: #ff0000; }\n.a { color: #ff0000; }\n",
            "a.css",
            targets,
        )
        .unwrap();

        assert_eq!(css.matches(".a").count(), 1);
        assert!(css.contains("color: red"));
        assert!(css.contains('\n'));
    }

    #[test]
    fn reindents_nested_blocks() {
        let printed = "@media (width >= 100px) {\n  .a {\n    color: red;\n  }\n}\n";

        assert_eq!(
            beautify(printed, "    "),
            "@media (width >= 100px) {\n    .a {\n        color: red;\n    }\n}\n"
        );
    }

    #[test]
    fn minified_output_is_not_larger() {
        let canonical = ".a {\n    color: #ffffff;\n    z-index: 10;\n}\n\n.b {\n    z-index: 2;\n}\n";

        let minified = minify(canonical, "a.css", Targets::default()).unwrap();

        assert!(minified.len() <= canonical.len());
        assert!(!minified.contains('\n'));
        assert!(minified.contains("z-index:10"));
        assert!(minified.contains("z-index:2"));
    }

    #[test]
    fn strips_comments_outside_strings() {
        let css = ".a{content:\"/* keep */\"}/*! license */.b{color:red}/* note */";

        assert_eq!(
            strip_comments(css),
            ".a{content:\"/* keep */\"}.b{color:red}"
        );
    }

    #[test]
    fn rejects_invalid_browser_queries() {
        let options = CssOptions {
            browsers: vec!["not a real browser 99".to_string()],
            ..CssOptions::default()
        };

        assert!(options.targets().is_err());
    }
}
