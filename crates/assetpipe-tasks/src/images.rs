//! Image optimization.
//!
//! The optimizer is picked from the detected content type, not the extension.
//! Files matching no optimizer pass through untouched.

use std::borrow::Cow;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use std::sync::LazyLock;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, DynamicImage, ImageFormat};
use regex::Regex;
use serde::Deserialize;

use crate::error::StageError;
use crate::pipeline::{Dest, Pipeline, Reload, Stage, StageContext};
use crate::stream::Asset;

/// Options for the images task.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageOptions {
    /// Re-encode GIFs interlaced
    pub gif_interlaced: bool,

    /// JPEG quality (1-100)
    pub jpeg_quality: u8,

    /// PNG optimization level (0-7)
    pub png_optimization_level: u8,

    /// Drop `viewBox` when it matches `width`/`height`
    pub svg_remove_view_box: bool,

    /// Remove element IDs nothing references
    pub svg_cleanup_ids: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            gif_interlaced: true,
            jpeg_quality: 75,
            png_optimization_level: 5,
            svg_remove_view_box: true,
            svg_cleanup_ids: false,
        }
    }
}

/// Content type of an image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Gif,
    Jpeg,
    Png,
    Svg,
    Other,
}

impl ImageKind {
    /// Detect the kind from file contents.
    pub fn detect(bytes: &[u8]) -> Self {
        match image::guess_format(bytes) {
            Ok(ImageFormat::Gif) => ImageKind::Gif,
            Ok(ImageFormat::Jpeg) => ImageKind::Jpeg,
            Ok(ImageFormat::Png) => ImageKind::Png,
            _ if looks_like_svg(bytes) => ImageKind::Svg,
            _ => ImageKind::Other,
        }
    }
}

/// The root element is `<svg>` once the prolog, doctype and comments are gone.
fn looks_like_svg(bytes: &[u8]) -> bool {
    let text = String::from_utf8_lossy(bytes);
    let text = XML_PROLOG.replace_all(&text, "");
    let text = DOCTYPE.replace_all(&text, "");
    let text = COMMENT.replace_all(&text, "");
    text.trim_start().starts_with("<svg")
}

/// Optimize an image with the optimizer registered for its kind.
pub fn optimize(bytes: &[u8], options: &ImageOptions) -> Result<Vec<u8>, String> {
    match ImageKind::detect(bytes) {
        ImageKind::Gif if options.gif_interlaced => interlace_gif(bytes),
        ImageKind::Jpeg => smallest(bytes, reencode_jpeg(bytes, options.jpeg_quality)?),
        ImageKind::Png => smallest(bytes, reencode_png(bytes, options.png_optimization_level)?),
        ImageKind::Svg => {
            let text = std::str::from_utf8(bytes).map_err(|e| format!("SVG is not UTF-8: {e}"))?;
            Ok(clean_svg(text, options).into_bytes())
        }
        _ => Ok(bytes.to_vec()),
    }
}

/// Keep the original when re-encoding did not help.
fn smallest(original: &[u8], encoded: Vec<u8>) -> Result<Vec<u8>, String> {
    if encoded.len() < original.len() {
        Ok(encoded)
    } else {
        Ok(original.to_vec())
    }
}

fn reencode_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>, String> {
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|e| format!("JPEG decode error: {e}"))?;

    // The JPEG encoder takes no alpha channel.
    let decoded = match decoded.color() {
        ColorType::L8 | ColorType::Rgb8 => decoded,
        _ => DynamicImage::ImageRgb8(decoded.to_rgb8()),
    };

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    decoded
        .write_with_encoder(encoder)
        .map_err(|e| format!("JPEG encode error: {e}"))?;
    Ok(out)
}

fn png_compression(level: u8) -> CompressionType {
    match level {
        0..=1 => CompressionType::Fast,
        2..=3 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

fn reencode_png(bytes: &[u8], level: u8) -> Result<Vec<u8>, String> {
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .map_err(|e| format!("PNG decode error: {e}"))?;

    let mut out = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut out, png_compression(level), FilterType::Adaptive);
    decoded
        .write_with_encoder(encoder)
        .map_err(|e| format!("PNG encode error: {e}"))?;
    Ok(out)
}

/// Re-encode every frame of a GIF with interlaced row order.
fn interlace_gif(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);
    let mut decoder = options
        .read_info(Cursor::new(bytes))
        .map_err(|e| format!("GIF decode error: {e}"))?;

    let (width, height) = (decoder.width(), decoder.height());
    let palette = decoder.global_palette().map(<[u8]>::to_vec).unwrap_or_default();
    let repeat = decoder.repeat();

    let mut out = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut out, width, height, &palette)
            .map_err(|e| format!("GIF encode error: {e}"))?;
        if repeat != gif::Repeat::Finite(0) {
            encoder
                .set_repeat(repeat)
                .map_err(|e| format!("GIF encode error: {e}"))?;
        }

        while let Some(frame) = decoder
            .read_next_frame()
            .map_err(|e| format!("GIF decode error: {e}"))?
        {
            let mut frame = frame.clone();
            frame.buffer = Cow::Owned(interlace_rows(&frame.buffer, usize::from(frame.width)));
            frame.interlaced = true;
            encoder
                .write_frame(&frame)
                .map_err(|e| format!("GIF encode error: {e}"))?;
        }
    }

    Ok(out)
}

/// Reorder rows into the four GIF interlace passes.
fn interlace_rows(buffer: &[u8], width: usize) -> Vec<u8> {
    if width == 0 {
        return buffer.to_vec();
    }

    let rows: Vec<&[u8]> = buffer.chunks(width).collect();
    let mut out = Vec::with_capacity(buffer.len());
    for (start, step) in [(0, 8), (4, 8), (2, 4), (1, 2)] {
        for row in rows.iter().skip(start).step_by(step) {
            out.extend_from_slice(row);
        }
    }
    out
}

static XML_PROLOG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<\?xml.*?\?>").expect("Invalid XML prolog regex"));
static DOCTYPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<!DOCTYPE[^>]*>").expect("Invalid doctype regex"));
static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("Invalid comment regex"));
static METADATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<metadata\b[^>]*/>|<metadata\b.*?</metadata>").expect("Invalid metadata regex")
});
static BETWEEN_TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">\s+<").expect("Invalid whitespace regex"));
static TEXT_ELEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<text\b.*?</text>").expect("Invalid text element regex"));
static SVG_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<svg\b[^>]*>").expect("Invalid svg tag regex"));
static VIEW_BOX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\s+viewBox\s*=\s*("[^"]*"|'[^']*')"#).expect("Invalid viewBox regex"));
static ID_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\s+id\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("Invalid id attribute regex"));

/// Clean up SVG markup.
pub fn clean_svg(svg: &str, options: &ImageOptions) -> String {
    let svg = XML_PROLOG.replace_all(svg, "");
    let svg = DOCTYPE.replace_all(&svg, "");
    let svg = COMMENT.replace_all(&svg, "");
    let svg = METADATA.replace_all(&svg, "");
    let mut svg = collapse_whitespace(&svg).trim().to_string();

    if options.svg_remove_view_box {
        svg = remove_redundant_view_box(&svg);
    }
    if options.svg_cleanup_ids {
        svg = remove_unused_ids(&svg);
    }

    svg
}

/// Remove whitespace between tags, except inside `<text>` where it is rendered.
fn collapse_whitespace(svg: &str) -> String {
    let mut out = String::with_capacity(svg.len());
    let mut last = 0;

    for text in TEXT_ELEMENT.find_iter(svg) {
        let before = BETWEEN_TAGS.replace_all(&svg[last..text.start()], "><");
        out.push_str(before.trim_end());
        out.push_str(text.as_str());

        let rest = &svg[text.end()..];
        last = text.end() + (rest.len() - rest.trim_start().len());
    }

    out.push_str(&BETWEEN_TAGS.replace_all(&svg[last..], "><"));
    out
}

/// Drop the root `viewBox` when it is exactly `0 0 width height`.
fn remove_redundant_view_box(svg: &str) -> String {
    let Some(open) = SVG_OPEN.find(svg) else {
        return svg.to_string();
    };
    let tag = open.as_str();

    let width = attribute(tag, "width").and_then(parse_length);
    let height = attribute(tag, "height").and_then(parse_length);
    let view_box: Option<Vec<f64>> = attribute(tag, "viewBox").map(|v| {
        v.split([' ', ','])
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect()
    });

    let redundant = match (width, height, view_box.as_deref()) {
        (Some(w), Some(h), Some([x, y, vw, vh])) => *x == 0.0 && *y == 0.0 && *vw == w && *vh == h,
        _ => false,
    };
    if !redundant {
        return svg.to_string();
    }

    let cleaned = VIEW_BOX.replace(tag, "");
    format!("{}{}{}", &svg[..open.start()], cleaned, &svg[open.end()..])
}

/// Remove `id` attributes that no `#id` reference points at.
fn remove_unused_ids(svg: &str) -> String {
    let ids: Vec<String> = ID_ATTR
        .captures_iter(svg)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
        .collect();
    let referenced: HashSet<&str> = ids
        .iter()
        .filter(|id| svg.contains(&format!("#{id}")))
        .map(String::as_str)
        .collect();

    ID_ATTR
        .replace_all(svg, |caps: &regex::Captures<'_>| {
            let id = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            if referenced.contains(id) {
                caps[0].to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let re = Regex::new(&format!(r#"\s{}\s*=\s*(?:"([^"]*)"|'([^']*)')"#, regex::escape(name))).ok()?;
    let caps = re.captures(tag)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str())
}

fn parse_length(value: &str) -> Option<f64> {
    value.trim().trim_end_matches("px").parse().ok()
}

/// Optimization with the registered optimizers.
pub struct OptimizeImage {
    options: ImageOptions,
}

impl OptimizeImage {
    pub fn new(options: ImageOptions) -> Self {
        Self { options }
    }
}

impl Stage for OptimizeImage {
    fn name(&self) -> &'static str {
        "optimize"
    }

    fn apply(&self, mut asset: Asset, _cx: &StageContext<'_>) -> Result<Asset, StageError> {
        let before = asset.contents.len();
        asset.contents = optimize(&asset.contents, &self.options).map_err(StageError::Compile)?;

        tracing::debug!(
            "Optimized {}: {} -> {} bytes",
            asset.relative.display(),
            before,
            asset.contents.len()
        );
        Ok(asset)
    }
}

/// Pipeline for the images task.
pub fn pipeline(options: &ImageOptions, output: &Path) -> Pipeline {
    Pipeline::new("images", "Image error")
        .stage(OptimizeImage::new(options.clone()))
        .stage(Dest::new(output))
        .stage(Reload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};
    use pretty_assertions::assert_eq;

    fn sample_png() -> Vec<u8> {
        let img = ImageBuffer::from_fn(32, 32, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgba([255u8, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let mut out = Vec::new();
        let encoder = PngEncoder::new_with_quality(&mut out, CompressionType::Fast, FilterType::NoFilter);
        DynamicImage::ImageRgba8(img).write_with_encoder(encoder).unwrap();
        out
    }

    fn sample_gif(width: u16, height: u16) -> (Vec<u8>, Vec<u8>) {
        let pixels: Vec<u8> = (0..usize::from(width) * usize::from(height))
            .map(|i| (i % 4) as u8)
            .collect();
        let palette = [0u8, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255];

        let mut out = Vec::new();
        {
            let mut encoder = gif::Encoder::new(&mut out, width, height, &palette).unwrap();
            let frame = gif::Frame {
                width,
                height,
                buffer: Cow::Borrowed(&pixels),
                ..gif::Frame::default()
            };
            encoder.write_frame(&frame).unwrap();
        }
        (out, pixels)
    }

    #[test]
    fn detects_kinds_from_content() {
        let (gif, _) = sample_gif(2, 2);

        assert_eq!(ImageKind::detect(&sample_png()), ImageKind::Png);
        assert_eq!(ImageKind::detect(&gif), ImageKind::Gif);
        assert_eq!(
            ImageKind::detect(br#"<?xml version="1.0"?><svg xmlns="http://www.w3.org/2000/svg"/>"#),
            ImageKind::Svg
        );
        assert_eq!(ImageKind::detect(br#"{"name": "manifest"}"#), ImageKind::Other);
    }

    #[test]
    fn png_output_is_valid_and_never_larger() {
        let png = sample_png();

        let optimized = optimize(&png, &ImageOptions::default()).unwrap();

        assert!(optimized.len() <= png.len());
        let decoded = image::load_from_memory(&optimized).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
    }

    #[test]
    fn interlaces_gif_frames() {
        let (gif, pixels) = sample_gif(3, 10);

        let optimized = optimize(&gif, &ImageOptions::default()).unwrap();

        // The decoder clears `interlaced` once rows are reordered, so read the
        // flag from the image descriptor (separator 0x2C, flags at offset 9).
        let descriptor = optimized.iter().position(|&b| b == 0x2C).unwrap();
        assert_ne!(optimized[descriptor + 9] & 0x40, 0);

        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::Indexed);
        let mut decoder = options.read_info(Cursor::new(optimized)).unwrap();
        let frame = decoder.read_next_frame().unwrap().unwrap();
        assert_eq!(frame.buffer.as_ref(), pixels.as_slice());
    }

    #[test]
    fn orders_rows_by_interlace_pass() {
        let rows: Vec<u8> = (0..10).collect();

        assert_eq!(interlace_rows(&rows, 1), vec![0, 8, 4, 2, 6, 1, 3, 5, 7, 9]);
    }

    #[test]
    fn cleans_svg_markup_and_keeps_ids() {
        let svg = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- Generator: Sketch -->
<svg xmlns="http://www.w3.org/2000/svg" width="24" height="24" viewBox="0 0 24 24">
  <metadata>editor data</metadata>
  <g id="icon">
    <path d="M0 0h24v24H0z"/>
  </g>
</svg>
"#;

        let cleaned = clean_svg(svg, &ImageOptions::default());

        assert_eq!(
            cleaned,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="24" height="24"><g id="icon"><path d="M0 0h24v24H0z"/></g></svg>"#
        );
    }

    #[test]
    fn detects_svg_after_long_leading_comment() {
        let licence = "Licensed under the Apache License. ".repeat(40);
        let svg = format!(
            "<?xml version=\"1.0\"?>\n<!-- {licence} -->\n<svg xmlns=\"http://www.w3.org/2000/svg\"><rect/></svg>\n"
        );
        assert!(svg.find("<svg").unwrap() > 1024);

        assert_eq!(ImageKind::detect(svg.as_bytes()), ImageKind::Svg);
        let optimized = optimize(svg.as_bytes(), &ImageOptions::default()).unwrap();
        assert_eq!(
            String::from_utf8(optimized).unwrap(),
            r#"<svg xmlns="http://www.w3.org/2000/svg"><rect/></svg>"#
        );
    }

    #[test]
    fn html_with_inline_svg_is_not_an_svg() {
        let html = br#"<!DOCTYPE html><html><body><svg><rect/></svg></body></html>"#;

        assert_eq!(ImageKind::detect(html), ImageKind::Other);
    }

    #[test]
    fn keeps_whitespace_inside_text_elements() {
        let svg = r#"<svg>
  <g>
    <text x="0" y="12"><tspan>Hello</tspan> <tspan>world</tspan></text>
  </g>
  <text> <tspan>a</tspan>  b </text>
</svg>"#;

        let cleaned = clean_svg(svg, &ImageOptions::default());

        assert_eq!(
            cleaned,
            r#"<svg><g><text x="0" y="12"><tspan>Hello</tspan> <tspan>world</tspan></text></g><text> <tspan>a</tspan>  b </text></svg>"#
        );
    }

    #[test]
    fn keeps_view_box_that_scales() {
        let svg = r#"<svg width="24" height="24" viewBox="0 0 48 48"><rect/></svg>"#;

        let cleaned = clean_svg(svg, &ImageOptions::default());

        assert!(cleaned.contains(r#"viewBox="0 0 48 48""#));
    }

    #[test]
    fn removes_unreferenced_ids_when_asked() {
        let svg = r##"<svg><defs><linearGradient id="fill"/></defs><rect id="unused" fill="url(#fill)"/></svg>"##;
        let options = ImageOptions {
            svg_cleanup_ids: true,
            ..ImageOptions::default()
        };

        let cleaned = clean_svg(svg, &options);

        assert!(cleaned.contains(r#"id="fill""#));
        assert!(!cleaned.contains("unused"));
    }

    #[test]
    fn passes_unknown_files_through() {
        let json = br#"{"icons": []}"#;

        assert_eq!(optimize(json, &ImageOptions::default()).unwrap(), json.to_vec());
    }

    #[test]
    fn reports_corrupt_images() {
        let mut png = sample_png();
        png.truncate(40);

        assert!(optimize(&png, &ImageOptions::default()).is_err());
    }
}
