//! Asset pipelines for assetpipe.
//!
//! Each asset category (html, css, js, images, fonts) owns a linear pipeline of
//! stages over the files its build glob matches. Pipelines end in a write to the
//! output tree and a reload notification.

pub mod clean;
pub mod css;
pub mod error;
pub mod fonts;
pub mod frontmatter;
pub mod html;
pub mod images;
pub mod js;
pub mod paths;
pub mod pipeline;
pub mod report;
pub mod stream;
pub mod task;

pub use clean::clean;
pub use css::CssOptions;
pub use error::{StageError, TaskError};
pub use fonts::FontOptions;
pub use html::TemplateCache;
pub use images::ImageOptions;
pub use paths::{Category, CategoryPaths, PathError, PathTable};
pub use pipeline::{Pipeline, PipelineOutcome, Stage, StageContext};
pub use report::{ErrorReport, LogNotifier, Notifier};
pub use stream::{Asset, FileStream};
pub use task::{AssetTasks, TaskOptions, TaskResult};
