//! assetpipe CLI - static-site asset pipeline with live reload.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;
mod graph;
mod scheduler;

#[derive(Parser)]
#[command(name = "assetpipe")]
#[command(about = "Static-site asset pipeline with live reload")]
#[command(version)]
pub struct Cli {
    /// Task to run (defaults to `watch`)
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to assetpipe.toml config file
    #[arg(short, long, default_value = "assetpipe.toml", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render HTML pages with layouts and partials
    Html,
    /// Compile SCSS into canonical and minified CSS
    Css,
    /// Expand includes and minify JavaScript
    Js,
    /// Optimize images
    Images,
    /// Copy fonts
    Fonts,
    /// Delete the output directory
    Clean,
    /// Rebuild categories when sources change
    Watcher,
    /// Serve the output directory with live reload
    Server,
    /// Run every asset task concurrently
    Assets,
    /// Clean, then build every asset
    Build,
    /// Watch and serve concurrently
    Serve,
    /// Build, then watch and serve
    Watch,
    /// Print the task tree
    Tasks,
}

impl Commands {
    fn task_name(&self) -> Option<&'static str> {
        Some(match self {
            Commands::Html => "html",
            Commands::Css => "css",
            Commands::Js => "js",
            Commands::Images => "images",
            Commands::Fonts => "fonts",
            Commands::Clean => "clean",
            Commands::Watcher => "watcher",
            Commands::Server => "server",
            Commands::Assets => "assets",
            Commands::Build => "build",
            Commands::Serve => "serve",
            Commands::Watch => "watch",
            Commands::Tasks => return None,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command.as_ref().map(Commands::task_name) {
        Some(None) => commands::tasks::run()?,
        Some(Some(task)) => commands::run::run(task, &cli.config).await?,
        None => commands::run::run(graph::DEFAULT_TASK, &cli.config).await?,
    }

    Ok(())
}
