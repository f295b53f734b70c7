//! Task graph execution.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use assetpipe_server::{DevServer, DevServerConfig, FileWatcher, LiveReloadHub};
use assetpipe_tasks::{clean, AssetTasks, Category, PathTable};
use tokio::task::JoinSet;

use crate::config::Config;
use crate::graph::{Action, TaskGraph, TaskNode};

type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Runs graph nodes against one set of asset tasks.
pub struct Scheduler {
    graph: TaskGraph,
    tasks: Arc<AssetTasks>,
    hub: LiveReloadHub,
    server: DevServerConfig,
}

impl Scheduler {
    /// Resolve paths and task options from the configuration.
    pub fn new(graph: TaskGraph, config: Config) -> Result<Self> {
        let paths = PathTable::new(&config.paths.src, &config.paths.dist)
            .context("Failed to build path table")?;
        let tasks = AssetTasks::new(paths, config.task_options())
            .context("Failed to configure asset tasks")?;

        Ok(Self {
            graph,
            tasks: Arc::new(tasks),
            hub: LiveReloadHub::new(),
            server: config.server_config(),
        })
    }

    /// Run a task and its dependencies.
    pub fn run(self: Arc<Self>, name: String) -> TaskFuture {
        Box::pin(async move {
            let node = self
                .graph
                .get(&name)
                .cloned()
                .ok_or_else(|| anyhow!("Task '{}' is not defined", name))?;

            tracing::info!("Starting '{}'...", name);
            let start = Instant::now();

            let result = self.run_node(&node).await;
            let elapsed = format_duration(start.elapsed());

            match &result {
                Ok(()) => tracing::info!("Finished '{}' after {}", name, elapsed),
                Err(e) => tracing::error!("'{}' errored after {}: {:#}", name, elapsed, e),
            }
            result
        })
    }

    async fn run_node(self: &Arc<Self>, node: &TaskNode) -> Result<()> {
        if node.concurrent {
            self.run_concurrent(&node.deps).await?;
        } else {
            for dep in &node.deps {
                Arc::clone(self).run(dep.clone()).await?;
            }
        }

        match node.action {
            Some(action) => self.run_action(action).await,
            None => Ok(()),
        }
    }

    /// Run tasks side by side. The first failure cancels the rest, so a
    /// member that never finishes (the watcher) cannot hide it.
    async fn run_concurrent(self: &Arc<Self>, names: &[String]) -> Result<()> {
        let mut set = JoinSet::new();
        for name in names {
            set.spawn(Arc::clone(self).run(name.clone()));
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => Err(anyhow::Error::from(e)),
            };
            if let Err(e) = result {
                if first_error.is_none() {
                    set.abort_all();
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_action(self: &Arc<Self>, action: Action) -> Result<()> {
        match action {
            Action::Asset(category) => self.run_asset(category).await,
            Action::Clean => {
                let output = self.tasks.paths().output_root().to_path_buf();
                tokio::task::spawn_blocking(move || clean(&output))
                    .await
                    .context("Clean task panicked")??;
                Ok(())
            }
            Action::Watcher => self.watch().await,
            Action::Server => {
                DevServer::new(self.server.clone(), self.hub.clone())
                    .start()
                    .await?;
                Ok(())
            }
        }
    }

    async fn run_asset(&self, category: Category) -> Result<()> {
        let tasks = Arc::clone(&self.tasks);
        let hub = self.hub.clone();

        let result = tokio::task::spawn_blocking(move || tasks.run(category, &hub))
            .await
            .with_context(|| format!("Task '{}' panicked", category))??;

        if result.failed() > 0 {
            tracing::warn!(
                "{}: {} file(s) built, {} failed",
                category,
                result.processed,
                result.failed()
            );
        } else {
            tracing::debug!(
                "{}: {} file(s) built into {}",
                category,
                result.processed,
                result.output_dir.display()
            );
        }
        Ok(())
    }

    /// Rerun a category's task on every matching change, for as long as the
    /// watcher lives.
    async fn watch(self: &Arc<Self>) -> Result<()> {
        let (_watcher, mut rx) = FileWatcher::new(self.tasks.paths())?;

        while let Some(event) = rx.recv().await {
            tracing::debug!("Changed: {}", event.path.display());

            let task = Arc::clone(self).run(event.category.name().to_string());
            tokio::spawn(async move {
                // Already logged by the task itself; keep watching.
                let _ = task.await;
            });
        }

        Ok(())
    }
}

/// Human-readable duration, e.g. `42 ms` or `1.35 s`.
fn format_duration(duration: Duration) -> String {
    if duration < Duration::from_secs(1) {
        format!("{} ms", duration.as_millis())
    } else {
        format!("{:.2} s", duration.as_secs_f64())
    }
}
