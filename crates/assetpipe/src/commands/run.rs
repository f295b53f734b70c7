//! Run a task from the graph.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::config::load_config;
use crate::graph::TaskGraph;
use crate::scheduler::Scheduler;

/// Run `task` and everything it depends on.
pub async fn run(task: &str, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let graph = TaskGraph::standard()?;
    let scheduler = Arc::new(Scheduler::new(graph, config)?);

    scheduler.run(task.to_string()).await
}
