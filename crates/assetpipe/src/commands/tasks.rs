//! Task tree listing.

use anyhow::Result;

use crate::graph::TaskGraph;

/// Print every task with its dependencies.
pub fn run() -> Result<()> {
    let graph = TaskGraph::standard()?;
    print!("{}", graph.render_tree());
    Ok(())
}
