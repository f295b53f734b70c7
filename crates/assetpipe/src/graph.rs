//! Task graph declarations.

use std::collections::HashMap;
use std::fmt::Write;

use assetpipe_tasks::Category;

/// Task run when none is named.
pub const DEFAULT_TASK: &str = "watch";

/// Work a leaf task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run one asset category's pipeline
    Asset(Category),
    /// Delete the output root
    Clean,
    /// Watch sources and rerun tasks
    Watcher,
    /// Serve the output root
    Server,
}

/// A named node of the task graph.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub name: String,
    pub description: String,
    /// Tasks run before the action
    pub deps: Vec<String>,
    /// Run dependencies concurrently instead of in order
    pub concurrent: bool,
    pub action: Option<Action>,
}

impl TaskNode {
    pub fn leaf(name: &str, description: &str, action: Action) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            deps: Vec::new(),
            concurrent: false,
            action: Some(action),
        }
    }

    pub fn series(name: &str, description: &str, deps: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            concurrent: false,
            action: None,
        }
    }

    pub fn parallel(name: &str, description: &str, deps: &[&str]) -> Self {
        Self {
            concurrent: true,
            ..Self::series(name, description, deps)
        }
    }
}

/// Errors found while validating a graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Task '{0}' is declared twice")]
    Duplicate(String),

    #[error("Task '{task}' depends on unknown task '{dep}'")]
    Unknown { task: String, dep: String },

    #[error("Task cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Task '{0}' has neither dependencies nor an action")]
    Empty(String),
}

/// Validated set of task nodes.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    /// Validate and index a list of nodes.
    pub fn new(nodes: Vec<TaskNode>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if node.deps.is_empty() && node.action.is_none() {
                return Err(GraphError::Empty(node.name.clone()));
            }
            if index.insert(node.name.clone(), i).is_some() {
                return Err(GraphError::Duplicate(node.name.clone()));
            }
        }

        for node in &nodes {
            if let Some(dep) = node.deps.iter().find(|d| !index.contains_key(*d)) {
                return Err(GraphError::Unknown {
                    task: node.name.clone(),
                    dep: dep.clone(),
                });
            }
        }

        let graph = Self { nodes, index };
        graph.check_cycles()?;
        Ok(graph)
    }

    /// The built-in task declarations.
    pub fn standard() -> Result<Self, GraphError> {
        Self::new(vec![
            TaskNode::leaf("html", "Render HTML pages with layouts and partials", Action::Asset(Category::Html)),
            TaskNode::leaf("css", "Compile SCSS into canonical and minified CSS", Action::Asset(Category::Css)),
            TaskNode::leaf("js", "Expand includes and minify JavaScript", Action::Asset(Category::Js)),
            TaskNode::leaf("images", "Optimize images", Action::Asset(Category::Images)),
            TaskNode::leaf("fonts", "Copy fonts", Action::Asset(Category::Fonts)),
            TaskNode::leaf("clean", "Delete the output directory", Action::Clean),
            TaskNode::leaf("watcher", "Rebuild categories when sources change", Action::Watcher),
            TaskNode::leaf("server", "Serve the output directory with live reload", Action::Server),
            TaskNode::parallel(
                "assets",
                "Run every asset task",
                &["html", "css", "js", "images", "fonts"],
            ),
            TaskNode::series("build", "Clean, then build every asset", &["clean", "assets"]),
            TaskNode::parallel("serve", "Watch and serve", &["watcher", "server"]),
            TaskNode::series("watch", "Build, then watch and serve", &["build", "serve"]),
        ])
    }

    pub fn get(&self, name: &str) -> Option<&TaskNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    fn check_cycles(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(
            graph: &TaskGraph,
            i: usize,
            marks: &mut [Mark],
            path: &mut Vec<String>,
        ) -> Result<(), GraphError> {
            let node = &graph.nodes[i];
            path.push(node.name.clone());

            match marks[i] {
                Mark::Done => {}
                Mark::Active => {
                    let start = path.iter().position(|n| *n == node.name).unwrap_or(0);
                    return Err(GraphError::Cycle(path[start..].to_vec()));
                }
                Mark::New => {
                    marks[i] = Mark::Active;
                    for dep in &node.deps {
                        visit(graph, graph.index[dep], marks, path)?;
                    }
                    marks[i] = Mark::Done;
                }
            }

            path.pop();
            Ok(())
        }

        let mut marks = vec![Mark::New; self.nodes.len()];
        for i in 0..self.nodes.len() {
            visit(self, i, &mut marks, &mut Vec::new())?;
        }
        Ok(())
    }

    /// Text listing of every task and how it composes its dependencies.
    pub fn render_tree(&self) -> String {
        let width = self.nodes.iter().map(|n| n.name.len()).max().unwrap_or(0);
        let mut out = String::new();

        for node in &self.nodes {
            let _ = writeln!(out, "{:width$}  {}", node.name, node.description);
            if node.deps.is_empty() {
                continue;
            }

            let mode = if node.concurrent { "parallel" } else { "series" };
            let last = node.deps.len() - 1;
            for (i, dep) in node.deps.iter().enumerate() {
                let branch = if i == last { "└─" } else { "├─" };
                let _ = writeln!(out, "  {} {} ({})", branch, dep, mode);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn standard_graph_is_valid() {
        let graph = TaskGraph::standard().unwrap();

        let build = graph.get("build").unwrap();
        assert_eq!(build.deps, vec!["clean", "assets"]);
        assert!(!build.concurrent);
        assert!(graph.get("assets").unwrap().concurrent);
        assert_eq!(
            graph.get("css").unwrap().action,
            Some(Action::Asset(Category::Css))
        );
        assert!(graph.get(DEFAULT_TASK).is_some());
    }

    #[test]
    fn rejects_unknown_dependencies() {
        let result = TaskGraph::new(vec![TaskNode::series("build", "", &["compile"])]);

        assert!(matches!(
            result,
            Err(GraphError::Unknown { ref task, ref dep }) if task == "build" && dep == "compile"
        ));
    }

    #[test]
    fn rejects_cycles() {
        let result = TaskGraph::new(vec![
            TaskNode::series("a", "", &["b"]),
            TaskNode::series("b", "", &["c"]),
            TaskNode::series("c", "", &["a"]),
        ]);

        match result {
            Err(GraphError::Cycle(path)) => assert_eq!(path, vec!["a", "b", "c", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicates_and_empty_composites() {
        let duplicate = TaskGraph::new(vec![
            TaskNode::leaf("clean", "", Action::Clean),
            TaskNode::leaf("clean", "", Action::Clean),
        ]);
        assert!(matches!(duplicate, Err(GraphError::Duplicate(_))));

        let empty = TaskGraph::new(vec![TaskNode::series("nothing", "", &[])]);
        assert!(matches!(empty, Err(GraphError::Empty(_))));
    }

    #[test]
    fn shared_dependencies_are_not_cycles() {
        let graph = TaskGraph::new(vec![
            TaskNode::leaf("clean", "", Action::Clean),
            TaskNode::series("a", "", &["clean"]),
            TaskNode::parallel("b", "", &["clean", "a"]),
        ]);

        assert!(graph.is_ok());
    }

    #[test]
    fn renders_composition() {
        let graph = TaskGraph::new(vec![
            TaskNode::leaf("clean", "Delete output", Action::Clean),
            TaskNode::leaf("server", "Serve output", Action::Server),
            TaskNode::parallel("serve", "Both", &["clean", "server"]),
        ])
        .unwrap();

        assert_eq!(
            graph.render_tree(),
            "clean   Delete output\n\
             server  Serve output\n\
             serve   Both\n  \
             ├─ clean (parallel)\n  \
             └─ server (parallel)\n"
        );
    }
}
