//! The dependency graph: the transitive closure of containers required by
//! the task container.

use crate::task::container::ResolvedTaskConfig;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Failure to build a valid dependency graph from a task configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A container referenced another container that does not exist.
    #[error("container {from:?} depends on unknown container {to:?}")]
    UnknownDependency {
        /// The container holding the bad reference.
        from: String,
        /// The name it referenced.
        to: String,
    },
    /// The dependency relation has a cycle.
    #[error("dependency cycle detected: {0:?}")]
    Cycle(Vec<String>),
    /// The configured task container name isn't present in the container set.
    #[error("task container {0:?} is not present in the resolved configuration")]
    TaskContainerMissing(String),
}

/// One node in the dependency graph: a container name plus the names it
/// directly depends on.
#[derive(Debug, Clone)]
pub struct Node {
    /// The container's stable name.
    pub name: String,
    /// Names of containers this one directly depends on.
    pub depends_on: Vec<String>,
}

/// The validated, acyclic dependency graph for a single task run.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: HashMap<String, Node>,
    task_container: String,
    /// Insertion order from the BFS walk; used so planners that iterate
    /// `nodes()` produce deterministic, reproducible rule orderings.
    order: Vec<String>,
}

impl DependencyGraph {
    /// Build the graph by breadth-first traversal from the task container,
    /// following each container's declared dependency set.
    ///
    /// Fails with [`GraphError`] if the task container is absent, any
    /// referenced container name doesn't resolve, or the dependency relation
    /// contains a cycle.
    pub fn build(config: &ResolvedTaskConfig) -> Result<Self, GraphError> {
        if !config.containers.contains_key(&config.task_container) {
            return Err(GraphError::TaskContainerMissing(
                config.task_container.clone(),
            ));
        }

        let mut nodes = HashMap::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(config.task_container.clone());
        let mut seen = HashSet::new();
        seen.insert(config.task_container.clone());

        while let Some(name) = queue.pop_front() {
            // Existence was checked before enqueueing (task container above,
            // dependencies below), so this lookup cannot fail.
            let container = &config.containers[&name];

            let depends_on = container.dependencies.clone();
            for dep in &depends_on {
                if !config.containers.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        from: name.clone(),
                        to: dep.clone(),
                    });
                }
                if seen.insert(dep.clone()) {
                    queue.push_back(dep.clone());
                }
            }

            order.push(name.clone());
            nodes.insert(name.clone(), Node { name, depends_on });
        }

        let graph = Self {
            nodes,
            task_container: config.task_container.clone(),
            order,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut path: Vec<String> = Vec::new();

        fn visit<'a>(
            graph: &'a DependencyGraph,
            name: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<String>,
        ) -> Result<(), GraphError> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let mut cycle = path.clone();
                    cycle.push(name.to_string());
                    return Err(GraphError::Cycle(cycle));
                }
                None => {}
            }
            marks.insert(name, Mark::Visiting);
            path.push(name.to_string());
            if let Some(node) = graph.nodes.get(name) {
                for dep in &node.depends_on {
                    visit(graph, dep, marks, path)?;
                }
            }
            path.pop();
            marks.insert(name, Mark::Done);
            Ok(())
        }

        for name in &self.order {
            visit(self, name, &mut marks, &mut path)?;
        }
        Ok(())
    }

    /// Every node in the graph, in BFS discovery order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().map(move |n| &self.nodes[n])
    }

    /// The names a node directly depends on.
    pub fn edges_from(&self, node: &str) -> &[String] {
        self.nodes
            .get(node)
            .map(|n| n.depends_on.as_slice())
            .unwrap_or(&[])
    }

    /// The task container's node name.
    pub fn task_container_node(&self) -> &str {
        &self.task_container
    }

    /// Whether `name` is part of this graph.
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::container::{Container, ImageSource, LogConfig, PullPolicy};
    use std::collections::HashMap;
    use std::time::Duration;

    fn container(name: &str, deps: &[&str]) -> Container {
        Container {
            name: name.to_string(),
            image_source: ImageSource::Pull {
                reference: format!("{name}:latest"),
                policy: PullPolicy::IfNotPresent,
            },
            command: None,
            entrypoint: None,
            environment: HashMap::new(),
            working_dir: None,
            volumes: vec![],
            devices: vec![],
            ports: vec![],
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            health_check: None,
            health_check_timeout: Duration::from_secs(30),
            run_as_current_user: false,
            privileged: false,
            enable_init_process: false,
            capabilities_to_add: vec![],
            capabilities_to_drop: vec![],
            additional_hostnames: vec![],
            setup_commands: vec![],
            log_config: LogConfig::default(),
            shm_size: None,
        }
    }

    fn config(task: &str, containers: Vec<Container>) -> ResolvedTaskConfig {
        ResolvedTaskConfig {
            project_name: "proj".into(),
            task_name: "task".into(),
            task_container: task.into(),
            containers: containers.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    #[test]
    fn solo_task_has_a_single_node() {
        let cfg = config("task", vec![container("task", &[])]);
        let graph = DependencyGraph::build(&cfg).unwrap();
        assert_eq!(graph.nodes().count(), 1);
        assert_eq!(graph.task_container_node(), "task");
    }

    #[test]
    fn transitive_dependencies_are_included() {
        let cfg = config(
            "task",
            vec![
                container("task", &["db"]),
                container("db", &["cache"]),
                container("cache", &[]),
            ],
        );
        let graph = DependencyGraph::build(&cfg).unwrap();
        let names: HashSet<_> = graph.nodes().map(|n| n.name.as_str()).collect();
        assert_eq!(names, HashSet::from(["task", "db", "cache"]));
    }

    #[test]
    fn unreferenced_containers_are_excluded() {
        let cfg = config(
            "task",
            vec![container("task", &[]), container("unrelated", &[])],
        );
        let graph = DependencyGraph::build(&cfg).unwrap();
        assert_eq!(graph.nodes().count(), 1);
    }

    #[test]
    fn missing_task_container_is_an_error() {
        let cfg = config("task", vec![container("other", &[])]);
        assert_eq!(
            DependencyGraph::build(&cfg),
            Err(GraphError::TaskContainerMissing("task".into()))
        );
    }

    #[test]
    fn unknown_dependency_is_an_error() {
        let cfg = config("task", vec![container("task", &["ghost"])]);
        assert!(matches!(
            DependencyGraph::build(&cfg),
            Err(GraphError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn cycle_is_rejected() {
        let cfg = config(
            "task",
            vec![container("task", &["a"]), container("a", &["task"])],
        );
        assert!(matches!(
            DependencyGraph::build(&cfg),
            Err(GraphError::Cycle(_))
        ));
    }
}
