//! Dependency ordering for named units of work.
//!
//! [`resolve_dependencies`] is a pure topological sort used for one-shot
//! batches; [`DependencyGraph`] keeps nodes around between runs and tracks
//! which of them have executed.

use crate::error::{JobError, JobResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// A named unit with a priority and the names it depends on.
pub trait Dependent {
    /// Unique name.
    fn name(&self) -> &str;

    /// Lower runs earlier among independent units.
    fn priority(&self) -> i32 {
        0
    }

    /// Names that must run first. Names outside the resolved set are ignored.
    fn dependencies(&self) -> &[String];
}

impl<T: Dependent + ?Sized> Dependent for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn priority(&self) -> i32 {
        (**self).priority()
    }

    fn dependencies(&self) -> &[String] {
        (**self).dependencies()
    }
}

/// Plain description of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Unique name.
    pub name: String,

    /// Tie-break seed.
    #[serde(default)]
    pub priority: i32,

    /// Names that must run first.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl UnitSpec {
    /// Unit with no dependencies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            dependencies: Vec::new(),
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add dependencies.
    #[must_use]
    pub fn depends_on(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }
}

impl Dependent for UnitSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// Orders `units` so every unit follows its in-set dependencies.
///
/// Units are seeded in ascending priority (stable), then visited depth
/// first. Revisiting a unit that is still being visited fails with
/// [`JobError::CycleDependency`] and nothing is returned.
pub fn resolve_dependencies<T: Dependent>(units: &[T]) -> JobResult<Vec<&T>> {
    let mut seeded: Vec<&T> = units.iter().collect();
    seeded.sort_by_key(|unit| unit.priority());

    let mut by_name: HashMap<&str, &T> = HashMap::with_capacity(seeded.len());
    for &unit in &seeded {
        if by_name.insert(unit.name(), unit).is_some() {
            return Err(JobError::Configuration(format!(
                "duplicate unit name '{}'",
                unit.name()
            )));
        }
    }

    let mut walk = Walk {
        by_name: &by_name,
        visiting: HashSet::new(),
        visited: HashSet::new(),
        order: Vec::with_capacity(seeded.len()),
    };
    for unit in &seeded {
        walk.visit(unit.name())?;
    }
    Ok(walk.order)
}

struct Walk<'a, 'm, T> {
    by_name: &'m HashMap<&'a str, &'a T>,
    visiting: HashSet<&'a str>,
    visited: HashSet<&'a str>,
    order: Vec<&'a T>,
}

impl<'a, T: Dependent> Walk<'a, '_, T> {
    fn visit(&mut self, name: &str) -> JobResult<()> {
        let Some((&name, &unit)) = self.by_name.get_key_value(name) else {
            return Ok(());
        };
        if self.visited.contains(name) {
            return Ok(());
        }
        if !self.visiting.insert(name) {
            return Err(JobError::CycleDependency { unit: name.to_string() });
        }

        for dependency in unit.dependencies() {
            self.visit(dependency)?;
        }

        self.visiting.remove(name);
        self.visited.insert(name);
        self.order.push(unit);
        Ok(())
    }
}

/// A node kept by [`DependencyGraph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyNode {
    /// Unit name.
    pub name: String,

    /// Tie-break seed.
    pub priority: i32,

    /// Names this node depends on.
    pub dependencies: Vec<String>,

    /// Registered nodes that depend on this one.
    pub dependents: BTreeSet<String>,

    /// Set by `mark_executed`, cleared by `invalidate`.
    pub executed: bool,

    /// Value recorded by the last execution.
    pub last_result: Option<Value>,
}

impl Dependent for DependencyNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// Persistent acyclic graph of named units.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, DependencyNode>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one node. See [`DependencyGraph::register_all`].
    pub fn register(&mut self, name: impl Into<String>, dependencies: Vec<String>) -> JobResult<()> {
        self.register_all(vec![UnitSpec {
            name: name.into(),
            priority: 0,
            dependencies,
        }])
    }

    /// Registers nodes atomically: if the resulting graph has a cycle,
    /// nothing changes. Re-registering a name replaces its node.
    pub fn register_all(&mut self, specs: Vec<UnitSpec>) -> JobResult<()> {
        let mut candidate = self.nodes.clone();
        for spec in specs {
            candidate.insert(
                spec.name.clone(),
                DependencyNode {
                    name: spec.name,
                    priority: spec.priority,
                    dependencies: spec.dependencies,
                    dependents: BTreeSet::new(),
                    executed: false,
                    last_result: None,
                },
            );
        }

        let view: Vec<&DependencyNode> = candidate.values().collect();
        resolve_dependencies(&view)?;

        self.nodes = candidate;
        self.rebuild_dependents();
        Ok(())
    }

    /// Removes a node. Returns false if it was not registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = self.nodes.remove(name).is_some();
        if removed {
            self.rebuild_dependents();
        }
        removed
    }

    fn rebuild_dependents(&mut self) {
        let edges: Vec<(String, String)> = self
            .nodes
            .values()
            .flat_map(|node| {
                node.dependencies
                    .iter()
                    .map(move |dependency| (dependency.clone(), node.name.clone()))
            })
            .collect();

        for node in self.nodes.values_mut() {
            node.dependents.clear();
        }
        for (dependency, dependent) in edges {
            if let Some(node) = self.nodes.get_mut(&dependency) {
                node.dependents.insert(dependent);
            }
        }
    }

    /// Names in dependency order.
    pub fn execution_order(&self) -> JobResult<Vec<String>> {
        let view: Vec<&DependencyNode> = self.nodes.values().collect();
        Ok(resolve_dependencies(&view)?
            .into_iter()
            .map(|node| node.name.clone())
            .collect())
    }

    /// Records an execution result.
    pub fn mark_executed(&mut self, name: &str, result: Value) -> JobResult<()> {
        let node = self.nodes.get_mut(name).ok_or_else(|| JobError::NotFound {
            resource: "Dependency node",
            id: name.to_string(),
        })?;
        node.executed = true;
        node.last_result = Some(result);
        Ok(())
    }

    /// Nodes not yet executed whose registered dependencies all have, in
    /// execution order.
    pub fn ready_nodes(&self) -> JobResult<Vec<String>> {
        Ok(self
            .execution_order()?
            .into_iter()
            .filter(|name| {
                self.nodes.get(name).is_some_and(|node| {
                    !node.executed
                        && node
                            .dependencies
                            .iter()
                            .all(|dep| self.nodes.get(dep).map_or(true, |d| d.executed))
                })
            })
            .collect())
    }

    /// Clears the executed flag of `name` and every transitive dependent.
    /// Returns the invalidated names.
    pub fn invalidate(&mut self, name: &str) -> JobResult<Vec<String>> {
        if !self.nodes.contains_key(name) {
            return Err(JobError::NotFound {
                resource: "Dependency node",
                id: name.to_string(),
            });
        }

        let mut invalidated = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&current) {
                node.executed = false;
                node.last_result = None;
                queue.extend(node.dependents.iter().cloned());
            }
            invalidated.push(current);
        }
        Ok(invalidated)
    }

    /// Direct dependents of a node.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.nodes
            .get(name)
            .map(|node| node.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Looks up a node.
    pub fn get(&self, name: &str) -> Option<&DependencyNode> {
        self.nodes.get(name)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
