//! Dependency graph between provider instances
//!
//! Index-based adjacency: each instance name maps to the list of edges it
//! declares. Edges may point at names that are not registered yet (optional
//! dependencies); ordering ignores them until the target appears.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{Error, Result};

/// "from depends on target"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub target: String,
    pub required: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    edges: BTreeMap<String, Vec<DependencyEdge>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    pub fn add_node(&mut self, name: impl Into<String>) {
        self.nodes.insert(name.into());
    }

    /// Remove a node and detach it from every edge
    pub fn remove_node(&mut self, name: &str) {
        self.nodes.remove(name);
        self.edges.remove(name);
        for edges in self.edges.values_mut() {
            edges.retain(|edge| edge.target != name);
        }
    }

    /// Link `from -> to`, refusing edges that would close a cycle
    ///
    /// On error the graph is left unchanged. Re-adding an existing edge
    /// updates its `required` flag.
    pub fn add_edge(&mut self, from: &str, to: &str, required: bool) -> Result<()> {
        let mut candidate = self.clone();
        candidate.insert_edge(from, to, required);
        candidate.check_acyclic()?;
        *self = candidate;
        Ok(())
    }

    fn insert_edge(&mut self, from: &str, to: &str, required: bool) {
        let edges = self.edges.entry(from.to_string()).or_default();
        match edges.iter_mut().find(|edge| edge.target == to) {
            Some(edge) => edge.required = required,
            None => edges.push(DependencyEdge {
                target: to.to_string(),
                required,
            }),
        }
    }

    /// Remove `from -> to`; returns whether the edge existed
    pub fn remove_edge(&mut self, from: &str, to: &str) -> bool {
        let Some(edges) = self.edges.get_mut(from) else {
            return false;
        };
        let before = edges.len();
        edges.retain(|edge| edge.target != to);
        before != edges.len()
    }

    /// Edges declared by `name`, including ones to unregistered targets
    pub fn dependencies_of(&self, name: &str) -> &[DependencyEdge] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Registered instances that declare an edge to `name`
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(from, edges)| {
                self.nodes.contains(*from) && edges.iter().any(|edge| edge.target == name)
            })
            .map(|(from, _)| from.clone())
            .collect()
    }

    /// Registered instances `name` depends on, directly or transitively, in
    /// startup order
    pub fn dependency_closure(&self, name: &str) -> Result<Vec<String>> {
        let mut reachable = BTreeSet::new();
        let mut pending = vec![name];
        while let Some(current) = pending.pop() {
            for edge in self.dependencies_of(current) {
                if self.nodes.contains(&edge.target) && reachable.insert(edge.target.as_str()) {
                    pending.push(edge.target.as_str());
                }
            }
        }

        Ok(self
            .topological_order()?
            .into_iter()
            .filter(|node| node != name && reachable.contains(node.as_str()))
            .collect())
    }

    /// Registered instances depending on `name`, directly or transitively, in
    /// shutdown order
    pub fn dependent_closure(&self, name: &str) -> Result<Vec<String>> {
        let mut reachable = BTreeSet::new();
        let mut pending = vec![name.to_string()];
        while let Some(current) = pending.pop() {
            for dependent in self.dependents_of(&current) {
                if reachable.insert(dependent.clone()) {
                    pending.push(dependent);
                }
            }
        }

        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order
            .into_iter()
            .filter(|node| node != name && reachable.contains(node))
            .collect())
    }

    pub fn check_acyclic(&self) -> Result<()> {
        self.topological_order().map(|_| ())
    }

    /// Depth-first topological sort over all registered nodes
    ///
    /// Every node appears after all registered nodes it depends on. Nodes are
    /// visited in name order so the result is deterministic. A back edge
    /// aborts with [`Error::CircularDependency`] carrying the cycle.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut stack: Vec<&str> = Vec::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        for node in &self.nodes {
            self.visit(node, &mut marks, &mut stack, &mut order)?;
        }

        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == node).unwrap_or(0);
                let mut path: Vec<String> = stack[start..].iter().map(|n| n.to_string()).collect();
                path.push(node.to_string());
                return Err(Error::CircularDependency { path });
            }
            None => {}
        }

        marks.insert(node, Mark::Visiting);
        stack.push(node);

        for edge in self.dependencies_of(node) {
            if self.nodes.contains(&edge.target) {
                self.visit(&edge.target, marks, stack, order)?;
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
        order.push(node.to_string());
        Ok(())
    }
}
