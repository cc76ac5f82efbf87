//! Attribute dependency graph.
//!
//! Nodes are `entity.attribute` pairs. An edge points from a read
//! attribute to the derived attribute whose rule reads it, tagged
//! with how the dependency crosses relationships so the evaluator
//! can map a changed source row to the rows that must recompute.
//!
//! The graph is built once at registration time. Cycles are rejected
//! there, and every derived attribute gets a rank (longest dependency
//! chain below it) that drives evaluation order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

/// One attribute of one entity, the unit the graph is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttrRef {
    pub entity: String,
    pub attr: String,
}

impl AttrRef {
    pub fn new(entity: &str, attr: &str) -> Self {
        AttrRef {
            entity: entity.to_string(),
            attr: attr.to_string(),
        }
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.attr)
    }
}

/// How an edge maps a changed source row to target rows.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Crossing {
    /// Target lives on the same row as the source.
    Local,
    /// Source lives on a child row; the target row is its parent
    /// through the named child-side relationship.
    ToParent { rel: String },
    /// Source lives on a parent row; target rows are its children
    /// through the named relationship.
    ToChildren { child_entity: String, rel: String },
}

/// A directed dependency: when `source` changes on some row, the rule
/// deriving `target` must rerun on the row(s) the crossing selects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Edge {
    pub source: AttrRef,
    pub target: AttrRef,
    pub crossing: Crossing,
}

/// A dependency cycle, listed in traversal order with the entry node
/// repeated at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePath(pub Vec<AttrRef>);

impl fmt::Display for CyclePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for node in &self.0 {
            if !first {
                f.write_str(" -> ")?;
            }
            write!(f, "{}", node)?;
            first = false;
        }
        Ok(())
    }
}

/// Result type for graph construction
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors raised while finalizing the dependency graph
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphError {
    /// The registered rules form a dependency cycle
    #[error("Cyclic dependency: {0}")]
    Cycle(CyclePath),
}

/// The finalized, immutable graph.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    outgoing: BTreeMap<AttrRef, Vec<Edge>>,
    ranks: BTreeMap<AttrRef, u32>,
    edge_count: usize,
}

impl DependencyGraph {
    /// Edges whose source is the given attribute, in deterministic
    /// (target, crossing) order.
    pub fn edges_from(&self, source: &AttrRef) -> &[Edge] {
        self.outgoing.get(source).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Longest dependency chain strictly below this attribute.
    /// Stored attributes rank 0.
    pub fn rank(&self, node: &AttrRef) -> u32 {
        self.ranks.get(node).copied().unwrap_or(0)
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Every edge, in deterministic (source, target, crossing) order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.outgoing.values().flatten()
    }
}

/// Accumulates edges during registration, then validates and ranks.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    edges: BTreeSet<Edge>,
    targets: BTreeSet<AttrRef>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder::default()
    }

    /// Declare a derived attribute, with or without incoming edges.
    pub fn add_target(&mut self, target: AttrRef) {
        self.targets.insert(target);
    }

    pub fn add_edge(&mut self, source: AttrRef, target: AttrRef, crossing: Crossing) {
        self.targets.insert(target.clone());
        self.edges.insert(Edge {
            source,
            target,
            crossing,
        });
    }

    /// Rejects cycles, then assigns ranks by propagating
    /// `rank(target) >= rank(source) + 1` to a fixpoint. Terminates
    /// because the graph is acyclic by the time ranks are computed.
    pub fn finish(self) -> GraphResult<DependencyGraph> {
        let mut nodes: BTreeSet<AttrRef> = self.targets.clone();
        for edge in &self.edges {
            nodes.insert(edge.source.clone());
            nodes.insert(edge.target.clone());
        }

        let mut adjacency: BTreeMap<AttrRef, Vec<AttrRef>> = BTreeMap::new();
        for edge in &self.edges {
            adjacency
                .entry(edge.source.clone())
                .or_default()
                .push(edge.target.clone());
        }
        if let Some(path) = find_cycle(&adjacency, &nodes) {
            return Err(GraphError::Cycle(CyclePath(path)));
        }

        let mut ranks: BTreeMap<AttrRef, u32> = nodes.iter().map(|n| (n.clone(), 0)).collect();
        for target in &self.targets {
            ranks.insert(target.clone(), 1);
        }
        let mut changed = true;
        while changed {
            changed = false;
            for edge in &self.edges {
                let want = ranks.get(&edge.source).copied().unwrap_or(0) + 1;
                let have = ranks.get(&edge.target).copied().unwrap_or(0);
                if have < want {
                    ranks.insert(edge.target.clone(), want);
                    changed = true;
                }
            }
        }

        let mut outgoing: BTreeMap<AttrRef, Vec<Edge>> = BTreeMap::new();
        let edge_count = self.edges.len();
        for edge in self.edges {
            outgoing.entry(edge.source.clone()).or_default().push(edge);
        }
        Ok(DependencyGraph {
            outgoing,
            ranks,
            edge_count,
        })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

fn find_cycle(adjacency: &BTreeMap<AttrRef, Vec<AttrRef>>, nodes: &BTreeSet<AttrRef>) -> Option<Vec<AttrRef>> {
    let mut colors: BTreeMap<AttrRef, Color> = nodes.iter().map(|n| (n.clone(), Color::White)).collect();
    let mut path = Vec::new();
    for node in nodes {
        if colors.get(node) == Some(&Color::White) {
            if let Some(cycle) = visit(node, adjacency, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(
    node: &AttrRef,
    adjacency: &BTreeMap<AttrRef, Vec<AttrRef>>,
    colors: &mut BTreeMap<AttrRef, Color>,
    path: &mut Vec<AttrRef>,
) -> Option<Vec<AttrRef>> {
    colors.insert(node.clone(), Color::Gray);
    path.push(node.clone());
    if let Some(nexts) = adjacency.get(node) {
        for next in nexts {
            match colors.get(next) {
                Some(Color::Gray) => {
                    let start = path.iter().position(|n| n == next).unwrap_or(0);
                    let mut cycle: Vec<AttrRef> = path[start..].to_vec();
                    cycle.push(next.clone());
                    return Some(cycle);
                }
                Some(Color::Black) => {}
                _ => {
                    if let Some(cycle) = visit(next, adjacency, colors, path) {
                        return Some(cycle);
                    }
                }
            }
        }
    }
    path.pop();
    colors.insert(node.clone(), Color::Black);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(entity: &str, attr: &str) -> AttrRef {
        AttrRef::new(entity, attr)
    }

    #[test]
    fn test_ranks_follow_longest_chain() {
        let mut builder = GraphBuilder::new();
        builder.add_edge(node("item", "quantity"), node("item", "amount"), Crossing::Local);
        builder.add_edge(
            node("item", "amount"),
            node("order", "amount_total"),
            Crossing::ToParent { rel: "order".into() },
        );
        builder.add_edge(
            node("order", "amount_total"),
            node("customer", "balance"),
            Crossing::ToParent { rel: "customer".into() },
        );
        let graph = builder.finish().unwrap();

        assert_eq!(graph.rank(&node("item", "quantity")), 0);
        assert_eq!(graph.rank(&node("item", "amount")), 1);
        assert_eq!(graph.rank(&node("order", "amount_total")), 2);
        assert_eq!(graph.rank(&node("customer", "balance")), 3);
    }

    #[test]
    fn test_target_without_edges_still_ranks_above_stored() {
        let mut builder = GraphBuilder::new();
        builder.add_target(node("order", "code"));
        let graph = builder.finish().unwrap();
        assert_eq!(graph.rank(&node("order", "code")), 1);
    }

    #[test]
    fn test_cycle_is_reported_with_its_path() {
        let mut builder = GraphBuilder::new();
        builder.add_edge(node("e", "a"), node("e", "b"), Crossing::Local);
        builder.add_edge(node("e", "b"), node("e", "a"), Crossing::Local);
        let err = builder.finish().unwrap_err();
        let GraphError::Cycle(path) = err;
        assert_eq!(path.0.first(), path.0.last());
        let text = path.to_string();
        assert!(text.contains("e.a -> e.b") || text.contains("e.b -> e.a"));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut builder = GraphBuilder::new();
        builder.add_edge(node("e", "a"), node("e", "a"), Crossing::Local);
        assert!(matches!(builder.finish(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut builder = GraphBuilder::new();
        builder.add_edge(node("e", "a"), node("e", "b"), Crossing::Local);
        builder.add_edge(node("e", "a"), node("e", "b"), Crossing::Local);
        let graph = builder.finish().unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edges_from(&node("e", "a")).len(), 1);
    }
}
