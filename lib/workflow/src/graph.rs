//! Workflow graph implementation using petgraph.
//!
//! Workflows are directed graphs where:
//! - Nodes are typed workflow steps
//! - Edges connect a source node to a target, optionally labeled with a branch
//!
//! The graph serializes as `{nodes, edges}`. Deserialization goes through
//! [`WorkflowGraph::from_parts`], so a loaded graph never has duplicate node
//! ids or dangling edges.

use crate::edge::Edge;
use crate::error::DefinitionError;
use crate::node::{Node, NodeId, NodeType};
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Serialized form of a graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphParts {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Edge weight tagged with its insertion position.
#[derive(Debug, Clone)]
struct EdgeSlot {
    seq: u64,
    edge: Edge,
}

/// A workflow graph using petgraph's stable directed graph.
///
/// Edge order is the order edges were added, tracked explicitly because the
/// first outgoing edge is the default transition and petgraph indices say
/// nothing about age.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GraphParts", into = "GraphParts")]
pub struct WorkflowGraph {
    graph: StableDiGraph<Node, EdgeSlot>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
    next_edge_seq: u64,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            node_index_map: HashMap::new(),
            next_edge_seq: 0,
        }
    }

    /// Builds a graph from node and edge lists.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate node or edge ids, or an edge whose
    /// endpoint is not in `nodes`.
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self, DefinitionError> {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node)?;
        }

        let mut edge_ids = HashSet::new();
        for edge in edges {
            if !edge_ids.insert(edge.id.clone()) {
                return Err(DefinitionError::DuplicateEdge { edge_id: edge.id });
            }
            graph.add_edge(edge)?;
        }

        Ok(graph)
    }

    /// Adds a node to the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a node with the same id already exists.
    pub fn add_node(&mut self, node: Node) -> Result<(), DefinitionError> {
        if self.node_index_map.contains_key(&node.id) {
            return Err(DefinitionError::DuplicateNode { node_id: node.id });
        }
        let node_id = node.id.clone();
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id, index);
        Ok(())
    }

    /// Adds an edge between two existing nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if either endpoint does not exist.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), DefinitionError> {
        let source = self.index_of(&edge.id, &edge.source)?;
        let target = self.index_of(&edge.id, &edge.target)?;
        let seq = self.next_edge_seq;
        self.next_edge_seq += 1;
        self.graph.add_edge(source, target, EdgeSlot { seq, edge });
        Ok(())
    }

    fn index_of(&self, edge_id: &str, node_id: &NodeId) -> Result<NodeIndex, DefinitionError> {
        self.node_index_map
            .get(node_id)
            .copied()
            .ok_or_else(|| DefinitionError::UnknownEdgeEndpoint {
                edge_id: edge_id.to_string(),
                node_id: node_id.clone(),
            })
    }

    /// Returns a node by its ID.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns true if the node exists.
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.node_index_map.contains_key(node_id)
    }

    /// Returns all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_indices().filter_map(|idx| self.graph.node_weight(idx))
    }

    /// Returns all edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        let mut slots: Vec<&EdgeSlot> = self
            .graph
            .edge_indices()
            .filter_map(|idx| self.graph.edge_weight(idx))
            .collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| &slot.edge)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the outgoing edges of a node in insertion order.
    #[must_use]
    pub fn outgoing(&self, node_id: &NodeId) -> Vec<&Edge> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };

        // petgraph walks adjacency lists newest-first
        let mut slots: Vec<&EdgeSlot> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| edge.weight())
            .collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| &slot.edge).collect()
    }

    /// Resolves the node that follows `node_id`.
    ///
    /// With a branch label, the edge carrying that label wins; otherwise
    /// (or when no edge carries the label) the first outgoing edge is taken.
    /// `None` means the run has reached a natural end.
    #[must_use]
    pub fn next_node(&self, node_id: &NodeId, branch: Option<&str>) -> Option<&Node> {
        let outgoing = self.outgoing(node_id);
        let edge = branch
            .and_then(|label| outgoing.iter().find(|edge| edge.is_branch(label)))
            .or_else(|| outgoing.first())?;
        self.node(&edge.target)
    }

    /// Returns every trigger node.
    pub fn trigger_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes()
            .filter(|node| node.node_type() == NodeType::Trigger)
    }

    /// Returns the trigger node, if there is exactly one.
    #[must_use]
    pub fn trigger_node(&self) -> Option<&Node> {
        let mut triggers = self.trigger_nodes();
        let first = triggers.next()?;
        triggers.next().is_none().then_some(first)
    }

    /// Returns the node a new participant starts at.
    ///
    /// That is the target of the trigger's first edge, or the trigger itself
    /// when nothing follows it.
    #[must_use]
    pub fn entry_node(&self) -> Option<&Node> {
        let trigger = self.trigger_node()?;
        self.next_node(&trigger.id, None).or(Some(trigger))
    }

    /// Validates the graph for publishing.
    ///
    /// Checks:
    /// - Exactly one trigger node
    /// - Every node config is well formed
    /// - Condition and split nodes have an outgoing edge per branch label
    ///
    /// Cycles are allowed; the executor's per-step limit bounds them.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        match self.trigger_nodes().count() {
            0 => return Err(DefinitionError::NoTriggerNode),
            1 => {}
            count => return Err(DefinitionError::MultipleTriggerNodes { count }),
        }

        for node in self.nodes() {
            node.kind.validate(&node.id)?;

            let labels = node.kind.branch_labels();
            if labels.is_empty() {
                continue;
            }
            let outgoing = self.outgoing(&node.id);
            if let Some(missing) = labels
                .into_iter()
                .find(|label| !outgoing.iter().any(|edge| edge.is_branch(label)))
            {
                return Err(DefinitionError::MissingBranchEdge {
                    node_id: node.id.clone(),
                    branch: missing,
                });
            }
        }

        Ok(())
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<GraphParts> for WorkflowGraph {
    type Error = DefinitionError;

    fn try_from(parts: GraphParts) -> Result<Self, Self::Error> {
        Self::from_parts(parts.nodes, parts.edges)
    }
}

impl From<WorkflowGraph> for GraphParts {
    fn from(graph: WorkflowGraph) -> Self {
        Self {
            nodes: graph.nodes().cloned().collect(),
            edges: graph.edges().cloned().collect(),
        }
    }
}
