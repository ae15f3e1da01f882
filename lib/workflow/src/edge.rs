//! Edge types for workflow graphs.
//!
//! An edge connects a source node to a target node. Edges leaving a
//! condition or split node carry the branch label that selects them.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Edge identifier, unique within the workflow.
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    /// Branch label selecting this edge (`yes`/`no` or a split variant id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl Edge {
    /// Creates an unlabeled edge.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            branch: None,
        }
    }

    /// Sets the branch label.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Returns true if this edge carries the given label.
    #[must_use]
    pub fn is_branch(&self, label: &str) -> bool {
        self.branch.as_deref() == Some(label)
    }
}
