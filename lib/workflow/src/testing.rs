//! Fixtures shared by unit tests.

use crate::clock::{Clock, ManualClock};
use crate::definition::{MetricsDelta, Workflow, WorkflowStatus};
use crate::edge::Edge;
use crate::executor::{ExecutorConfig, NodeExecutor};
use crate::graph::WorkflowGraph;
use crate::lead::Lead;
use crate::memory::{InMemoryCollaborators, InMemoryStore};
use crate::node::{Node, NodeKind};
use crate::participant::Participant;
use crate::queue::InMemoryJobQueue;
use crate::store::EngineStore;
use crate::trigger::TriggerSpec;
use chrono::{DateTime, TimeZone, Utc};
use leadflow_core::{LeadId, ParticipantId, WorkflowId};
use std::sync::Arc;

/// Wednesday 2026-03-04 10:00 UTC.
pub(crate) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0)
        .single()
        .expect("valid start time")
}

/// A draft workflow with a manual trigger.
pub(crate) fn workflow(nodes: Vec<Node>, edges: Vec<Edge>) -> Workflow {
    let graph = WorkflowGraph::from_parts(nodes, edges).expect("graph");
    Workflow::new("Test", TriggerSpec::Manual).with_graph(graph)
}

/// A trigger node followed by `nodes` in a straight line.
pub(crate) fn chain(nodes: Vec<Node>) -> Workflow {
    let mut all = vec![Node::new("trigger", "Trigger", NodeKind::Trigger)];
    all.extend(nodes);
    let edges = all
        .windows(2)
        .enumerate()
        .map(|(i, pair)| Edge::new(format!("e{i}"), pair[0].id.clone(), pair[1].id.clone()))
        .collect();
    workflow(all, edges)
}

/// In-memory engine with a manual clock.
pub(crate) struct Engine {
    pub store: InMemoryStore,
    pub collaborators: InMemoryCollaborators,
    pub queue: InMemoryJobQueue,
    pub clock: ManualClock,
}

impl Engine {
    pub fn new() -> Self {
        let clock = ManualClock::new(start());
        Self {
            store: InMemoryStore::new(),
            collaborators: InMemoryCollaborators::new(),
            queue: InMemoryJobQueue::new(Arc::new(clock.clone())),
            clock,
        }
    }

    pub fn executor(&self) -> NodeExecutor {
        self.executor_with(ExecutorConfig::default())
    }

    pub fn executor_with(&self, config: ExecutorConfig) -> NodeExecutor {
        NodeExecutor::new(
            Arc::new(self.store.clone()),
            self.collaborators.collaborators(config.collaborator_timeout),
            Arc::new(self.queue.clone()),
            Arc::new(self.clock.clone()),
            config,
        )
    }

    pub async fn lead(&self, lead: Lead) {
        self.collaborators.insert_lead(lead).await;
    }

    /// Activates and stores a workflow.
    pub async fn publish(&self, mut workflow: Workflow) -> Workflow {
        workflow.activate().expect("activate");
        self.store.insert_workflow(workflow).await.expect("insert")
    }

    /// Stores a workflow as active without validating it, as a definition
    /// written by an older release might be.
    pub async fn force_active(&self, mut workflow: Workflow) -> Workflow {
        workflow.status = WorkflowStatus::Active;
        self.store.insert_workflow(workflow).await.expect("insert")
    }

    /// Places a lead at the workflow's entry node.
    pub async fn enroll(&self, workflow: &Workflow, lead_id: &str) -> Participant {
        let entry = workflow.graph.entry_node().expect("entry node");
        let participant = Participant::new(
            workflow.id,
            LeadId::new(lead_id),
            entry.id.clone(),
            serde_json::Value::Null,
            1,
            self.clock.now(),
        );
        self.store
            .insert_participant(participant, MetricsDelta::entered(), true)
            .await
            .expect("insert participant")
    }

    pub async fn participant(&self, id: ParticipantId) -> Participant {
        self.store
            .get_participant(id)
            .await
            .expect("get")
            .expect("participant exists")
    }

    pub async fn workflow(&self, id: WorkflowId) -> Workflow {
        self.store
            .get_workflow(id)
            .await
            .expect("get")
            .expect("workflow exists")
    }
}
