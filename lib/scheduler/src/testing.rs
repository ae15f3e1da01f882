//! Fixtures shared by unit tests.

use crate::sweep::{SweepConfig, WakeSweeper};
use crate::worker::{JobWorker, RetryPolicy, WorkerConfig};
use chrono::{DateTime, TimeZone, Utc};
use leadflow_core::{ParticipantId, WorkflowId};
use leadflow_workflow::clock::{Clock, ManualClock};
use leadflow_workflow::definition::Workflow;
use leadflow_workflow::dispatcher::TriggerDispatcher;
use leadflow_workflow::edge::Edge;
use leadflow_workflow::executor::{ExecutorConfig, NodeExecutor};
use leadflow_workflow::graph::WorkflowGraph;
use leadflow_workflow::memory::{InMemoryCollaborators, InMemoryStore};
use leadflow_workflow::node::{Node, NodeKind, WaitConfig, WaitUnit};
use leadflow_workflow::participant::Participant;
use leadflow_workflow::queue::{InMemoryJobQueue, JobQueue};
use leadflow_workflow::store::EngineStore;
use leadflow_workflow::trigger::TriggerSpec;
use std::sync::Arc;

/// Wednesday 2026-03-04 10:00 UTC.
pub(crate) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0)
        .single()
        .expect("valid start time")
}

/// A manual-trigger workflow running `nodes` in a straight line.
pub(crate) fn chain(nodes: Vec<Node>) -> Workflow {
    let mut all = vec![Node::new("trigger", "Trigger", NodeKind::Trigger)];
    all.extend(nodes);
    let edges = all
        .windows(2)
        .enumerate()
        .map(|(i, pair)| Edge::new(format!("e{i}"), pair[0].id.clone(), pair[1].id.clone()))
        .collect();
    let graph = WorkflowGraph::from_parts(all, edges).expect("graph");
    Workflow::new("Test", TriggerSpec::Manual).with_graph(graph)
}

pub(crate) fn wait_hours(id: &str, amount: u32) -> Node {
    Node::new(
        id,
        "Wait",
        NodeKind::Wait(WaitConfig {
            amount,
            unit: WaitUnit::Hours,
        }),
    )
}

/// In-memory engine with a manual clock.
pub(crate) struct Harness {
    pub store: InMemoryStore,
    pub collaborators: InMemoryCollaborators,
    pub queue: InMemoryJobQueue,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        let clock = ManualClock::new(start());
        Self {
            store: InMemoryStore::new(),
            collaborators: InMemoryCollaborators::new(),
            queue: InMemoryJobQueue::new(Arc::new(clock.clone())),
            clock,
        }
    }

    pub fn store(&self) -> Arc<dyn EngineStore> {
        Arc::new(self.store.clone())
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    pub fn job_queue(&self) -> Arc<dyn JobQueue> {
        Arc::new(self.queue.clone())
    }

    pub fn executor(&self) -> NodeExecutor {
        self.executor_with(ExecutorConfig::default(), self.job_queue())
    }

    pub fn executor_with(&self, config: ExecutorConfig, queue: Arc<dyn JobQueue>) -> NodeExecutor {
        NodeExecutor::new(
            self.store(),
            self.collaborators.collaborators(config.collaborator_timeout),
            queue,
            self.clock(),
            config,
        )
    }

    pub fn dispatcher(&self) -> TriggerDispatcher {
        TriggerDispatcher::new(self.store(), self.job_queue(), self.clock())
    }

    pub fn sweeper(&self) -> WakeSweeper {
        WakeSweeper::new(
            self.store(),
            self.executor(),
            self.job_queue(),
            self.clock(),
            SweepConfig::default(),
        )
    }

    pub fn worker(&self) -> JobWorker {
        self.worker_with(self.executor())
    }

    pub fn worker_with(&self, executor: NodeExecutor) -> JobWorker {
        JobWorker::new(
            self.job_queue(),
            executor,
            self.clock(),
            RetryPolicy::default(),
            WorkerConfig::default(),
        )
    }

    /// Activates and stores a workflow.
    pub async fn publish(&self, mut workflow: Workflow) -> Workflow {
        workflow.activate().expect("activate");
        self.store.insert_workflow(workflow).await.expect("insert")
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
