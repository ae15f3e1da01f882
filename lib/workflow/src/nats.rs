//! NATS transport for execution jobs and domain events.
//!
//! - Jobs go to a JetStream work-queue stream and are pulled by a durable
//!   consumer shared by every engine process.
//! - Domain events use core NATS subjects `leadflow.events.<type>`; engines
//!   subscribe through a queue group so each event is dispatched once.

use crate::bus::{EventBus, EventStream};
use crate::envelope::Envelope;
use crate::error::{BusError, QueueError};
use crate::queue::{Acknowledge, Delivery, ExecutionJob, JobQueue};
use crate::trigger::DomainEvent;
use async_nats::jetstream;
use async_nats::jetstream::AckKind;
use async_nats::jetstream::consumer::{AckPolicy, PullConsumer, pull};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::time::Duration;

/// Subject for execution jobs.
const JOBS_SUBJECT: &str = "leadflow.jobs";

/// Subject prefix for domain events.
const EVENTS_SUBJECT_PREFIX: &str = "leadflow.events";

/// Stream name for execution jobs.
const JOBS_STREAM_NAME: &str = "LEADFLOW_JOBS";

/// Durable consumer shared by all workers.
const JOBS_CONSUMER_NAME: &str = "leadflow-workers";

/// Queue group for event subscribers.
const EVENTS_QUEUE_GROUP: &str = "leadflow-dispatch";

/// How long a fetch waits for jobs before returning an empty batch.
const FETCH_EXPIRY: Duration = Duration::from_millis(500);

/// Configuration for the NATS transports.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Job stream name (defaults to LEADFLOW_JOBS).
    pub jobs_stream_name: Option<String>,
    /// Queue group for event subscribers (defaults to leadflow-dispatch).
    pub queue_group: Option<String>,
}

impl NatsConfig {
    /// Creates a new config with the given NATS URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            jobs_stream_name: None,
            queue_group: None,
        }
    }

    fn jobs_stream(&self) -> &str {
        self.jobs_stream_name.as_deref().unwrap_or(JOBS_STREAM_NAME)
    }

    fn queue_group(&self) -> &str {
        self.queue_group.as_deref().unwrap_or(EVENTS_QUEUE_GROUP)
    }
}

/// Returns the subject an event of this type is published on.
#[must_use]
pub fn event_subject(event: &DomainEvent) -> String {
    format!("{EVENTS_SUBJECT_PREFIX}.{}", event.event_type.as_str())
}

/// Acknowledges a JetStream message.
struct JetStreamAck(jetstream::Message);

#[async_trait]
impl Acknowledge for JetStreamAck {
    async fn ack(&self) -> Result<(), QueueError> {
        self.0.ack().await.map_err(|e| QueueError::Ack {
            reason: e.to_string(),
        })
    }
}

/// Job queue on a JetStream work-queue stream.
///
/// Jobs that are fetched before their `not_before` time are negatively
/// acknowledged with a delay, so the server redelivers them when due.
pub struct NatsJobQueue {
    jetstream: jetstream::Context,
    consumer: PullConsumer,
}

impl NatsJobQueue {
    /// Connects and creates the stream and consumer if they are missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or stream setup fails.
    pub async fn connect(config: &NatsConfig) -> Result<Self, QueueError> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection {
                reason: e.to_string(),
            })?;
        Self::with_client(client, config).await
    }

    /// Sets up the queue on an existing client.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream or consumer cannot be created.
    pub async fn with_client(
        client: async_nats::Client,
        config: &NatsConfig,
    ) -> Result<Self, QueueError> {
        let jetstream = jetstream::new(client);

        let stream = jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.jobs_stream().to_string(),
                subjects: vec![JOBS_SUBJECT.to_string()],
                storage: jetstream::stream::StorageType::File,
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                duplicate_window: Duration::from_secs(120),
                ..Default::default()
            })
            .await
            .map_err(|e| QueueError::Connection {
                reason: format!("failed to create jobs stream: {e}"),
            })?;

        let consumer = stream
            .get_or_create_consumer(
                JOBS_CONSUMER_NAME,
                pull::Config {
                    durable_name: Some(JOBS_CONSUMER_NAME.to_string()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(60),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| QueueError::Connection {
                reason: format!("failed to create jobs consumer: {e}"),
            })?;

        Ok(Self {
            jetstream,
            consumer,
        })
    }
}

#[async_trait]
impl JobQueue for NatsJobQueue {
    async fn enqueue(&self, job: ExecutionJob) -> Result<(), QueueError> {
        let envelope = Envelope::new(job);
        let bytes = envelope.to_json_bytes().map_err(|e| QueueError::Enqueue {
            reason: format!("failed to serialize job: {e}"),
        })?;

        let mut headers = async_nats::HeaderMap::new();
        headers.insert(
            async_nats::header::NATS_MESSAGE_ID,
            envelope.message_id.to_string().as_str(),
        );

        self.jetstream
            .publish_with_headers(JOBS_SUBJECT, headers, bytes.into())
            .await
            .map_err(|e| QueueError::Enqueue {
                reason: e.to_string(),
            })?
            .await
            .map_err(|e| QueueError::Enqueue {
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn fetch(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max.max(1))
            .expires(FETCH_EXPIRY)
            .messages()
            .await
            .map_err(|e| QueueError::Fetch {
                reason: e.to_string(),
            })?;

        let now = Utc::now();
        let mut delivered = Vec::new();
        while let Some(message) = messages.next().await {
            let message = message.map_err(|e| QueueError::Fetch {
                reason: e.to_string(),
            })?;

            let envelope: Envelope<ExecutionJob> =
                match Envelope::from_json_bytes(&message.payload) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping undecodable job");
                        message
                            .ack_with(AckKind::Term)
                            .await
                            .map_err(|e| QueueError::Ack {
                                reason: e.to_string(),
                            })?;
                        continue;
                    }
                };

            if !envelope.payload.is_due(now) {
                let delay = (envelope.payload.not_before - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                message
                    .ack_with(AckKind::Nak(Some(delay)))
                    .await
                    .map_err(|e| QueueError::Ack {
                        reason: e.to_string(),
                    })?;
                continue;
            }

            delivered.push(Delivery::new(envelope, Box::new(JetStreamAck(message))));
        }

        Ok(delivered)
    }
}

/// Event bus on core NATS subjects.
#[derive(Clone)]
pub struct NatsEventBus {
    client: async_nats::Client,
    queue_group: String,
}

impl NatsEventBus {
    /// Connects to the server named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(config: &NatsConfig) -> Result<Self, BusError> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| BusError::Connection {
                reason: e.to_string(),
            })?;
        Ok(Self::with_client(client, config))
    }

    #[must_use]
    pub fn with_client(client: async_nats::Client, config: &NatsConfig) -> Self {
        Self {
            client,
            queue_group: config.queue_group().to_string(),
        }
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, event: DomainEvent) -> Result<(), BusError> {
        let subject = event_subject(&event);
        let bytes = Envelope::new(event)
            .to_json_bytes()
            .map_err(|e| BusError::Publish {
                reason: format!("failed to serialize event: {e}"),
            })?;

        self.client
            .publish(subject, bytes.into())
            .await
            .map_err(|e| BusError::Publish {
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self) -> Result<EventStream, BusError> {
        let subscriber = self
            .client
            .queue_subscribe(
                format!("{EVENTS_SUBJECT_PREFIX}.>"),
                self.queue_group.clone(),
            )
            .await
            .map_err(|e| BusError::Subscribe {
                reason: e.to_string(),
            })?;

        let stream = subscriber.map(|message| {
            Envelope::<DomainEvent>::from_json_bytes(&message.payload)
                .map(Envelope::into_payload)
                .map_err(|e| BusError::Decode {
                    reason: e.to_string(),
                })
        });
        Ok(Box::pin(stream))
    }
}
