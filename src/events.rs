//! Outbound render events.
//!
//! Each terminal outcome is published once to the tenant's channel
//! (`tenant:{id}:events`). Publishing is fire-and-forget message passing: the pipeline
//! never waits on subscribers.

use crate::error::{ErrorKind, RenderError};
use crate::job::Job;
use crate::status::RenderResult;
use crate::types::{JobId, RenderArtifacts, TenantId};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum RenderEvent {
    #[serde(rename = "render.completed", rename_all = "camelCase")]
    Completed {
        job_id: JobId,
        tenant_id: TenantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        artifacts: RenderArtifacts,
        cost_tokens: u64,
        cost_cents: u64,
    },
    #[serde(rename = "render.failed", rename_all = "camelCase")]
    Failed {
        job_id: JobId,
        tenant_id: TenantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        error: String,
        error_kind: ErrorKind,
        retryable: bool,
    },
}

impl RenderEvent {
    pub fn for_result(job: &Job, result: &RenderResult) -> Self {
        match result {
            RenderResult::Success {
                artifacts,
                cost_tokens,
                cost_cents,
                ..
            } => RenderEvent::Completed {
                job_id: job.job_id.clone(),
                tenant_id: job.tenant_id.clone(),
                user_id: job.user_id.clone(),
                artifacts: artifacts.clone(),
                cost_tokens: *cost_tokens,
                cost_cents: *cost_cents,
            },
            RenderResult::Failure {
                error_kind,
                message,
                retryable,
            } => RenderEvent::Failed {
                job_id: job.job_id.clone(),
                tenant_id: job.tenant_id.clone(),
                user_id: job.user_id.clone(),
                error: message.clone(),
                error_kind: *error_kind,
                retryable: *retryable,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RenderEvent::Completed { .. } => "render.completed",
            RenderEvent::Failed { .. } => "render.failed",
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            RenderEvent::Completed { job_id, .. } | RenderEvent::Failed { job_id, .. } => job_id,
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        match self {
            RenderEvent::Completed { tenant_id, .. } | RenderEvent::Failed { tenant_id, .. } => {
                tenant_id
            }
        }
    }
}

/// Event addressed to a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub ts: String,
    pub channel: String,
    pub event: RenderEvent,
}

impl EventEnvelope {
    pub fn with_now(event: RenderEvent) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            channel: event.tenant_id().event_channel(),
            event,
        }
    }
}

/// Sink for terminal render events
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: RenderEvent) -> Result<(), RenderError>;
}

#[derive(Clone)]
pub struct ChannelEventPublisher {
    sender: UnboundedSender<EventEnvelope>,
}

impl ChannelEventPublisher {
    pub fn new_pair() -> (Self, UnboundedReceiver<EventEnvelope>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventPublisher for ChannelEventPublisher {
    fn publish(&self, event: RenderEvent) -> Result<(), RenderError> {
        self.sender
            .send(EventEnvelope::with_now(event))
            .map_err(|err| RenderError::Storage(format!("event channel closed: {}", err)))
    }
}
