//! In-process event bus with rule matching and at-least-once delivery.
//!
//! Events are accepted by [`handle::EventBusHandle::put_events`], matched against
//! every registered [`Rule`], and handed to each target of each matching rule on
//! its own task. A target that fails with a retryable [`TargetError`] (or times
//! out) is re-invoked with exponential backoff until it succeeds or the attempt
//! budget runs out, after which the event is dead-lettered. Targets must
//! therefore tolerate seeing the same event more than once.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Duration;

use crate::types::EventId;

/// Bus delivery notifications.
pub mod events;
/// Bus task, handle, and delivery loop.
pub mod handle;

/// An accepted event as delivered to targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Bus-assigned id; identical across redeliveries.
    pub id: EventId,
    /// Producer tag matched by rules.
    pub source: String,
    /// Optional event kind.
    #[serde(rename = "detail-type", default, skip_serializing_if = "Option::is_none")]
    pub detail_type: Option<String>,
    /// Acceptance time in milliseconds since epoch.
    pub time_ms: u64,
    /// Producer payload, passed through verbatim.
    pub detail: serde_json::Value,
}

/// One event submitted to [`handle::EventBusHandle::put_events`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    /// Producer tag.
    pub source: String,
    /// Optional event kind.
    #[serde(rename = "detail-type", default, skip_serializing_if = "Option::is_none")]
    pub detail_type: Option<String>,
    /// Payload.
    pub detail: serde_json::Value,
}

/// Declarative predicate over event attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPattern {
    /// Accepted sources; the event must equal one of them exactly.
    pub source: Vec<String>,
    /// Accepted detail types; `None` accepts any.
    #[serde(rename = "detail-type", default, skip_serializing_if = "Option::is_none")]
    pub detail_type: Option<Vec<String>>,
}

impl EventPattern {
    /// Pattern matching exactly one source.
    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: vec![source.into()],
            detail_type: None,
        }
    }

    /// Narrows the pattern to the given detail types.
    pub fn with_detail_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.detail_type = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// True when `event` satisfies every attribute constraint.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.source.iter().any(|s| *s == event.source) {
            return false;
        }
        match (&self.detail_type, &event.detail_type) {
            (None, _) => true,
            (Some(allowed), Some(dt)) => allowed.iter().any(|a| a == dt),
            (Some(_), None) => false,
        }
    }
}

/// Failure reported by a target invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TargetError {
    /// Human-readable cause.
    pub message: String,
    /// Whether the bus should redeliver.
    pub retryable: bool,
}

impl TargetError {
    /// Failure the bus should retry.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Failure no redelivery can fix; the event goes straight to dead letters.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Subscriber invoked for events matching a rule.
#[async_trait]
pub trait EventTarget: Send + Sync {
    /// Stable name used in logs and delivery notifications.
    fn name(&self) -> &str;

    /// Handles one delivery. Errors must be returned, never swallowed, so the
    /// bus can redeliver.
    async fn invoke(&self, event: &Event) -> Result<(), TargetError>;
}

/// A named pattern plus the targets it fans out to.
#[derive(Clone)]
pub struct Rule {
    /// Unique rule name on its bus.
    pub name: String,
    /// Match predicate.
    pub pattern: EventPattern,
    /// Subscribers invoked on match.
    pub targets: Vec<Arc<dyn EventTarget>>,
}

impl Rule {
    /// Creates a rule with no targets.
    pub fn new(name: impl Into<String>, pattern: EventPattern) -> Self {
        Self {
            name: name.into(),
            pattern,
            targets: Vec::new(),
        }
    }

    /// Adds a target.
    pub fn with_target(mut self, target: Arc<dyn EventTarget>) -> Self {
        self.targets.push(target);
        self
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field(
                "targets",
                &self.targets.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// An event a target could not process within the retry budget.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    /// The undeliverable event.
    pub event: Event,
    /// Rule that matched it.
    pub rule: String,
    /// Target that kept failing.
    pub target: String,
    /// Attempts made.
    pub attempts: u32,
    /// Last failure.
    pub error: TargetError,
}

/// Errors from bus calls.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus did not accept the call within the publish bound.
    #[error("bus did not accept the call within {0:?}")]
    Timeout(Duration),
    /// The bus task has stopped.
    #[error("bus channel closed")]
    ChannelClosed,
    /// An entry was rejected before acceptance.
    #[error("invalid event entry: {0}")]
    InvalidEntry(String),
    /// A rule was rejected.
    #[error("invalid rule: {0}")]
    InvalidRule(String),
}
