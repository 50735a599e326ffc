//! Delivery notifications broadcast by the bus.

use crate::types::EventId;

/// Notifications emitted while the bus accepts and delivers events.
///
/// Subscribing is the out-of-band way to learn that a published event was
/// actually handled; publishing itself only confirms acceptance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// An event was accepted and fanned out.
    Accepted {
        /// Accepted event.
        event_id: EventId,
        /// Number of (rule, target) deliveries scheduled.
        deliveries: usize,
    },
    /// A target handled the event.
    Delivered {
        /// Delivered event.
        event_id: EventId,
        /// Matching rule.
        rule: String,
        /// Target name.
        target: String,
        /// 1-based attempt that succeeded.
        attempt: u32,
    },
    /// A target invocation failed or timed out.
    DeliveryFailed {
        /// Affected event.
        event_id: EventId,
        /// Matching rule.
        rule: String,
        /// Target name.
        target: String,
        /// 1-based attempt that failed.
        attempt: u32,
        /// Failure message.
        error: String,
    },
    /// The retry budget was exhausted or the failure was permanent.
    DeadLettered {
        /// Abandoned event.
        event_id: EventId,
        /// Matching rule.
        rule: String,
        /// Target name.
        target: String,
        /// Last failure message.
        error: String,
    },
}

impl BusEvent {
    /// Id of the event this notification concerns.
    pub fn event_id(&self) -> EventId {
        match self {
            Self::Accepted { event_id, .. }
            | Self::Delivered { event_id, .. }
            | Self::DeliveryFailed { event_id, .. }
            | Self::DeadLettered { event_id, .. } => *event_id,
        }
    }
}
