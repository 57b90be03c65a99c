//! Session events and broadcasting to observers.
//!
//! The controller publishes a [`SessionEvent`] for every status change,
//! countdown tick, expiry, failure and successful grade. Any number of
//! observers (the terminal front end, tests) subscribe independently.
//!
//! # Example
//!
//! ```
//! use nova_session::events::{EventBroadcaster, SessionEvent};
//! use nova_session::SessionStatus;
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(16);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(SessionEvent::status_changed(
//!     SessionStatus::Configuring,
//!     SessionStatus::Generating,
//! ));
//!
//! if let Ok(event) = receiver.recv().await {
//!     assert_eq!(event.event_name(), "status_changed");
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::NovaError;
use crate::session::SessionStatus;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `status_changed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangedPayload {
    /// Previous status.
    pub from: SessionStatus,
    /// New status.
    pub to: SessionStatus,
}

/// Payload for the `tick` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickPayload {
    /// Seconds remaining after this tick.
    pub time_left_seconds: u64,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
    /// Whether re-triggering the action may succeed.
    pub retryable: bool,
}

/// Payload for the `graded` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedPayload {
    /// Id of the new history entry.
    pub entry_id: String,
    /// AP score estimate, 1 to 5.
    pub ap_score: u8,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events published while a session runs.
///
/// Serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session moved between states.
    StatusChanged(StatusChangedPayload),
    /// One second of the countdown elapsed.
    Tick(TickPayload),
    /// The countdown reached zero; submission follows.
    TimeExpired,
    /// A generation or grading attempt failed.
    Error(ErrorPayload),
    /// The session was graded and added to history.
    Graded(GradedPayload),
}

impl SessionEvent {
    /// Creates a `StatusChanged` event.
    #[must_use]
    pub const fn status_changed(from: SessionStatus, to: SessionStatus) -> Self {
        Self::StatusChanged(StatusChangedPayload { from, to })
    }

    /// Creates a `Tick` event.
    #[must_use]
    pub const fn tick(time_left_seconds: u64) -> Self {
        Self::Tick(TickPayload { time_left_seconds })
    }

    /// Creates an `Error` event from a failure.
    #[must_use]
    pub fn error(err: &NovaError) -> Self {
        Self::Error(ErrorPayload {
            message: err.to_string(),
            retryable: err.is_retryable(),
        })
    }

    /// Creates a `Graded` event.
    #[must_use]
    pub fn graded(entry_id: impl Into<String>, ap_score: u8) -> Self {
        Self::Graded(GradedPayload {
            entry_id: entry_id.into(),
            ap_score,
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::StatusChanged(_) => "status_changed",
            Self::Tick(_) => "tick",
            Self::TimeExpired => "time_expired",
            Self::Error(_) => "error",
            Self::Graded(_) => "graded",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Fans session events out to every subscriber.
///
/// Events are not kept for subscribers that join later.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber.
    ///
    /// A subscriber that falls behind receives a `Lagged` error and misses
    /// the oldest events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event and returns how many subscribers will see it.
    pub fn send(&self, event: SessionEvent) -> usize {
        // Err only means nobody is listening
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
