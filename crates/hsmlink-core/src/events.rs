//! Event system for the transport proxy.
//!
//! Lets a front end (CLI, dispatch layer, health checks) follow each request
//! without coupling to the proxy internals.

use std::fmt;

use crate::status::StatusCode;

/// Where a proxied request currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyPhase {
    /// Waiting for the lock.
    Idle,
    /// Ensuring the session is open.
    Opening,
    /// Sending the request.
    Writing,
    /// Waiting for the response.
    Reading,
    /// Reopening after a recoverable fault.
    Recovering,
    /// Response delivered.
    Done,
    /// Terminal error.
    Failed,
}

impl fmt::Display for ProxyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyPhase::Idle => write!(f, "Idle"),
            ProxyPhase::Opening => write!(f, "Opening"),
            ProxyPhase::Writing => write!(f, "Writing"),
            ProxyPhase::Reading => write!(f, "Reading"),
            ProxyPhase::Recovering => write!(f, "Recovering"),
            ProxyPhase::Done => write!(f, "Done"),
            ProxyPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Events emitted by the transport proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Phase changed.
    PhaseChanged { from: ProxyPhase, to: ProxyPhase },
    /// The session is being reopened.
    Reopening { attempt: u32, reason: String },
    /// Request completed.
    Completed { response_len: usize },
    /// Request failed.
    Failed { code: StatusCode, message: String },
}

/// Observer trait for receiving transport events.
pub trait TransportObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, correlation_id: &str, event: &TransportEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl TransportObserver for NullObserver {
    fn on_event(&self, _correlation_id: &str, _event: &TransportEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl TransportObserver for TracingObserver {
    fn on_event(&self, correlation_id: &str, event: &TransportEvent) {
        match event {
            TransportEvent::PhaseChanged { from, to } => {
                tracing::trace!(correlation_id, from = %from, to = %to, "Phase changed");
            }
            TransportEvent::Reopening { attempt, reason } => {
                tracing::warn!(correlation_id, attempt, reason = %reason, "Recovering device session");
            }
            TransportEvent::Completed { response_len } => {
                tracing::debug!(correlation_id, response_len, "Request complete");
            }
            TransportEvent::Failed { code, message } => {
                tracing::error!(correlation_id, code = %code, "Request failed: {}", message);
            }
        }
    }
}
