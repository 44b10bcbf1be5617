//! Transport proxy - serialized, self-healing access to the device.
//!
//! Every request runs under one process-wide lock: open, write, read and any
//! reopen happen as a single critical section, so at most one transaction is
//! in flight on the device.
//!
//! ```text
//! Idle -> Opening -> Writing -> Reading -> Done
//!                      ^           |
//!                      |     (recoverable)
//!                  Recovering <----+
//! ```
//!
//! A recoverable fault on either write or read reopens the device and starts
//! over with the whole write; the in-flight request is assumed lost.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{instrument, warn};

use crate::driver::{DeviceDriver, TransportError};
use crate::events::{ProxyPhase, TracingObserver, TransportEvent, TransportObserver};
use crate::session::DeviceSession;

/// Reopens allowed per request unless configured otherwise.
pub const DEFAULT_MAX_REOPENS: u32 = 8;

/// How many times a single request may reopen the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries for as long as every reopen succeeds.
    pub max_reopens: Option<u32>,
}

impl RetryPolicy {
    pub fn bounded(max_reopens: u32) -> Self {
        Self {
            max_reopens: Some(max_reopens),
        }
    }

    pub fn unbounded() -> Self {
        Self { max_reopens: None }
    }

    fn allows(&self, reopens: u32) -> bool {
        self.max_reopens.is_none_or(|max| reopens < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bounded(DEFAULT_MAX_REOPENS)
    }
}

/// Serializes all device access and recovers from stale sessions.
pub struct TransportProxy<D: DeviceDriver, O: TransportObserver = TracingObserver> {
    session: Mutex<DeviceSession<D>>,
    policy: RetryPolicy,
    observer: Arc<O>,
}

impl<D: DeviceDriver> TransportProxy<D, TracingObserver> {
    /// Create a proxy with the default tracing observer.
    pub fn new(session: DeviceSession<D>, policy: RetryPolicy) -> Self {
        Self::with_observer(session, policy, Arc::new(TracingObserver))
    }
}

impl<D: DeviceDriver, O: TransportObserver> TransportProxy<D, O> {
    /// Create a proxy with a custom observer.
    pub fn with_observer(session: DeviceSession<D>, policy: RetryPolicy, observer: Arc<O>) -> Self {
        Self {
            session: Mutex::new(session),
            policy,
            observer,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `request` to the device and return its complete response.
    ///
    /// Blocks until the device lock is free. Recoverable faults are handled
    /// internally; the caller sees either the full response or one error.
    #[instrument(level = "debug", skip(self, request), fields(len = request.len()))]
    pub fn handle(&self, request: &[u8], correlation_id: &str) -> Result<Vec<u8>, TransportError> {
        let mut session = self.lock();
        let result = self.run(&mut session, request, correlation_id);

        let event = match &result {
            Ok(response) => TransportEvent::Completed {
                response_len: response.len(),
            },
            Err(e) => TransportEvent::Failed {
                code: e.code(),
                message: e.to_string(),
            },
        };
        self.observer.on_event(correlation_id, &event);

        result
    }

    /// Open the device ahead of the first request.
    pub fn open(&self, correlation_id: &str) -> Result<(), TransportError> {
        self.lock().open(correlation_id)
    }

    /// Force a reopen, e.g. from a health check.
    pub fn reopen(&self, correlation_id: &str, reason: &TransportError) -> Result<(), TransportError> {
        self.lock().reopen(correlation_id, reason)
    }

    /// Whether a device handle is currently held. Never opens.
    pub fn is_open(&self) -> bool {
        self.lock().is_open()
    }

    /// Release the device until the next request.
    pub fn close(&self, correlation_id: &str) {
        self.lock().close(correlation_id);
    }

    fn lock(&self) -> MutexGuard<'_, DeviceSession<D>> {
        match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A request panicked mid-transaction; the device may hold a
                // half-written command, so start the next one from scratch.
                warn!("Device lock poisoned, closing session");
                let mut guard = poisoned.into_inner();
                guard.close("poisoned");
                self.session.clear_poison();
                guard
            }
        }
    }

    fn run(
        &self,
        session: &mut DeviceSession<D>,
        request: &[u8],
        correlation_id: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let mut phase = ProxyPhase::Idle;

        self.enter(correlation_id, &mut phase, ProxyPhase::Opening);
        if let Err(e) = session.open(correlation_id) {
            return Err(self.fail(correlation_id, &mut phase, e));
        }

        let mut reopens = 0u32;
        loop {
            self.enter(correlation_id, &mut phase, ProxyPhase::Writing);
            let fault = match session.write(request, correlation_id) {
                Ok(()) => {
                    self.enter(correlation_id, &mut phase, ProxyPhase::Reading);
                    match session.read(correlation_id) {
                        Ok(response) => {
                            self.enter(correlation_id, &mut phase, ProxyPhase::Done);
                            return Ok(response);
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            if !fault.is_recoverable() {
                // A timed-out or half-done transfer may still deliver its
                // response later; drop the handle so it cannot answer the
                // next request.
                session.close(correlation_id);
                return Err(self.fail(correlation_id, &mut phase, fault));
            }
            if !self.policy.allows(reopens) {
                session.close(correlation_id);
                let exhausted = TransportError::RetriesExhausted {
                    reopens,
                    last: Box::new(fault),
                };
                return Err(self.fail(correlation_id, &mut phase, exhausted));
            }

            reopens += 1;
            self.enter(correlation_id, &mut phase, ProxyPhase::Recovering);
            self.observer.on_event(
                correlation_id,
                &TransportEvent::Reopening {
                    attempt: reopens,
                    reason: fault.to_string(),
                },
            );
            if let Err(e) = session.reopen(correlation_id, &fault) {
                return Err(self.fail(correlation_id, &mut phase, e));
            }
        }
    }

    fn enter(&self, correlation_id: &str, phase: &mut ProxyPhase, to: ProxyPhase) {
        self.observer.on_event(
            correlation_id,
            &TransportEvent::PhaseChanged { from: *phase, to },
        );
        *phase = to;
    }

    fn fail(
        &self,
        correlation_id: &str,
        phase: &mut ProxyPhase,
        err: TransportError,
    ) -> TransportError {
        self.enter(correlation_id, phase, ProxyPhase::Failed);
        err
    }
}
