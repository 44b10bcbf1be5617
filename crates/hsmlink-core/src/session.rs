//! Device session - owns the single device handle.
//!
//! `DeviceSession` is not synchronized. `TransportProxy` wraps it in a mutex
//! and every state change happens through `&mut self`, so a caller must
//! already hold that lock.

use tracing::{debug, error, info, instrument};

use crate::driver::{DeviceDriver, TransportError};
use crate::framing::{read_response, write_framed};
use crate::identity::DeviceIdentity;
use crate::status::StatusCode;

/// Whether a device handle is held.
#[derive(Debug)]
pub enum SessionState<H> {
    Closed,
    Open(H),
}

impl<H> Default for SessionState<H> {
    fn default() -> Self {
        Self::Closed
    }
}

/// One device, one handle.
pub struct DeviceSession<D: DeviceDriver> {
    driver: D,
    identity: DeviceIdentity,
    state: SessionState<D::Handle>,
}

impl<D: DeviceDriver> DeviceSession<D> {
    /// Create a closed session. Nothing is opened until the first request.
    pub fn new(driver: D, identity: DeviceIdentity) -> Self {
        Self {
            driver,
            identity,
            state: SessionState::Closed,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open(_))
    }

    /// Open the configured device. Does nothing if a handle is already held.
    #[instrument(level = "debug", skip(self), fields(device = %self.identity))]
    pub fn open(&mut self, correlation_id: &str) -> Result<(), TransportError> {
        if self.is_open() {
            debug!(correlation_id, "usb context already open");
            return Ok(());
        }

        let handle = self
            .driver
            .open(
                self.identity.vendor_id(),
                self.identity.product_id(),
                self.identity.serial(),
            )?
            .ok_or_else(|| TransportError::DeviceNotFound {
                vendor_id: self.identity.vendor_id(),
                product_id: self.identity.product_id(),
                serial: self.identity.serial().map(str::to_string),
            })?;

        info!(correlation_id, "usb context opened");
        self.state = SessionState::Open(handle);
        Ok(())
    }

    /// Release the handle, if any. Always leaves the session closed.
    pub fn close(&mut self, correlation_id: &str) {
        if let SessionState::Open(handle) = std::mem::take(&mut self.state) {
            debug!(correlation_id, "closing usb context");
            self.driver.close(handle);
        }
    }

    /// Reset, close and open again.
    ///
    /// The reset is best effort: its failure is logged and the close/open
    /// still happens. Returns the result of the open.
    pub fn reopen(
        &mut self,
        correlation_id: &str,
        reason: &TransportError,
    ) -> Result<(), TransportError> {
        debug!(correlation_id, why = %reason, "reopening usb context");

        // The first request may be a forced reopen before anything was opened.
        if let SessionState::Open(handle) = &self.state
            && let Err(e) = self.driver.reset(handle)
        {
            error!(correlation_id, error = %e, "unable to reset device");
        }

        self.close(correlation_id);
        self.open(correlation_id)
    }

    /// Send one framed request on the current handle.
    pub fn write(&self, request: &[u8], correlation_id: &str) -> Result<(), TransportError> {
        write_framed(&self.driver, self.handle()?, request, correlation_id)
    }

    /// Receive one response on the current handle.
    pub fn read(&self, correlation_id: &str) -> Result<Vec<u8>, TransportError> {
        read_response(&self.driver, self.handle()?, correlation_id)
    }

    fn handle(&self) -> Result<&D::Handle, TransportError> {
        match &self.state {
            SessionState::Open(handle) => Ok(handle),
            SessionState::Closed => Err(TransportError::status(
                StatusCode::InvalidHandle,
                "usb context is not open",
            )),
        }
    }
}

impl<D: DeviceDriver> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        self.close("shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverCall, MockDriver};

    fn session(mock: &MockDriver) -> DeviceSession<MockDriver> {
        DeviceSession::new(mock.clone(), DeviceIdentity::default())
    }

    #[test]
    fn test_open_is_idempotent() {
        let mock = MockDriver::new();
        let mut session = session(&mock);

        session.open("a").unwrap();
        session.open("b").unwrap();

        assert!(session.is_open());
        assert_eq!(mock.open_count(), 1);
        assert_eq!(mock.open_handles(), 1);
    }

    #[test]
    fn test_open_no_device() {
        let mock = MockDriver::new();
        mock.queue_open_missing();
        let mut session = DeviceSession::new(
            mock.clone(),
            DeviceIdentity::new(0x1050, 0x0030, Some("0007550001".into())),
        );

        let err = session.open("t").unwrap_err();
        assert_eq!(
            err,
            TransportError::DeviceNotFound {
                vendor_id: 0x1050,
                product_id: 0x0030,
                serial: Some("0007550001".into()),
            }
        );
        assert!(!session.is_open());
    }

    #[test]
    fn test_open_driver_error() {
        let mock = MockDriver::new();
        mock.queue_open_error(StatusCode::SharingViolation);
        let mut session = session(&mock);

        let err = session.open("t").unwrap_err();
        assert_eq!(err.code(), StatusCode::SharingViolation);
        assert!(!session.is_open());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mock = MockDriver::new();
        let mut session = session(&mock);

        session.close("t");
        session.open("t").unwrap();
        session.close("t");
        session.close("t");

        assert!(!session.is_open());
        assert_eq!(mock.close_count(), 1);
        assert_eq!(mock.open_handles(), 0);
    }

    #[test]
    fn test_reopen_resets_closes_opens() {
        let mock = MockDriver::new();
        let mut session = session(&mock);
        session.open("t").unwrap();

        let why = TransportError::status(StatusCode::InvalidState, "Write failed");
        session.reopen("t", &why).unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                DriverCall::Open,
                DriverCall::Reset(1),
                DriverCall::Close(1),
                DriverCall::Open,
            ]
        );
        assert_eq!(mock.open_handles(), 1);
    }

    #[test]
    fn test_reopen_tolerates_reset_failure() {
        let mock = MockDriver::new();
        let mut session = session(&mock);
        session.open("t").unwrap();
        mock.fail_next_reset(StatusCode::GenFailure);

        let why = TransportError::status(StatusCode::InvalidHandle, "Read failed");
        session.reopen("t", &why).unwrap();

        assert!(session.is_open());
        assert_eq!(mock.reset_count(), 1);
        assert_eq!(mock.close_count(), 1);
        assert_eq!(mock.open_count(), 2);
    }

    #[test]
    fn test_reopen_when_closed_skips_reset() {
        let mock = MockDriver::new();
        let mut session = session(&mock);

        let why = TransportError::status(StatusCode::InvalidState, "health check");
        session.reopen("t", &why).unwrap();

        assert_eq!(mock.calls(), vec![DriverCall::Open]);
    }

    #[test]
    fn test_reopen_open_failure() {
        let mock = MockDriver::new();
        let mut session = session(&mock);
        session.open("t").unwrap();
        mock.queue_open_missing();

        let why = TransportError::status(StatusCode::InvalidState, "Write failed");
        let err = session.reopen("t", &why).unwrap_err();
        assert!(matches!(err, TransportError::DeviceNotFound { .. }));
        assert!(!session.is_open());
    }

    #[test]
    fn test_io_on_closed_session() {
        let mock = MockDriver::new();
        let session = session(&mock);

        let err = session.write(b"req", "t").unwrap_err();
        assert_eq!(err.code(), StatusCode::InvalidHandle);
        assert!(err.is_recoverable());
        assert!(session.read("t").is_err());
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_drop_closes_handle() {
        let mock = MockDriver::new();
        {
            let mut session = session(&mock);
            session.open("t").unwrap();
        }
        assert_eq!(mock.open_handles(), 0);
    }
}
