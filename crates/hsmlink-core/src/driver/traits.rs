//! Device driver abstraction.
//!
//! Defines the `DeviceDriver` trait for native device access,
//! allowing different implementations (nusb, mock, etc.).

use thiserror::Error;

use crate::status::{Disposition, StatusCode, classify};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("{message}: {code}")]
    Status { code: StatusCode, message: String },

    #[error("Device not found: VID={vendor_id:04X} PID={product_id:04X} serial={}", .serial.as_deref().unwrap_or("any"))]
    DeviceNotFound {
        vendor_id: u16,
        product_id: u16,
        serial: Option<String>,
    },

    #[error("Giving up after {reopens} reopens: {last}")]
    RetriesExhausted {
        reopens: u32,
        last: Box<TransportError>,
    },
}

impl TransportError {
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// Status code carried by this error, for classification and diagnostics.
    pub fn code(&self) -> StatusCode {
        match self {
            Self::Status { code, .. } => *code,
            Self::DeviceNotFound { .. } => StatusCode::ObjectNotFound,
            Self::RetriesExhausted { last, .. } => last.code(),
        }
    }

    /// Decide whether a reopen can fix this error.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Status { code, .. } => classify(*code),
            Self::DeviceNotFound { .. } | Self::RetriesExhausted { .. } => Disposition::Fatal,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.disposition() == Disposition::Recoverable
    }
}

/// Native device access.
///
/// A handle is owned by the caller between `open` and `close`; `close`
/// consumes it so a released handle can never be reused.
pub trait DeviceDriver: Send {
    type Handle: Send;

    /// Open the first device matching the IDs and, if given, the exact serial.
    ///
    /// `Ok(None)` means the enumeration succeeded but nothing matched.
    fn open(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
    ) -> Result<Option<Self::Handle>, TransportError>;

    /// Release a handle.
    fn close(&self, handle: Self::Handle);

    /// Reset the device's pipes in place without re-enumerating it. The
    /// session closes the handle afterwards either way.
    fn reset(&self, handle: &Self::Handle) -> Result<(), TransportError>;

    /// One bulk OUT transfer. An empty slice sends a zero-length packet.
    fn write(&self, handle: &Self::Handle, data: &[u8]) -> Result<usize, TransportError>;

    /// One bulk IN transfer into `buf`, returning the number of bytes received.
    fn read(&self, handle: &Self::Handle, buf: &mut [u8]) -> Result<usize, TransportError>;
}
