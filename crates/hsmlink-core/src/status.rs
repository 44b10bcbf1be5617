//! Native status codes and the recover-or-fail classification.
//!
//! Every driver failure is reduced to a [`StatusCode`]. [`classify`] is the
//! only place that decides whether a status is worth a reopen-and-retry.

use std::fmt;

/// Status code reported by a device driver call.
///
/// Values follow the Win32 error space used by WinUSB drivers, so codes from
/// native backends pass through unchanged and unknown ones survive as
/// [`StatusCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    AccessDenied,
    InvalidHandle,
    OutOfMemory,
    BadCommand,
    GenFailure,
    SharingViolation,
    NotSupported,
    InvalidParameter,
    Timeout,
    ObjectNotFound,
    InvalidState,
    Other(u32),
}

impl StatusCode {
    /// Map a raw native code to a status.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x0000 => Self::Success,
            0x0005 => Self::AccessDenied,
            0x0006 => Self::InvalidHandle,
            0x000E => Self::OutOfMemory,
            0x0016 => Self::BadCommand,
            0x001F => Self::GenFailure,
            0x0020 => Self::SharingViolation,
            0x0032 => Self::NotSupported,
            0x0057 => Self::InvalidParameter,
            0x0079 => Self::Timeout,
            0x10D8 => Self::ObjectNotFound,
            0x139F => Self::InvalidState,
            other => Self::Other(other),
        }
    }

    /// The raw native value.
    pub fn raw(&self) -> u32 {
        match self {
            Self::Success => 0x0000,
            Self::AccessDenied => 0x0005,
            Self::InvalidHandle => 0x0006,
            Self::OutOfMemory => 0x000E,
            Self::BadCommand => 0x0016,
            Self::GenFailure => 0x001F,
            Self::SharingViolation => 0x0020,
            Self::NotSupported => 0x0032,
            Self::InvalidParameter => 0x0057,
            Self::Timeout => 0x0079,
            Self::ObjectNotFound => 0x10D8,
            Self::InvalidState => 0x139F,
            Self::Other(raw) => *raw,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::AccessDenied => "access denied",
            Self::InvalidHandle => "invalid handle",
            Self::OutOfMemory => "out of memory",
            Self::BadCommand => "bad command",
            Self::GenFailure => "general failure",
            Self::SharingViolation => "sharing violation",
            Self::NotSupported => "not supported",
            Self::InvalidParameter => "invalid parameter",
            Self::Timeout => "timeout",
            Self::ObjectNotFound => "object not found",
            Self::InvalidState => "invalid state",
            Self::Other(_) => "unknown",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x} ({})", self.raw(), self.name())
    }
}

/// What the transport should do about a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// No error.
    Success,
    /// The handle or session is stale; reopen the device and retry.
    Recoverable,
    /// Surface the error to the caller without retrying.
    Fatal,
}

/// Classify a driver status.
///
/// Only invalid-state, invalid-handle and bad-command are recoverable.
pub fn classify(code: StatusCode) -> Disposition {
    match code {
        StatusCode::Success => Disposition::Success,
        StatusCode::InvalidState | StatusCode::InvalidHandle | StatusCode::BadCommand => {
            Disposition::Recoverable
        }
        _ => Disposition::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_codes() {
        assert_eq!(classify(StatusCode::InvalidState), Disposition::Recoverable);
        assert_eq!(classify(StatusCode::InvalidHandle), Disposition::Recoverable);
        assert_eq!(classify(StatusCode::BadCommand), Disposition::Recoverable);
    }

    #[test]
    fn test_fatal_codes() {
        for code in [
            StatusCode::OutOfMemory,
            StatusCode::ObjectNotFound,
            StatusCode::NotSupported,
            StatusCode::SharingViolation,
            StatusCode::GenFailure,
            StatusCode::InvalidParameter,
            StatusCode::AccessDenied,
            StatusCode::Timeout,
            StatusCode::Other(0xDEAD),
        ] {
            assert_eq!(classify(code), Disposition::Fatal, "{code}");
        }
    }

    #[test]
    fn test_success() {
        assert_eq!(classify(StatusCode::Success), Disposition::Success);
        assert!(StatusCode::from_raw(0).is_success());
    }

    #[test]
    fn test_raw_values() {
        assert_eq!(StatusCode::from_raw(0x139F), StatusCode::InvalidState);
        assert_eq!(StatusCode::from_raw(0x10D8), StatusCode::ObjectNotFound);
        assert_eq!(StatusCode::from_raw(0x1234), StatusCode::Other(0x1234));
        assert_eq!(StatusCode::Other(0x1234).raw(), 0x1234);
        assert_eq!(StatusCode::BadCommand.raw(), 0x16);
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusCode::InvalidHandle.to_string(), "0x6 (invalid handle)");
    }
}
