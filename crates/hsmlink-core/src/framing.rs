//! Bulk transfer framing.
//!
//! A request goes out as one bulk transfer. When its length is a whole number
//! of packets the device cannot see where it ends, so a zero-length packet
//! follows. Responses are read into a fixed buffer and cut to what arrived.

use tracing::debug;

use crate::driver::{DeviceDriver, TransportError};
use crate::status::StatusCode;

/// Bulk endpoint max packet size.
pub const MAX_PACKET_SIZE: usize = 64;
/// Receive buffer for one response.
pub const RESPONSE_BUFFER_SIZE: usize = 8192;

/// Bytes of payload shown in debug logs.
const PREVIEW_LEN: usize = 32;

fn preview(data: &[u8]) -> String {
    hex::encode(&data[..data.len().min(PREVIEW_LEN)])
}

/// Write `data` as one transfer, plus a zero-length packet when
/// `data.len()` is a multiple of [`MAX_PACKET_SIZE`].
pub fn write_framed<D: DeviceDriver>(
    driver: &D,
    handle: &D::Handle,
    data: &[u8],
    correlation_id: &str,
) -> Result<(), TransportError> {
    if data.is_empty() {
        return Err(TransportError::status(
            StatusCode::InvalidParameter,
            "Refusing to send an empty request",
        ));
    }

    let result = driver.write(handle, data).and_then(|n| {
        if n != data.len() {
            return Err(TransportError::status(
                StatusCode::GenFailure,
                format!("Short write: {} of {} bytes", n, data.len()),
            ));
        }
        if data.len() % MAX_PACKET_SIZE == 0 {
            driver.write(handle, &[])?;
        }
        Ok(n)
    });

    debug!(
        correlation_id,
        len = data.len(),
        n = result.as_ref().copied().unwrap_or(0),
        err = ?result.as_ref().err(),
        buf = %preview(data),
        "usb endpoint write"
    );

    result.map(|_| ())
}

/// Read one response, truncated to the byte count the driver reports.
pub fn read_response<D: DeviceDriver>(
    driver: &D,
    handle: &D::Handle,
    correlation_id: &str,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = vec![0u8; RESPONSE_BUFFER_SIZE];
    let result = driver.read(handle, &mut buf);

    if let Ok(n) = result {
        buf.truncate(n);
    }
    let received: &[u8] = if result.is_ok() { &buf } else { &[] };

    debug!(
        correlation_id,
        n = result.as_ref().copied().unwrap_or(0),
        err = ?result.as_ref().err(),
        buf = %preview(received),
        "usb endpoint read"
    );

    result.map(|_| buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockDriver, MockHandle};

    fn open(mock: &MockDriver) -> MockHandle {
        mock.open(0x1050, 0x0030, None).unwrap().unwrap()
    }

    #[test]
    fn test_packet_multiple_sends_zlp() {
        for len in [64, 128, 8192] {
            let mock = MockDriver::new();
            let handle = open(&mock);
            let data = vec![0x5A; len];
            write_framed(&mock, &handle, &data, "t").unwrap();

            let writes = mock.writes();
            assert_eq!(writes.len(), 2, "len {len}");
            assert_eq!(writes[0], data);
            assert!(writes[1].is_empty());
        }
    }

    #[test]
    fn test_other_lengths_single_write() {
        for len in [1, 3, 63, 65, 127, 1000] {
            let mock = MockDriver::new();
            let handle = open(&mock);
            write_framed(&mock, &handle, &vec![1; len], "t").unwrap();
            assert_eq!(mock.writes().len(), 1, "len {len}");
        }
    }

    #[test]
    fn test_empty_request_rejected() {
        let mock = MockDriver::new();
        let handle = open(&mock);
        let err = write_framed(&mock, &handle, &[], "t").unwrap_err();
        assert_eq!(err.code(), StatusCode::InvalidParameter);
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_failed_payload_skips_zlp() {
        let mock = MockDriver::new();
        let handle = open(&mock);
        mock.queue_write_error(StatusCode::InvalidState);
        let err = write_framed(&mock, &handle, &[0; 64], "t").unwrap_err();
        assert_eq!(err.code(), StatusCode::InvalidState);
        assert_eq!(mock.writes().len(), 1);
    }

    #[test]
    fn test_short_write_is_error() {
        let mock = MockDriver::new();
        let handle = open(&mock);
        mock.queue_short_write(10);
        let err = write_framed(&mock, &handle, &[0; 64], "t").unwrap_err();
        assert_eq!(err.code(), StatusCode::GenFailure);
        assert_eq!(mock.writes().len(), 1);
    }

    #[test]
    fn test_read_truncates_to_reported_len() {
        let mock = MockDriver::new();
        let handle = open(&mock);
        let payload: Vec<u8> = (0..RESPONSE_BUFFER_SIZE).map(|i| i as u8).collect();
        for n in 0..=RESPONSE_BUFFER_SIZE {
            mock.queue_response(&payload[..n]);
            let resp = read_response(&mock, &handle, "t").unwrap();
            assert_eq!(resp, &payload[..n], "reported {n} bytes");
        }
    }

    #[test]
    fn test_read_error_propagates() {
        let mock = MockDriver::new();
        let handle = open(&mock);
        mock.queue_read_error(StatusCode::OutOfMemory);
        let err = read_response(&mock, &handle, "t").unwrap_err();
        assert_eq!(err.code(), StatusCode::OutOfMemory);
    }
}
