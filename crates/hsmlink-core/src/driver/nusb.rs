//! nusb-based device driver implementation.

use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, In, Out, TransferError};
use nusb::{Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{DeviceDriver, TransportError};
use crate::status::StatusCode;

/// Default per-transfer timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for a cancelled transfer to drain.
const CANCEL_GRACE: Duration = Duration::from_millis(100);

/// Open device and its claimed interface.
pub struct NusbHandle {
    interface: Interface,
    in_endpoint: u8,
    out_endpoint: u8,
}

/// nusb-based driver.
pub struct NusbDriver {
    timeout: Duration,
}

impl NusbDriver {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn open_device_info(device_info: nusb::DeviceInfo) -> Result<NusbHandle, TransportError> {
        info!(
            vendor_id = %format!("{:04X}", device_info.vendor_id()),
            product_id = %format!("{:04X}", device_info.product_id()),
            serial = device_info.serial_number().unwrap_or(""),
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| map_nusb_error(e, "Failed to open device"))?;

        let interface = device
            .claim_interface(0)
            .wait()
            .map_err(|e| map_nusb_error(e, "Failed to claim interface 0"))?;

        // Find BULK endpoints
        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() == 0 {
                    for alt in iface.alt_settings() {
                        for ep in alt.endpoints() {
                            if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                                if ep.direction() == nusb::transfer::Direction::In {
                                    in_endpoint = ep.address();
                                } else {
                                    out_endpoint = ep.address();
                                }
                            }
                        }
                    }
                }
            }
        }

        if in_endpoint == 0 || out_endpoint == 0 {
            return Err(TransportError::status(
                StatusCode::NotSupported,
                "Bulk IN/OUT endpoints not found",
            ));
        }

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "Device opened successfully"
        );

        Ok(NusbHandle {
            interface,
            in_endpoint,
            out_endpoint,
        })
    }

    fn timed_out(&self, what: &str) -> TransportError {
        warn!(timeout_ms = self.timeout.as_millis() as u64, "{} timed out", what);
        TransportError::status(StatusCode::Timeout, format!("{} timed out", what))
    }
}

impl Default for NusbDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDriver for NusbDriver {
    type Handle = NusbHandle;

    #[instrument(level = "info", skip(self), fields(vid = format!("{:04X}", vendor_id), pid = format!("{:04X}", product_id)))]
    fn open(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
    ) -> Result<Option<NusbHandle>, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| map_nusb_error(e, "Failed to enumerate devices"))?
            .find(|d| {
                d.vendor_id() == vendor_id
                    && d.product_id() == product_id
                    && serial.is_none_or(|s| d.serial_number() == Some(s))
            });

        match device_info {
            Some(info) => Self::open_device_info(info).map(Some),
            None => {
                debug!("No matching device");
                Ok(None)
            }
        }
    }

    fn close(&self, handle: NusbHandle) {
        debug!("Releasing device");
        drop(handle);
    }

    /// Clear halt on both bulk pipes. A port reset would re-enumerate the
    /// device and race the reopen that follows, so the pipes are reset in place.
    fn reset(&self, handle: &NusbHandle) -> Result<(), TransportError> {
        let mut out_ep = handle
            .interface
            .endpoint::<Bulk, Out>(handle.out_endpoint)
            .map_err(|e| map_nusb_error(e, "Failed to reset OUT pipe"))?;
        out_ep
            .clear_halt()
            .wait()
            .map_err(|e| map_nusb_error(e, "Failed to reset OUT pipe"))?;

        let mut in_ep = handle
            .interface
            .endpoint::<Bulk, In>(handle.in_endpoint)
            .map_err(|e| map_nusb_error(e, "Failed to reset IN pipe"))?;
        in_ep
            .clear_halt()
            .wait()
            .map_err(|e| map_nusb_error(e, "Failed to reset IN pipe"))?;

        debug!("Bulk pipes reset");
        Ok(())
    }

    #[instrument(skip(self, handle, data), fields(len = data.len()))]
    fn write(&self, handle: &NusbHandle, data: &[u8]) -> Result<usize, TransportError> {
        let mut ep = handle
            .interface
            .endpoint::<Bulk, Out>(handle.out_endpoint)
            .map_err(|e| map_nusb_error(e, "Write failed"))?;

        ep.submit(Buffer::from(data.to_vec()));
        let Some(completion) = ep.wait_next_complete(self.timeout) else {
            ep.cancel_all();
            let _ = ep.wait_next_complete(CANCEL_GRACE);
            return Err(self.timed_out("Write"));
        };
        completion
            .status
            .map_err(|e| map_transfer_error(e, "Write"))?;

        debug!(bytes_written = completion.actual_len, "Write complete");
        Ok(completion.actual_len)
    }

    #[instrument(skip(self, handle, buf), fields(max_len = buf.len()))]
    fn read(&self, handle: &NusbHandle, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut ep = handle
            .interface
            .endpoint::<Bulk, In>(handle.in_endpoint)
            .map_err(|e| map_nusb_error(e, "Read failed"))?;

        // IN requests must be a whole number of packets.
        let mps = ep.max_packet_size().max(1);
        let requested = buf.len().div_ceil(mps) * mps;
        let mut buffer = Buffer::new(requested);
        buffer.set_requested_len(requested);

        ep.submit(buffer);
        let Some(completion) = ep.wait_next_complete(self.timeout) else {
            ep.cancel_all();
            let _ = ep.wait_next_complete(CANCEL_GRACE);
            return Err(self.timed_out("Read"));
        };
        completion
            .status
            .map_err(|e| map_transfer_error(e, "Read"))?;

        let n = completion
            .actual_len
            .min(buf.len())
            .min(completion.buffer.len());
        buf[..n].copy_from_slice(&completion.buffer[..n]);

        debug!(bytes_read = n, "Read complete");
        Ok(n)
    }
}

fn map_nusb_error(err: nusb::Error, what: &str) -> TransportError {
    let code = match err.kind() {
        nusb::ErrorKind::Disconnected => StatusCode::InvalidHandle,
        nusb::ErrorKind::Busy => StatusCode::SharingViolation,
        nusb::ErrorKind::PermissionDenied => StatusCode::AccessDenied,
        nusb::ErrorKind::NotFound => StatusCode::ObjectNotFound,
        nusb::ErrorKind::Unsupported => StatusCode::NotSupported,
        _ => StatusCode::GenFailure,
    };
    TransportError::status(code, format!("{}: {}", what, err))
}

fn map_transfer_error(err: TransferError, what: &str) -> TransportError {
    let code = match err {
        TransferError::Disconnected => StatusCode::InvalidHandle,
        TransferError::Stall => StatusCode::BadCommand,
        TransferError::Cancelled => StatusCode::Timeout,
        TransferError::InvalidArgument => StatusCode::InvalidParameter,
        TransferError::Unknown(raw) => StatusCode::Other(raw),
        _ => StatusCode::GenFailure,
    };
    TransportError::status(code, format!("{} failed: {}", what, err))
}
