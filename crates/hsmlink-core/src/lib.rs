//! hsmlink-core: serialized, self-healing USB transport for a hardware
//! security module.
//!
//! This crate owns the single USB session to the device, lets exactly one
//! request at a time through, and reopens the device when the driver reports
//! a stale handle or session.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Status**: Native status codes and the recoverable/fatal classification
//! - **Driver**: Device access abstraction (nusb, mock)
//! - **Framing**: Bulk write with zero-length packet rule, truncating read
//! - **Session**: Owner of the device handle (open/close/reopen)
//! - **Proxy**: Lock, retry loop, public entry point
//! - **Events**: Observer pattern for front ends
//! - **Config**: TOML configuration
//!
//! # Example
//!
//! ```no_run
//! use hsmlink_core::{ConnectorConfig, DeviceSession, NusbDriver, TransportProxy};
//!
//! let config = ConnectorConfig::default();
//! let session = DeviceSession::new(NusbDriver::with_timeout(config.timeout()), config.identity());
//! let proxy = TransportProxy::new(session, config.retry_policy());
//!
//! let response = proxy.handle(&[0x06, 0x00, 0x00], "example").expect("request failed");
//! println!("{} bytes", response.len());
//! ```

pub mod config;
pub mod driver;
pub mod events;
pub mod framing;
pub mod identity;
pub mod proxy;
pub mod session;
pub mod status;

// Re-exports for convenience
pub use config::ConnectorConfig;
pub use driver::{DeviceDriver, MockDriver, NusbDriver, TransportError};
pub use events::{NullObserver, ProxyPhase, TracingObserver, TransportEvent, TransportObserver};
pub use framing::{MAX_PACKET_SIZE, RESPONSE_BUFFER_SIZE};
pub use identity::{DeviceIdentity, YUBICO_VENDOR_ID, YUBIHSM2_PRODUCT_ID};
pub use proxy::{RetryPolicy, TransportProxy};
pub use session::{DeviceSession, SessionState};
pub use status::{Disposition, StatusCode, classify};
