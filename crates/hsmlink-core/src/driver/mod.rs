//! Device driver layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{DriverCall, MockDriver, MockHandle};
pub use nusb::{NusbDriver, NusbHandle};
pub use traits::{DeviceDriver, TransportError};
