//! Which physical device the session talks to.

use std::fmt;

/// Yubico vendor ID.
pub const YUBICO_VENDOR_ID: u16 = 0x1050;
/// YubiHSM 2 product ID.
pub const YUBIHSM2_PRODUCT_ID: u16 = 0x0030;

/// Vendor/product IDs plus an optional serial-number filter.
///
/// Fixed at configuration time. With a serial set, only the unit whose USB
/// serial string matches exactly is opened; otherwise the first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    vendor_id: u16,
    product_id: u16,
    serial: Option<String>,
}

impl DeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16, serial: Option<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            serial: serial
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::new(YUBICO_VENDOR_ID, YUBIHSM2_PRODUCT_ID, None)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)?;
        if let Some(serial) = &self.serial {
            write!(f, " serial={}", serial)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_serial_is_none() {
        let id = DeviceIdentity::new(0x1050, 0x0030, Some("  ".into()));
        assert_eq!(id.serial(), None);

        let id = DeviceIdentity::new(0x1050, 0x0030, Some(" 0001234567 ".into()));
        assert_eq!(id.serial(), Some("0001234567"));
    }

    #[test]
    fn test_display() {
        assert_eq!(DeviceIdentity::default().to_string(), "1050:0030");
        let id = DeviceIdentity::new(0x1050, 0x0030, Some("42".into()));
        assert_eq!(id.to_string(), "1050:0030 serial=42");
    }
}
