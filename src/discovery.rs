// Serial device discovery
// SPDX-License-Identifier: MPL-2.0
//
use serialport::SerialPortType;
use thiserror::Error;

/// USB interface description of the BP35A1 evaluation board's UART bridge.
const UART_PRODUCT: &str = "FT232R USB UART";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no {UART_PRODUCT} device found")]
    DeviceNotFound,
    #[error("enumerate serial ports: {0}")]
    Enumerate(#[from] serialport::Error),
}

/// Locate the radio module's tty by USB product string. The first matching
/// device node wins.
pub fn find_tty() -> Result<String, DiscoveryError> {
    let ports = serialport::available_ports()?;
    ports
        .into_iter()
        .find(|port| match &port.port_type {
            SerialPortType::UsbPort(usb) => product_matches(usb.product.as_deref()),
            _ => false,
        })
        .map(|port| port.port_name)
        .ok_or(DiscoveryError::DeviceNotFound)
}

// udev renders the interface string with underscores for spaces; accept both.
fn product_matches(product: Option<&str>) -> bool {
    product.is_some_and(|p| p == UART_PRODUCT || p == UART_PRODUCT.replace(' ', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_both_renderings() {
        assert!(product_matches(Some("FT232R USB UART")));
        assert!(product_matches(Some("FT232R_USB_UART")));
        assert!(!product_matches(Some("CP2102 USB to UART Bridge Controller")));
        assert!(!product_matches(None));
    }
}
