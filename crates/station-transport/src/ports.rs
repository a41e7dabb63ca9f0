use crate::{DriverError, PortInfo, Result};
use serialport::SerialPortType;

/// Serial ports the console might be attached to. USB adapters are listed
/// with their product string when the OS reports one.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let mut out = Vec::new();
    for p in serialport::available_ports().map_err(|e| DriverError::Io(e.to_string()))? {
        let kind = match p.port_type {
            SerialPortType::UsbPort(usb) => match usb.product {
                Some(product) => format!("usb ({product})"),
                None => "usb".to_string(),
            },
            SerialPortType::BluetoothPort => "bluetooth".to_string(),
            SerialPortType::PciPort => "pci".to_string(),
            SerialPortType::Unknown => "serial".to_string(),
        };
        out.push(PortInfo {
            name: p.port_name,
            kind,
        });
    }
    Ok(out)
}
