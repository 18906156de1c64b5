use std::{
    fmt::Write as _,
    io::{self, Read, Write},
    time::Duration,
};

use log::{debug, info};
use rusb::{Device, DeviceHandle, GlobalContext};
use serde::{Deserialize, Serialize};

use crate::GridError;

pub const VENDOR_ID: &str = "0403";
pub const PRODUCT_ID: &str = "6001";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub address: u8,
    pub max_packet_size: u16,
}

/// Byte-level link to one physical grid: a read endpoint, a write endpoint
/// and the handle that has to be released when the connection closes.
pub trait Transport: Read + Write + Send {
    fn reader(&self) -> EndpointInfo;

    fn writer(&self) -> EndpointInfo;

    fn max_packet_size(&self) -> usize {
        usize::from(self.reader().max_packet_size)
    }

    fn release(&mut self) -> Result<(), GridError>;
}

pub struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
    interface: u8,
    reader: EndpointInfo,
    writer: EndpointInfo,
    timeout: Duration,
}

impl UsbTransport {
    /// Opens the bulk endpoints of the first configuration, interface and
    /// alternate setting: endpoint 0 reads, endpoint 1 writes.
    pub fn open(device: &Device<GlobalContext>, timeout: Duration) -> Result<Self, GridError> {
        let config = device.config_descriptor(0)?;
        let config_number = config.number();
        let Some(setting) = config
            .interfaces()
            .next()
            .and_then(|interface| interface.descriptors().next())
        else {
            return Err(GridError::EndpointOpen {
                purpose: "usbReader",
                number: 0,
                config: config_number,
                interface: 0,
                setup: 0,
                endpoint: None,
                source: rusb::Error::NotFound,
            });
        };
        let interface = setting.interface_number();
        let setup = setting.setting_number();
        let open_error = |purpose: &'static str,
                          number: u8,
                          endpoint: Option<EndpointInfo>,
                          source: rusb::Error| GridError::EndpointOpen {
            purpose,
            number,
            config: config_number,
            interface,
            setup,
            endpoint,
            source,
        };

        let mut endpoints = setting
            .endpoint_descriptors()
            .map(|endpoint| EndpointInfo {
                address: endpoint.address(),
                max_packet_size: endpoint.max_packet_size(),
            });
        let reader = endpoints
            .next()
            .ok_or_else(|| open_error("usbReader", 0, None, rusb::Error::NotFound))?;
        let writer = endpoints.next();

        let mut handle = device
            .open()
            .map_err(|e| open_error("usbReader", 0, Some(reader), e))?;
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }
        handle
            .claim_interface(interface)
            .map_err(|e| open_error("usbReader", 0, Some(reader), e))?;

        let Some(writer) = writer else {
            let _ = handle.release_interface(interface);
            return Err(open_error("usbWriter", 1, None, rusb::Error::NotFound));
        };

        debug!(
            "Opened usb endpoints {:#04x} (read) and {:#04x} (write) on bus {} address {}",
            reader.address,
            writer.address,
            device.bus_number(),
            device.address()
        );

        Ok(Self {
            handle,
            interface,
            reader,
            writer,
            timeout,
        })
    }
}

impl Read for UsbTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.handle.read_bulk(self.reader.address, buf, self.timeout) {
            Ok(read) => Ok(read),
            Err(rusb::Error::Timeout) => Ok(0),
            Err(e) => Err(io::Error::other(e)),
        }
    }
}

impl Write for UsbTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle
            .write_bulk(self.writer.address, buf, self.timeout)
            .map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for UsbTransport {
    fn reader(&self) -> EndpointInfo {
        self.reader
    }

    fn writer(&self) -> EndpointInfo {
        self.writer
    }

    fn release(&mut self) -> Result<(), GridError> {
        self.handle.release_interface(self.interface)?;
        Ok(())
    }
}

/// Lists the USB devices with the given vendor and product ids (hex strings).
/// Empty strings select [`VENDOR_ID`] and [`PRODUCT_ID`].
pub fn usb_devices(
    vendor_id: &str,
    product_id: &str,
) -> Result<Vec<Device<GlobalContext>>, GridError> {
    let vendor_id = parse_id(vendor_id, VENDOR_ID)?;
    let product_id = parse_id(product_id, PRODUCT_ID)?;
    let devices = rusb::devices().map_err(GridError::UsbAccess)?;

    Ok(devices
        .iter()
        .filter(|device| match device.device_descriptor() {
            Ok(descriptor) => {
                descriptor.class_code() == 0
                    && descriptor.vendor_id() == vendor_id
                    && descriptor.product_id() == product_id
            }
            Err(e) => {
                debug!(
                    "Skipping usb device on bus {} address {}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                false
            }
        })
        .inspect(|device| {
            info!(
                "Found usb device on bus {} address {}",
                device.bus_number(),
                device.address()
            )
        })
        .collect())
}

fn parse_id(id: &str, default: &str) -> Result<u16, GridError> {
    let id = if id.is_empty() { default } else { id };
    let digits = id.strip_prefix("0x").unwrap_or(id);
    u16::from_str_radix(digits, 16).map_err(|_| GridError::InvalidId(id.to_owned()))
}

/// Renders the descriptors of a usb device, down to its endpoints.
pub fn describe(device: &Device<GlobalContext>) -> Result<String, GridError> {
    let descriptor = device.device_descriptor()?;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Bus: {} Address: {} VendorID: {:04x} ProductID: {:04x} Class: {} SubClass: {} Protocol: {} USB: {}",
        device.bus_number(),
        device.address(),
        descriptor.vendor_id(),
        descriptor.product_id(),
        descriptor.class_code(),
        descriptor.sub_class_code(),
        descriptor.protocol_code(),
        descriptor.usb_version(),
    );

    for index in 0..descriptor.num_configurations() {
        let config = device.config_descriptor(index)?;
        let _ = writeln!(
            out,
            "\tconfig {} (max power {} mA)",
            config.number(),
            config.max_power()
        );
        for interface in config.interfaces() {
            let _ = writeln!(out, "\t\tinterface {}", interface.number());
            for setting in interface.descriptors() {
                let _ = writeln!(
                    out,
                    "\t\t\tsetup {} class: {} subclass: {} protocol: {}",
                    setting.setting_number(),
                    setting.class_code(),
                    setting.sub_class_code(),
                    setting.protocol_code(),
                );
                for endpoint in setting.endpoint_descriptors() {
                    let _ = writeln!(
                        out,
                        "\t\t\t\tendpoint {} address: {:#04x} direction: {:?} transfer: {:?} max packet size: {} interval: {}",
                        endpoint.number(),
                        endpoint.address(),
                        endpoint.direction(),
                        endpoint.transfer_type(),
                        endpoint.max_packet_size(),
                        endpoint.interval(),
                    );
                }
            }
        }
    }

    Ok(out)
}
