use std::{
    io::{Read, Write},
    time::Duration,
};

use futures_util::future::join_all;
use log::{debug, info, warn};
use tokio::time;

use crate::{
    protocols::{Monome128, Monome64, Protocol},
    usb::{self, Transport, UsbTransport},
    Connection, ConnectionOptions, Device, Errors, GridError,
};

/// Asks a grid which generation it is. Both generations answer, but only
/// the 128 button one spells out its name.
pub const PROBE: [u8; 3] = [0x01, 0x00, 0x00];

const MONOME128_ANSWER: &[u8] = b"monome 128";
const MONOME64_ANSWER: u8 = 0x31;

/// Outcome of a scan: every device that could be connected, and why the
/// others could not.
pub struct Scan {
    pub connections: Vec<Connection>,
    pub failures: Errors,
}

impl Scan {
    pub fn into_parts(self) -> (Vec<Connection>, Option<GridError>) {
        (self.connections, self.failures.into_result().err())
    }
}

/// Classifies the answer to [`PROBE`].
pub fn identify(response: &[u8]) -> Option<Protocol> {
    if response.get(3..3 + MONOME128_ANSWER.len()) == Some(MONOME128_ANSWER) {
        Some(Protocol::Monome128)
    } else if response.first() == Some(&MONOME64_ANSWER) {
        Some(Protocol::Monome64)
    } else {
        None
    }
}

/// Sends the generation probe and waits `settle_delay` for the answer.
pub async fn probe(
    transport: &mut dyn Transport,
    settle_delay: Duration,
) -> Result<Protocol, GridError> {
    transport.write(&PROBE).map_err(|e| {
        Errors::wrap(
            "initial write to find out the kind of monome",
            GridError::Io(e),
        )
    })?;

    time::sleep(settle_delay).await;

    let mut response = vec![0; transport.max_packet_size().max(MONOME128_ANSWER.len() + 3)];
    let read = transport.read(&mut response).map_err(|e| {
        Errors::wrap(
            "initial read to find out the kind of monome",
            GridError::Io(e),
        )
    })?;
    response.truncate(read);
    debug!("Probe answer: {:02X?}", response);

    identify(&response).ok_or_else(|| GridError::UnknownDevice {
        response,
        reader: transport.reader(),
        writer: transport.writer(),
    })
}

/// Probes the grid behind `transport` and builds a connection speaking its
/// protocol. The transport is released if the probe fails.
pub async fn connect(
    mut transport: Box<dyn Transport>,
    options: &ConnectionOptions,
) -> Result<Connection, GridError> {
    match probe(transport.as_mut(), options.settle_delay).await {
        Ok(protocol) => {
            let connection = Connection::new(protocol, transport, options);
            info!(
                "Connected to {} ({} buttons)",
                connection.name(),
                connection.num_buttons()
            );
            Ok(connection)
        }
        Err(e) => {
            if let Err(release) = transport.release() {
                warn!("Could not release device after failed probe: {}", release);
            }
            Err(e)
        }
    }
}

/// Connects to every attached grid matching the vendor and product ids of
/// `options`. All devices are probed at once, so a scan takes about one
/// settle delay no matter how many grids are plugged in.
pub async fn connections(options: &ConnectionOptions) -> Result<Scan, GridError> {
    let devices = usb::usb_devices(&options.vendor_id, &options.product_id)?;
    debug!("Probing {} usb devices", devices.len());

    let attempts = devices.iter().map(|device| async move {
        let transport = UsbTransport::open(device, options.usb_timeout)?;
        connect(Box::new(transport), options).await
    });

    let mut scan = Scan {
        connections: Vec::new(),
        failures: Errors::new("connect to usb devices"),
    };
    for result in join_all(attempts).await {
        match result {
            Ok(connection) => scan.connections.push(connection),
            Err(e) => {
                warn!("Could not connect: {}", e);
                scan.failures.add(e);
            }
        }
    }
    Ok(scan)
}

/// Grid sizes by generation name, for callers that only know the name.
pub fn geometry(name: &str) -> Option<(u8, u8)> {
    match name {
        Monome64::NAME => Some((Monome64::ROWS, Monome64::COLS)),
        Monome128::NAME => Some((Monome128::ROWS, Monome128::COLS)),
        _ => None,
    }
}
