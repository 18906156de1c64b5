mod monome128;
mod monome64;

use std::{fmt, sync::Arc};

use log::debug;

use crate::{tester::Tester, GridError, KeyEvent};

pub use monome128::Monome128;
pub use monome64::{mirror, Monome64};

/// Status bytes the usb serial bridge puts in front of every frame it
/// returns.
pub(crate) const HEADER_LEN: usize = 2;

/// Raw byte access the protocols read frames from and write commands to.
pub trait Port {
    fn read(&self, buf: &mut [u8]) -> Result<usize, GridError>;

    fn write(&self, buf: &[u8]) -> Result<usize, GridError>;

    fn max_packet_size(&self) -> usize;
}

/// The wire protocol of a connection, chosen once when the device answers
/// the generation probe.
#[derive(Clone)]
pub enum Protocol {
    Monome64,
    Monome128,
    Tester(Arc<dyn Tester>),
}

impl Protocol {
    pub fn name(&self) -> String {
        match self {
            Self::Monome64 => Monome64::NAME.to_owned(),
            Self::Monome128 => Monome128::NAME.to_owned(),
            Self::Tester(tester) => tester.name(),
        }
    }

    pub fn rows(&self) -> u8 {
        match self {
            Self::Monome64 => Monome64::ROWS,
            Self::Monome128 => Monome128::ROWS,
            Self::Tester(tester) => tester.rows(),
        }
    }

    pub fn cols(&self) -> u8 {
        match self {
            Self::Monome64 => Monome64::COLS,
            Self::Monome128 => Monome128::COLS,
            Self::Tester(tester) => tester.cols(),
        }
    }

    pub fn set(&self, port: &dyn Port, x: u8, y: u8, brightness: u8) -> Result<(), GridError> {
        let result = match self {
            Self::Monome64 => port.write(&Monome64::encode(x, y, brightness)).map(|_| ()),
            Self::Monome128 => port.write(&Monome128::encode(x, y, brightness)).map(|_| ()),
            Self::Tester(tester) => tester.set(x, y, brightness),
        };
        result.map_err(|source| {
            GridError::device(
                self.name(),
                x,
                y,
                format!("set brightness to {brightness}"),
                source,
            )
        })
    }

    /// Reads one frame and decodes the key events it carries.
    pub fn read_events(&self, port: &dyn Port) -> Result<Vec<KeyEvent>, GridError> {
        let decode: fn(&[u8]) -> Vec<KeyEvent> = match self {
            Self::Monome64 => Monome64::decode,
            Self::Monome128 => Monome128::decode,
            Self::Tester(tester) => return Ok(tester.get()?.into_iter().collect()),
        };

        let mut frame = vec![0; port.max_packet_size()];
        let read = port.read(&mut frame).map_err(|source| GridError::Read {
            device: self.name(),
            source: Box::new(source),
        })?;
        let frame = &frame[..read];
        if read > HEADER_LEN {
            debug!("{} frame: {:02X?}", self.name(), frame);
        }

        Ok(decode(frame))
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Protocol({})", self.name())
    }
}
