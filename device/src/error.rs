use std::fmt;

use thiserror::Error;

use crate::usb::EndpointInfo;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("device {device:?} had the following error when trying to set {x}/{y} in order to {task}: {source}")]
    Device {
        device: String,
        x: u8,
        y: u8,
        task: String,
        #[source]
        source: Box<GridError>,
    },

    #[error("connection to device {device:?} is closed")]
    ConnectionClosed { device: String },

    #[error("{0}")]
    Aggregate(Errors),

    #[error("unknown monome kind (got {:02X?} ({}))", .response, String::from_utf8_lossy(.response))]
    UnknownDevice {
        response: Vec<u8>,
        reader: EndpointInfo,
        writer: EndpointInfo,
    },

    #[error("the following error happened while trying to connect to USB endpoint {number} as {purpose}: {source}")]
    EndpointOpen {
        purpose: &'static str,
        number: u8,
        config: u8,
        interface: u8,
        setup: u8,
        endpoint: Option<EndpointInfo>,
        #[source]
        source: rusb::Error,
    },

    #[error("when closing device {device:?} the following error occured: {source}")]
    Close {
        device: String,
        #[source]
        source: Box<GridError>,
    },

    #[error("when reading from device {device:?} the following error occured: {source}")]
    Read {
        device: String,
        #[source]
        source: Box<GridError>,
    },

    #[error("no member of row device {device:?} covers {x}/{y}")]
    OutOfRange { device: String, x: u8, y: u8 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("usb error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("cannot access usb devices: {0}")]
    UsbAccess(#[source] rusb::Error),

    #[error("invalid usb id {0:?}, expected four hex digits")]
    InvalidId(String),

    #[error("{0}")]
    Tester(String),
}

impl GridError {
    pub fn device(
        device: impl Into<String>,
        x: u8,
        y: u8,
        task: impl Into<String>,
        source: GridError,
    ) -> Self {
        Self::Device {
            device: device.into(),
            x,
            y,
            task: task.into(),
            source: Box::new(source),
        }
    }

    /// Replaces the task label of per-coordinate and aggregate errors; other
    /// kinds carry no label and are returned untouched.
    pub fn with_task(mut self, label: impl Into<String>) -> Self {
        match &mut self {
            Self::Device { task, .. } => *task = label.into(),
            Self::Aggregate(errors) => errors.task = label.into(),
            _ => {}
        }
        self
    }

    pub fn task(&self) -> Option<&str> {
        match self {
            Self::Device { task, .. } => Some(task),
            Self::Aggregate(errors) => Some(&errors.task),
            _ => None,
        }
    }
}

/// Collects every failure of a batch operation instead of stopping at the
/// first one.
#[derive(Debug, Default)]
pub struct Errors {
    pub task: String,
    pub errors: Vec<GridError>,
}

impl Errors {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            errors: Vec::new(),
        }
    }

    /// Single-cause aggregate, used to put a task description around the
    /// error that aborted an operation.
    pub fn wrap(task: impl Into<String>, error: GridError) -> GridError {
        GridError::Aggregate(Self {
            task: task.into(),
            errors: vec![error],
        })
    }

    pub fn add(&mut self, error: GridError) {
        self.errors.push(error);
    }

    pub fn push(&mut self, result: Result<(), GridError>) {
        if let Err(error) = result {
            self.add(error);
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GridError> {
        self.errors.iter()
    }

    pub fn into_result(self) -> Result<(), GridError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(GridError::Aggregate(self))
        }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} errors happened while trying to {}",
            self.len(),
            self.task
        )?;
        for error in &self.errors {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}
