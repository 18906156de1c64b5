//! Fake grids for exercising connections without hardware.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::{Arc, Mutex},
};

use crate::{
    protocols::Protocol,
    usb::{EndpointInfo, Transport},
    Connection, ConnectionOptions, GridError, KeyEvent,
};

pub trait Tester: Send + Sync {
    /// Next key event, or `None` if nothing happened since the last poll.
    fn get(&self) -> Result<Option<KeyEvent>, GridError>;

    fn set(&self, x: u8, y: u8, brightness: u8) -> Result<(), GridError>;

    fn name(&self) -> String;

    fn rows(&self) -> u8;

    fn cols(&self) -> u8;

    fn close(&self) -> Result<(), GridError>;
}

/// Builds a connection that talks to `tester` instead of a usb device.
pub fn test_connection(tester: Arc<dyn Tester>, options: &ConnectionOptions) -> Connection {
    Connection::new(
        Protocol::Tester(tester.clone()),
        Box::new(TesterTransport { tester }),
        options,
    )
}

struct TesterTransport {
    tester: Arc<dyn Tester>,
}

impl Read for TesterTransport {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other("tester connections carry no raw bytes"))
    }
}

impl Write for TesterTransport {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::other("tester connections carry no raw bytes"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TesterTransport {
    fn reader(&self) -> EndpointInfo {
        EndpointInfo::default()
    }

    fn writer(&self) -> EndpointInfo {
        EndpointInfo::default()
    }

    fn release(&mut self) -> Result<(), GridError> {
        self.tester.close()
    }
}

type GetFn = Box<dyn Fn() -> Result<Option<KeyEvent>, GridError> + Send + Sync>;
type SetFn = Box<dyn Fn(u8, u8, u8) -> Result<(), GridError> + Send + Sync>;
type CloseFn = Box<dyn Fn() -> Result<(), GridError> + Send + Sync>;

/// Serves only `get`, for testing key events.
pub struct GetTester {
    rows: u8,
    cols: u8,
    get: GetFn,
}

impl GetTester {
    pub fn new(
        cols: u8,
        rows: u8,
        get: impl Fn() -> Result<Option<KeyEvent>, GridError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            rows,
            cols,
            get: Box::new(get),
        }
    }
}

impl Tester for GetTester {
    fn get(&self) -> Result<Option<KeyEvent>, GridError> {
        (self.get)()
    }

    fn set(&self, _x: u8, _y: u8, _brightness: u8) -> Result<(), GridError> {
        panic!("do not call me")
    }

    fn name(&self) -> String {
        "getTester".into()
    }

    fn rows(&self) -> u8 {
        self.rows
    }

    fn cols(&self) -> u8 {
        self.cols
    }

    fn close(&self) -> Result<(), GridError> {
        Ok(())
    }
}

/// Serves only `set`, for testing LED output.
pub struct SetTester {
    rows: u8,
    cols: u8,
    set: SetFn,
}

impl SetTester {
    pub fn new(
        cols: u8,
        rows: u8,
        set: impl Fn(u8, u8, u8) -> Result<(), GridError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            rows,
            cols,
            set: Box::new(set),
        }
    }
}

impl Tester for SetTester {
    fn get(&self) -> Result<Option<KeyEvent>, GridError> {
        panic!("do not call me")
    }

    fn set(&self, x: u8, y: u8, brightness: u8) -> Result<(), GridError> {
        (self.set)(x, y, brightness)
    }

    fn name(&self) -> String {
        "setTester".into()
    }

    fn rows(&self) -> u8 {
        self.rows
    }

    fn cols(&self) -> u8 {
        self.cols
    }

    fn close(&self) -> Result<(), GridError> {
        Ok(())
    }
}

/// Serves only `close`, for testing shutdown.
pub struct CloseTester {
    rows: u8,
    cols: u8,
    close: CloseFn,
}

impl CloseTester {
    pub fn new(
        cols: u8,
        rows: u8,
        close: impl Fn() -> Result<(), GridError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            rows,
            cols,
            close: Box::new(close),
        }
    }
}

impl Tester for CloseTester {
    fn get(&self) -> Result<Option<KeyEvent>, GridError> {
        panic!("do not call me")
    }

    fn set(&self, _x: u8, _y: u8, _brightness: u8) -> Result<(), GridError> {
        panic!("do not call me")
    }

    fn name(&self) -> String {
        "closeTester".into()
    }

    fn rows(&self) -> u8 {
        self.rows
    }

    fn cols(&self) -> u8 {
        self.cols
    }

    fn close(&self) -> Result<(), GridError> {
        (self.close)()
    }
}

type FailFn = Box<dyn Fn(u8, u8, u8) -> bool + Send + Sync>;

/// Records every `set` and replays queued key events, one per poll.
pub struct RecordingTester {
    name: String,
    rows: u8,
    cols: u8,
    sets: Mutex<Vec<(u8, u8, u8)>>,
    events: Mutex<VecDeque<KeyEvent>>,
    closes: Mutex<usize>,
    fail_when: Option<FailFn>,
}

impl RecordingTester {
    pub fn new(name: &str, cols: u8, rows: u8) -> Self {
        Self {
            name: name.to_owned(),
            rows,
            cols,
            sets: Mutex::new(Vec::new()),
            events: Mutex::new(VecDeque::new()),
            closes: Mutex::new(0),
            fail_when: None,
        }
    }

    /// Makes `set` fail, without recording, for every call matching
    /// `predicate`.
    pub fn fail_when(mut self, predicate: impl Fn(u8, u8, u8) -> bool + Send + Sync + 'static) -> Self {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    pub fn push_event(&self, x: u8, y: u8, down: bool) {
        lock(&self.events).push_back(KeyEvent { x, y, down });
    }

    pub fn sets(&self) -> Vec<(u8, u8, u8)> {
        lock(&self.sets).clone()
    }

    pub fn clear_sets(&self) {
        lock(&self.sets).clear();
    }

    pub fn closes(&self) -> usize {
        *lock(&self.closes)
    }
}

impl Tester for RecordingTester {
    fn get(&self) -> Result<Option<KeyEvent>, GridError> {
        Ok(lock(&self.events).pop_front())
    }

    fn set(&self, x: u8, y: u8, brightness: u8) -> Result<(), GridError> {
        if self.fail_when.as_ref().is_some_and(|fail| fail(x, y, brightness)) {
            return Err(GridError::Tester(format!("{} refused {x}/{y}", self.name)));
        }
        lock(&self.sets).push((x, y, brightness));
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn rows(&self) -> u8 {
        self.rows
    }

    fn cols(&self) -> u8 {
        self.cols
    }

    fn close(&self) -> Result<(), GridError> {
        *lock(&self.closes) += 1;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
