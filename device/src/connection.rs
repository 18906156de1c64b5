use std::{
    fmt,
    io::{self, Read, Write},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::{
    sync::{self, oneshot},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::{
    protocols::{Port, Protocol},
    render,
    usb::Transport,
    ConnectionOptions, Device, ErrorHandler, GridError, Handler, KeyEvent,
};

struct State {
    closed: bool,
    handler: Option<Arc<dyn Handler>>,
}

struct Listener {
    /// Taken by the first `stop_listening`.
    stop: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

struct Inner {
    protocol: Protocol,
    name: String,
    state: RwLock<State>,
    transport: Mutex<Box<dyn Transport>>,
    max_packet_size: usize,
    poll_interval: Duration,
    /// Held across joining the poller, so every concurrent
    /// `stop_listening` returns only after the poller has exited.
    listener: sync::Mutex<Option<Listener>>,
}

/// A live connection to one grid. Clones share the connection.
///
/// Any I/O error on the transport closes the connection for good. The
/// transport is released by [`Device::close`], or dropped with the last
/// clone if the connection closed itself after an I/O error.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub(crate) fn new(
        protocol: Protocol,
        transport: Box<dyn Transport>,
        options: &ConnectionOptions,
    ) -> Self {
        let max_packet_size = transport.max_packet_size();
        Self {
            inner: Arc::new(Inner {
                name: protocol.name(),
                protocol,
                state: RwLock::new(State {
                    closed: false,
                    handler: None,
                }),
                transport: Mutex::new(transport),
                max_packet_size,
                poll_interval: options.poll_interval,
                listener: sync::Mutex::new(None),
            }),
        }
    }

    pub fn protocol(&self) -> &Protocol {
        &self.inner.protocol
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// Lights every cell along a snake path and lets it fade out again.
    pub async fn flash(&self) -> Result<(), GridError> {
        render::flash(self).await
    }

    fn state(&self) -> RwLockReadGuard<'_, State> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, State> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        self.inner
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), GridError> {
        if self.is_closed() {
            Err(GridError::ConnectionClosed {
                device: self.name(),
            })
        } else {
            Ok(())
        }
    }

    fn mark_closed(&self) {
        self.state_mut().closed = true;
    }

    fn io_failure(&self, action: &str, error: io::Error) -> GridError {
        warn!(
            "Stopping read/write to device {}, because of {} error: {}",
            self.name(),
            action,
            error
        );
        self.mark_closed();
        GridError::Io(error)
    }

    async fn dispatch(&self, event: KeyEvent) {
        let handler = self.state().handler.clone();
        match handler {
            Some(handler) => handler.handle(self, event.x, event.y, event.down).await,
            None => info!(
                "Unhandled key {} on device {}: x: {}, y: {}",
                if event.down { "press" } else { "release" },
                self.name(),
                event.x,
                event.y
            ),
        }
    }

    async fn poll(self, on_error: Option<ErrorHandler>, mut stop: oneshot::Receiver<()>) {
        let mut ticker = time::interval(self.inner.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!("Stopped listening on device {}", self.name());
                    return;
                }
                _ = ticker.tick() => {
                    if self.is_closed() {
                        if let Some(on_error) = &on_error {
                            on_error(GridError::ConnectionClosed { device: self.name() });
                        }
                        return;
                    }
                    if let Err(e) = self.read_message().await {
                        warn!(
                            "Stop listening, because could not read from device {}: {}",
                            self.name(),
                            e
                        );
                        self.mark_closed();
                        if let Some(on_error) = &on_error {
                            on_error(e);
                        }
                        return;
                    }
                }
            }
        }
    }
}

impl Port for Connection {
    fn read(&self, buf: &mut [u8]) -> Result<usize, GridError> {
        self.ensure_open()?;
        let result = self.transport().read(buf);
        result.map_err(|e| self.io_failure("reading", e))
    }

    fn write(&self, buf: &[u8]) -> Result<usize, GridError> {
        self.ensure_open()?;
        let result = self.transport().write(buf);
        result.map_err(|e| self.io_failure("writing", e))
    }

    fn max_packet_size(&self) -> usize {
        self.inner.max_packet_size
    }
}

#[async_trait]
impl Device for Connection {
    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn rows(&self) -> u8 {
        self.inner.protocol.rows()
    }

    fn cols(&self) -> u8 {
        self.inner.protocol.cols()
    }

    async fn set(&self, x: u8, y: u8, brightness: u8) -> Result<(), GridError> {
        self.inner.protocol.set(self, x, y, brightness)
    }

    fn set_handler(&self, handler: Arc<dyn Handler>) {
        self.state_mut().handler = Some(handler);
    }

    /// Spawns the polling task on the current tokio runtime. A second call
    /// while a poller is running, or while one is being stopped, is ignored.
    fn start_listening(&self, on_error: Option<ErrorHandler>) {
        let Ok(mut listener) = self.inner.listener.try_lock() else {
            warn!("Still stopping the poller of device {}", self.name());
            return;
        };
        if listener
            .as_ref()
            .is_some_and(|listener| !listener.join.is_finished())
        {
            warn!("Already listening on device {}", self.name());
            return;
        }

        let (stop, stop_receiver) = oneshot::channel();
        let join = tokio::spawn(self.clone().poll(on_error, stop_receiver));
        *listener = Some(Listener {
            stop: Some(stop),
            join,
        });
    }

    /// Returns once the polling task has exited.
    async fn stop_listening(&self) {
        let mut slot = self.inner.listener.lock().await;
        let Some(listener) = slot.as_mut() else {
            return;
        };
        if let Some(stop) = listener.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut listener.join).await {
            warn!("Poller of device {} ended abnormally: {}", self.name(), e);
        }
        *slot = None;
    }

    async fn close(&self) -> Result<(), GridError> {
        if self.is_closed() {
            return Ok(());
        }

        self.stop_listening().await;
        let already_closed = std::mem::replace(&mut self.state_mut().closed, true);
        if already_closed {
            return Ok(());
        }

        debug!("Closing device {}", self.name());
        let result = self.transport().release();
        result.map_err(|source| GridError::Close {
            device: self.name(),
            source: Box::new(source),
        })
    }

    fn is_closed(&self) -> bool {
        self.state().closed
    }

    async fn read_message(&self) -> Result<(), GridError> {
        let events = self.inner.protocol.read_events(self)?;
        for event in events {
            self.dispatch(event).await;
        }
        Ok(())
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        tester::{test_connection, CloseTester, GetTester, RecordingTester, Tester},
        usb::EndpointInfo,
        ChannelHandler,
    };

    /// Serves queued frames and fails once the queue is empty, like an
    /// unplugged device.
    struct ScriptedTransport {
        frames: Arc<Mutex<VecDeque<Vec<u8>>>>,
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_writes: bool,
    }

    impl Read for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(frame) = self.frames.lock().unwrap().pop_front() else {
                return Err(io::Error::other("unplugged"));
            };
            buf[..frame.len()].copy_from_slice(&frame);
            Ok(frame.len())
        }
    }

    impl Write for ScriptedTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::other("broken pipe"));
            }
            self.written.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for ScriptedTransport {
        fn reader(&self) -> EndpointInfo {
            EndpointInfo {
                address: 0x81,
                max_packet_size: 64,
            }
        }

        fn writer(&self) -> EndpointInfo {
            EndpointInfo {
                address: 0x02,
                max_packet_size: 64,
            }
        }

        fn release(&mut self) -> Result<(), GridError> {
            Ok(())
        }
    }

    fn scripted(
        protocol: Protocol,
        frames: Vec<Vec<u8>>,
        fail_writes: bool,
    ) -> (Connection, Arc<Mutex<Vec<Vec<u8>>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptedTransport {
            frames: Arc::new(Mutex::new(frames.into())),
            written: written.clone(),
            fail_writes,
        };
        let connection = Connection::new(
            protocol,
            Box::new(transport),
            &ConnectionOptions::default(),
        );
        (connection, written)
    }

    #[tokio::test]
    async fn set_writes_frames_to_the_transport() {
        let (connection, written) = scripted(Protocol::Monome128, vec![], false);
        connection.set(1, 2, 20).await.unwrap();
        connection.switch(1, 2, false).await.unwrap();
        assert_eq!(
            *written.lock().unwrap(),
            vec![vec![24, 2, 1, 15], vec![24, 2, 1, 0]]
        );
    }

    #[tokio::test]
    async fn write_failure_closes_the_connection() {
        let (connection, _) = scripted(Protocol::Monome64, vec![], true);
        let error = connection.switch(0, 0, true).await.unwrap_err();
        assert_eq!(error.task(), Some("switch on"));
        assert!(connection.is_closed());

        assert!(matches!(
            connection.set(0, 0, 1).await,
            Err(GridError::Device { source, .. })
                if matches!(*source, GridError::ConnectionClosed { .. })
        ));
    }

    #[tokio::test]
    async fn read_message_dispatches_events_in_order() {
        let (connection, _) = scripted(
            Protocol::Monome128,
            vec![vec![0x01, 0x60, 0x21, 3, 1, 0x20, 3, 1]],
            false,
        );
        let (sender, mut receiver) = mpsc::channel(8);
        connection.set_handler(Arc::new(ChannelHandler::new(sender)));

        connection.read_message().await.unwrap();
        assert_eq!(
            receiver.recv().await,
            Some(KeyEvent {
                x: 1,
                y: 3,
                down: true
            })
        );
        assert_eq!(
            receiver.recv().await,
            Some(KeyEvent {
                x: 1,
                y: 3,
                down: false
            })
        );
    }

    #[tokio::test]
    async fn events_without_handler_are_dropped() {
        let (connection, _) = scripted(Protocol::Monome64, vec![vec![0x31, 0x60, 0, 0]], false);
        connection.read_message().await.unwrap();
        assert!(!connection.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn poller_delivers_events_from_the_tester() {
        let tester = Arc::new(RecordingTester::new("recorder", 8, 8));
        tester.push_event(1, 2, true);
        tester.push_event(1, 2, false);
        let connection = test_connection(tester.clone(), &ConnectionOptions::default());

        let (sender, mut receiver) = mpsc::channel(8);
        connection.set_handler(Arc::new(ChannelHandler::new(sender)));
        connection.start_listening(None);

        assert_eq!(
            receiver.recv().await,
            Some(KeyEvent {
                x: 1,
                y: 2,
                down: true
            })
        );
        assert_eq!(
            receiver.recv().await,
            Some(KeyEvent {
                x: 1,
                y: 2,
                down: false
            })
        );
        connection.close().await.unwrap();
        assert_eq!(tester.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_events_after_stop_listening_returns() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let tester = GetTester::new(8, 8, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(KeyEvent {
                x: 0,
                y: 0,
                down: true,
            }))
        });
        let connection = test_connection(Arc::new(tester), &ConnectionOptions::default());

        let handled = Arc::new(AtomicUsize::new(0));
        let count = handled.clone();
        connection.set_handler(Arc::new(move |_: &dyn Device, _: u8, _: u8, _: bool| {
            count.fetch_add(1, Ordering::SeqCst);
        }));
        connection.start_listening(None);
        time::sleep(Duration::from_millis(40)).await;

        connection.stop_listening().await;
        let seen = handled.load(Ordering::SeqCst);
        assert!(seen > 0);

        time::sleep(Duration::from_millis(40)).await;
        assert_eq!(handled.load(Ordering::SeqCst), seen);
        assert!(!connection.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn read_error_closes_and_reports() {
        let (connection, _) = scripted(Protocol::Monome64, vec![vec![0x31, 0x60]], false);
        let (sender, mut receiver) = mpsc::unbounded_channel();
        connection.start_listening(Some(Arc::new(move |e: GridError| {
            let _ = sender.send(e.to_string());
        })));

        let reported = receiver.recv().await.unwrap();
        assert!(reported.contains("monome64"), "{reported}");
        assert!(connection.is_closed());
        assert!(receiver.recv().await.is_none());

        connection.stop_listening().await;
        connection.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn poller_reports_connection_closed_elsewhere() {
        let tester = Arc::new(RecordingTester::new("recorder", 8, 8));
        let connection = test_connection(tester, &ConnectionOptions::default());
        let (sender, mut receiver) = mpsc::unbounded_channel();
        connection.start_listening(Some(Arc::new(move |e: GridError| {
            let _ = sender.send(e);
        })));

        connection.mark_closed();
        assert!(matches!(
            receiver.recv().await,
            Some(GridError::ConnectionClosed { device }) if device == "recorder"
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = releases.clone();
        let tester = CloseTester::new(8, 8, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let connection = test_connection(Arc::new(tester), &ConnectionOptions::default());

        connection.close().await.unwrap();
        connection.close().await.unwrap();
        assert!(connection.is_closed());
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        connection.stop_listening().await;
    }

    #[tokio::test]
    async fn release_failure_is_a_close_error() {
        let tester = CloseTester::new(8, 8, || Err(GridError::Tester("stuck".into())));
        let connection = test_connection(Arc::new(tester), &ConnectionOptions::default());
        assert!(matches!(
            connection.close().await,
            Err(GridError::Close { device, .. }) if device == "closeTester"
        ));
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn switch_all_reports_every_failure() {
        let tester = RecordingTester::new("recorder", 8, 8).fail_when(|x, y, _| x == 7 && y < 3);
        let tester = Arc::new(tester);
        let connection = test_connection(tester.clone(), &ConnectionOptions::default());

        let Err(GridError::Aggregate(errors)) = connection.switch_all(true).await else {
            panic!("expected aggregate error");
        };
        assert_eq!(errors.task, "switch all on");
        assert_eq!(errors.len(), 3);
        assert_eq!(tester.sets().len(), 61);
        assert!(errors
            .iter()
            .all(|e| e.task() == Some("switch on")));
    }

    /// Serves one key press and notes whether it was released while a
    /// handler was still running.
    #[derive(Default)]
    struct BusyTester {
        pressed: AtomicBool,
        busy: Arc<AtomicBool>,
        releases: AtomicUsize,
        released_while_busy: AtomicBool,
    }

    impl Tester for BusyTester {
        fn get(&self) -> Result<Option<KeyEvent>, GridError> {
            if self.pressed.swap(true, Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(Some(KeyEvent {
                x: 0,
                y: 0,
                down: true,
            }))
        }

        fn set(&self, _x: u8, _y: u8, _brightness: u8) -> Result<(), GridError> {
            Ok(())
        }

        fn name(&self) -> String {
            "busyTester".into()
        }

        fn rows(&self) -> u8 {
            8
        }

        fn cols(&self) -> u8 {
            8
        }

        fn close(&self) -> Result<(), GridError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.busy.load(Ordering::SeqCst) {
                self.released_while_busy.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    struct SlowHandler {
        busy: Arc<AtomicBool>,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl Handler for SlowHandler {
        async fn handle(&self, _source: &dyn Device, _x: u8, _y: u8, _down: bool) {
            self.busy.store(true, Ordering::SeqCst);
            time::sleep(Duration::from_millis(50)).await;
            self.busy.store(false, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_closes_both_wait_for_the_poller() {
        let tester = Arc::new(BusyTester::default());
        let connection = test_connection(tester.clone(), &ConnectionOptions::default());
        let handler = Arc::new(SlowHandler {
            busy: tester.busy.clone(),
            finished: AtomicUsize::new(0),
        });
        connection.set_handler(handler.clone());
        connection.start_listening(None);

        time::sleep(Duration::from_millis(10)).await;
        assert!(tester.busy.load(Ordering::SeqCst));

        let first = tokio::spawn({
            let connection = connection.clone();
            async move { connection.close().await }
        });
        tokio::task::yield_now().await;

        connection.close().await.unwrap();
        assert_eq!(handler.finished.load(Ordering::SeqCst), 1);
        assert!(!tester.busy.load(Ordering::SeqCst));

        first.await.unwrap().unwrap();
        assert_eq!(tester.releases.load(Ordering::SeqCst), 1);
        assert!(!tester.released_while_busy.load(Ordering::SeqCst));
        assert!(connection.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_stops_return_after_the_poller_exited() {
        let tester = Arc::new(BusyTester::default());
        let connection = test_connection(tester.clone(), &ConnectionOptions::default());
        let handler = Arc::new(SlowHandler {
            busy: tester.busy.clone(),
            finished: AtomicUsize::new(0),
        });
        connection.set_handler(handler.clone());
        connection.start_listening(None);
        time::sleep(Duration::from_millis(10)).await;

        tokio::join!(connection.stop_listening(), connection.stop_listening());
        assert_eq!(handler.finished.load(Ordering::SeqCst), 1);
        assert!(!connection.is_closed());
    }
}
