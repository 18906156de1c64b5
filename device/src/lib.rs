pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod font;
pub mod handler;
pub mod protocols;
pub mod render;
pub mod row;
pub mod tester;
pub mod usb;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

pub use config::ConnectionOptions;
pub use connection::Connection;
pub use discovery::{connect, connections, Scan};
pub use error::{Errors, GridError};
pub use handler::{ChannelHandler, Handler, KeyEvent};
pub use row::{RowConnection, RowConnectionBuilder};
pub use usb::{usb_devices, PRODUCT_ID, VENDOR_ID};

/// Called from the polling task when listening stops because of an error.
pub type ErrorHandler = Arc<dyn Fn(GridError) + Send + Sync>;

/// A grid of buttons with LEDs underneath. `x` addresses the row, `y` the
/// column.
///
/// Brightness levels from the monome docs:
/// 0-3 off, 4-7 low, 8-11 medium, 12-15 high intensity.
#[async_trait]
pub trait Device: Send + Sync {
    fn name(&self) -> String;

    fn rows(&self) -> u8;

    fn cols(&self) -> u8;

    fn num_buttons(&self) -> u16 {
        u16::from(self.rows()) * u16::from(self.cols())
    }

    async fn set(&self, x: u8, y: u8, brightness: u8) -> Result<(), GridError>;

    /// Shortcut for `set(x, y, 15)` or `set(x, y, 0)`.
    async fn switch(&self, x: u8, y: u8, on: bool) -> Result<(), GridError> {
        let brightness = if on { 15 } else { 0 };
        self.set(x, y, brightness)
            .await
            .map_err(|e| e.with_task(if on { "switch on" } else { "switch off" }))
    }

    /// Switches every light, carrying on past failures.
    async fn switch_all(&self, on: bool) -> Result<(), GridError> {
        let mut errors = Errors::new(if on { "switch all on" } else { "switch all off" });
        for x in 0..self.rows() {
            for y in 0..self.cols() {
                errors.push(self.switch(x, y, on).await);
            }
        }
        errors.into_result()
    }

    /// Scrolls `text` across the grid from right to left.
    async fn marquee(&self, text: &str, delay: Duration) -> Result<(), GridError> {
        render::marquee(self, text, delay).await
    }

    /// Shows `text` one letter at a time.
    async fn print(&self, text: &str, hold: Duration) -> Result<(), GridError> {
        render::print(self, text, hold).await
    }

    fn set_handler(&self, handler: Arc<dyn Handler>);

    fn start_listening(&self, on_error: Option<ErrorHandler>);

    async fn stop_listening(&self);

    async fn close(&self) -> Result<(), GridError>;

    fn is_closed(&self) -> bool;

    /// Reads one message from the device and hands its key events to the
    /// handler. Driven by the polling task.
    async fn read_message(&self) -> Result<(), GridError>;
}
