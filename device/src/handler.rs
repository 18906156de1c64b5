use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;

use crate::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub x: u8,
    pub y: u8,
    pub down: bool,
}

/// Receives key presses (`down == true`) and releases from the polling task
/// of a connection. Handlers must not block indefinitely, and must not stop
/// or close the connection that called them.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, source: &dyn Device, x: u8, y: u8, down: bool);
}

#[async_trait]
impl<F> Handler for F
where
    F: Fn(&dyn Device, u8, u8, bool) + Send + Sync,
{
    async fn handle(&self, source: &dyn Device, x: u8, y: u8, down: bool) {
        self(source, x, y, down)
    }
}

/// Forwards every key event into a channel.
pub struct ChannelHandler {
    sender: mpsc::Sender<KeyEvent>,
}

impl ChannelHandler {
    pub fn new(sender: mpsc::Sender<KeyEvent>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Handler for ChannelHandler {
    async fn handle(&self, source: &dyn Device, x: u8, y: u8, down: bool) {
        if let Err(e) = self.sender.send(KeyEvent { x, y, down }).await {
            debug!("Dropping key event from {}: {}", source.name(), e);
        }
    }
}
