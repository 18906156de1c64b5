use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::usb::{PRODUCT_ID, VENDOR_ID};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(4);
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_USB_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Pause between the generation probe and reading its answer.
    #[serde(with = "millis")]
    pub settle_delay: Duration,
    #[serde(with = "millis")]
    pub usb_timeout: Duration,
    pub vendor_id: String,
    pub product_id: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            settle_delay: DEFAULT_SETTLE_DELAY,
            usb_timeout: DEFAULT_USB_TIMEOUT,
            vendor_id: VENDOR_ID.to_owned(),
            product_id: PRODUCT_ID.to_owned(),
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_usb_timeout(mut self, timeout: Duration) -> Self {
        self.usb_timeout = timeout;
        self
    }

    pub fn with_ids(mut self, vendor_id: &str, product_id: &str) -> Self {
        self.vendor_id = vendor_id.to_owned();
        self.product_id = product_id.to_owned();
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: u64 = Deserialize::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
