use crate::KeyEvent;

use super::HEADER_LEN;

const LED_ON: u8 = 0x21;
const LED_OFF: u8 = 0x30;

/// The 8x8 generation. LEDs know only on and off; columns are addressed
/// through [`mirror`] both ways.
pub struct Monome64;

impl Monome64 {
    pub const NAME: &'static str = "monome64";
    pub const ROWS: u8 = 8;
    pub const COLS: u8 = 8;

    pub fn encode(x: u8, y: u8, brightness: u8) -> [u8; 2] {
        let command = if brightness > 0 { LED_ON } else { LED_OFF };
        [command, (x << 4) | mirror(y)]
    }

    pub fn decode(frame: &[u8]) -> Vec<KeyEvent> {
        frame
            .get(HEADER_LEN..)
            .unwrap_or_default()
            .chunks_exact(2)
            .map(|pair| {
                let (state, key) = (pair[0], pair[1]);
                KeyEvent {
                    x: key / 16,
                    y: mirror(key % 16),
                    down: state == 0,
                }
            })
            .collect()
    }
}

/// `|y - 7|`, the device's own key and LED numbering.
pub fn mirror(y: u8) -> u8 {
    y.abs_diff(7)
}
