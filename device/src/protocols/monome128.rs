use crate::KeyEvent;

use super::HEADER_LEN;

const LED_LEVEL: u8 = 24;
const KEY_DOWN: u8 = 0x21;
const MAX_BRIGHTNESS: u8 = 15;

/// The 8x16 generation with 16 brightness levels.
pub struct Monome128;

impl Monome128 {
    pub const NAME: &'static str = "monome128";
    pub const ROWS: u8 = 8;
    pub const COLS: u8 = 16;

    pub fn encode(x: u8, y: u8, brightness: u8) -> [u8; 4] {
        [LED_LEVEL, y, x, brightness.min(MAX_BRIGHTNESS)]
    }

    pub fn decode(frame: &[u8]) -> Vec<KeyEvent> {
        frame
            .get(HEADER_LEN..)
            .unwrap_or_default()
            .chunks_exact(3)
            .filter(|stride| stride[0] != 0)
            .map(|stride| KeyEvent {
                x: stride[2],
                y: stride[1],
                down: stride[0] == KEY_DOWN,
            })
            .collect()
    }
}
