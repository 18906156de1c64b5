//! Text and light animations drawn through the generic [`Device`] operations,
//! so they work on single connections and row devices alike.

use std::time::Duration;

use log::debug;
use tokio::time::{self, Instant};

use crate::{
    font::{self, HEIGHT},
    Device, Errors, GridError,
};

const GREETER_DELAY: Duration = Duration::from_millis(80);
const GREETER_PAUSE: Duration = Duration::from_millis(20);
const GREETER_HOLD: Duration = Duration::from_millis(300);

const WORM_STEP: Duration = Duration::from_millis(4);
const WORM_TAIL: Duration = Duration::from_millis(47);

/// Scrolls `text` across the grid, waiting `delay` between two frames.
/// Lit pixels get brighter towards the right edge.
pub async fn marquee<D>(device: &D, text: &str, delay: Duration) -> Result<(), GridError>
where
    D: Device + ?Sized,
{
    let text = format!("   {} ", text.to_lowercase());
    blank(device, || {
        format!(
            "blank (switch all off) before marquee on device {}",
            device.name()
        )
    })
    .await?;

    let strip = font::strip(&text);
    let width = usize::from(device.cols());
    for start in 0..strip.len() {
        let window = &strip[start..strip.len().min(start + width)];
        for (col, bits) in window.iter().enumerate() {
            let col = col as u8;
            for row in 0..HEIGHT {
                let on = bits & (1 << row) != 0;
                let brightness = if on { col + 1 } else { 0 };
                if let Err(e) = device.set(row, col, brightness).await {
                    let task = format!(
                        "switch {} {}/{} on device {} while marqueing",
                        if on { "on" } else { "off" },
                        row,
                        col,
                        device.name()
                    );
                    return Err(Errors::wrap(task, e));
                }
            }
        }
        time::sleep(delay).await;
    }
    Ok(())
}

/// Shows `text` one letter after another. Every letter stays lit for `hold`
/// and is followed by a dark pause of half that time.
pub async fn print<D>(device: &D, text: &str, hold: Duration) -> Result<(), GridError>
where
    D: Device + ?Sized,
{
    blank(device, || {
        format!(
            "blank (switch all off) before printing on device {}",
            device.name()
        )
    })
    .await?;

    for letter in text.to_lowercase().chars() {
        let Some(glyph) = font::glyph(letter) else {
            debug!("No glyph for {:?}, skipping it", letter);
            continue;
        };
        for (row, col) in glyph.pixels() {
            if let Err(e) = device.switch(row, col, true).await {
                let task = format!(
                    "switch on {}/{} on device {} to print letter '{}'",
                    row,
                    col,
                    device.name(),
                    letter
                );
                return Err(Errors::wrap(task, e));
            }
        }
        time::sleep(hold).await;
        blank(device, || {
            format!(
                "blank (switch all off) after printing letter '{}' on device {}",
                letter,
                device.name()
            )
        })
        .await?;
        time::sleep(hold / 2).await;
    }
    Ok(())
}

/// Says hello: the device name as a marquee followed by a short flash of
/// every light. Failures are logged and otherwise ignored.
pub async fn greeter<D>(device: &D)
where
    D: Device + ?Sized,
{
    if let Err(e) = marquee(device, &device.name(), GREETER_DELAY).await {
        debug!("Greeting {} failed: {}", device.name(), e);
    }
    time::sleep(GREETER_PAUSE).await;
    if let Err(e) = device.switch_all(true).await {
        debug!("Greeting {} failed: {}", device.name(), e);
    }
    time::sleep(GREETER_HOLD).await;
    if let Err(e) = device.switch_all(false).await {
        debug!("Greeting {} failed: {}", device.name(), e);
    }
}

/// Runs a worm through the grid, row by row and turning at every edge.
/// Each cell lights up dimly and goes dark again shortly after.
pub async fn flash<D>(device: &D) -> Result<(), GridError>
where
    D: Device + ?Sized,
{
    let start = Instant::now();
    let mut timeline = Vec::with_capacity(usize::from(device.num_buttons()) * 2);
    for (step, (x, y)) in snake(device.rows(), device.cols()).enumerate() {
        let lit = start + WORM_STEP * (step as u32 + 1);
        timeline.push((lit, x, y, Some(4 + x)));
        timeline.push((lit + WORM_TAIL, x, y, None));
    }
    // stable: equal instants keep their scheduling order
    timeline.sort_by_key(|(at, ..)| *at);

    let mut errors = Errors::new(format!("flash device {}", device.name()));
    for (at, x, y, brightness) in timeline {
        time::sleep_until(at).await;
        errors.push(match brightness {
            Some(brightness) => device.set(x, y, brightness).await,
            None => device.switch(x, y, false).await,
        });
    }
    errors.into_result()
}

/// Cells in boustrophedon order: left to right on even rows, right to left
/// on odd ones.
fn snake(rows: u8, cols: u8) -> impl Iterator<Item = (u8, u8)> {
    (0..rows).flat_map(move |x| {
        (0..cols).map(move |i| if x % 2 == 0 { (x, i) } else { (x, cols - 1 - i) })
    })
}

async fn blank<D, F>(device: &D, task: F) -> Result<(), GridError>
where
    D: Device + ?Sized,
    F: FnOnce() -> String,
{
    device
        .switch_all(false)
        .await
        .map_err(|e| Errors::wrap(task(), e))
}
