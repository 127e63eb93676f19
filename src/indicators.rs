// MY9221 LED bars showing how close obstacles are
//
// All bars share one clock line and each has its own data line, so a frame
// sets one bit on every data line and then clocks them together. Each bar has
// two red LEDs (indices 0 and 1) followed by eight green ones:
//
//   far    ..xxxxxxxx
//          ..x.......
//   warn   .x........
//   close  xx........

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::{PlatformError, Result};
use crate::gpio::io::DigitalOutput;
use crate::gpio::{DeviceHandle, Pin};

/// LEDs addressed per bar, including the two unused greyscale slots
pub const LEDS_PER_BAR: usize = 12;

const COMMAND_WORD: u16 = 0x0310; // 16 bit greyscale, 1001 Hz
const CLOCKS_PER_LED: usize = 16;
const LATCH_DELAY: Duration = Duration::from_micros(220);
const LATCH_PULSES: usize = 4;

const RED_LEDS: u16 = 0b0000_0000_0011;
const GREEN_LEDS: u16 = 0b0011_1111_1100;

/// LED pattern for one bar, lowest LED in bit 0
pub fn bar_state(distance: f64, minimal: f64, warning: f64, maximal: f64) -> u16 {
    let distance = distance.clamp(minimal, maximal);
    if distance > warning {
        let lit = (8.0 * (distance - warning) / (maximal - warning)).ceil() as u32;
        GREEN_LEDS & (((1u16 << lit.min(8)) - 1) << 2)
    } else if distance <= minimal {
        RED_LEDS
    } else {
        RED_LEDS & 0b10
    }
}

fn check_distances(minimal: f64, warning: f64, maximal: f64) -> std::result::Result<(), String> {
    if !(minimal.is_finite() && warning.is_finite() && maximal.is_finite()) {
        return Err("indicator distances must be finite".to_string());
    }
    if !(minimal < warning && warning < maximal) {
        return Err(format!(
            "indicator distances must increase, got {} / {} / {}",
            minimal, warning, maximal
        ));
    }
    Ok(())
}

/// A row of MY9221 bars on a shared clock line
pub struct My9221Indicators<O: DigitalOutput> {
    clock: (Pin, O),
    data: Vec<(Pin, O)>,
    clock_high: bool,
    minimal_distance: f64,
    warning_distance: f64,
    maximal_distance: f64,
}

impl<O: DigitalOutput> My9221Indicators<O> {
    /// # Errors
    /// [`PlatformError::Configuration`] without data lines, or unless
    /// `minimal < warning < maximal`.
    pub fn new(
        clock: (Pin, O),
        data: Vec<(Pin, O)>,
        minimal_distance: f64,
        warning_distance: f64,
        maximal_distance: f64,
    ) -> Result<Self> {
        if data.is_empty() {
            return Err(PlatformError::Configuration(
                "no indicator data pins given".to_string(),
            ));
        }
        check_distances(minimal_distance, warning_distance, maximal_distance)
            .map_err(PlatformError::Configuration)?;

        let mut indicators = Self {
            clock,
            data,
            clock_high: false,
            minimal_distance,
            warning_distance,
            maximal_distance,
        };
        indicators.clock.0.ensure_owned()?;
        indicators.clock.1.set_low()?;
        Ok(indicators)
    }

    pub fn indicator_count(&self) -> usize {
        self.data.len()
    }

    pub fn set_distances(&mut self, minimal: f64, warning: f64, maximal: f64) -> Result<()> {
        check_distances(minimal, warning, maximal).map_err(PlatformError::InvalidArgument)?;
        self.minimal_distance = minimal;
        self.warning_distance = warning;
        self.maximal_distance = maximal;
        Ok(())
    }

    pub fn minimal_distance(&self) -> f64 {
        self.minimal_distance
    }

    pub fn warning_distance(&self) -> f64 {
        self.warning_distance
    }

    pub fn maximal_distance(&self) -> f64 {
        self.maximal_distance
    }

    /// Show one distance per bar.
    ///
    /// Sends the command word, sixteen clocks per LED, then the latch
    /// sequence on every data line.
    pub fn set_indication(&mut self, distances: &[f64]) -> Result<()> {
        if distances.len() != self.data.len() {
            return Err(PlatformError::InvalidArgument(format!(
                "expected {} distances, got {}",
                self.data.len(),
                distances.len()
            )));
        }
        if distances.iter().any(|d| d.is_nan()) {
            return Err(PlatformError::InvalidArgument(
                "distances must not be NaN".to_string(),
            ));
        }
        self.clock.0.ensure_owned()?;
        for (pin, _) in &self.data {
            pin.ensure_owned()?;
        }

        let states: Vec<u16> = distances
            .iter()
            .map(|d| bar_state(*d, self.minimal_distance, self.warning_distance, self.maximal_distance))
            .collect();
        debug!("Indicator states: {:03x?}", states);

        for bit in (0..16).rev() {
            for (_, line) in &mut self.data {
                line.set_level(COMMAND_WORD & (1 << bit) != 0)?;
            }
            self.toggle_clock()?;
        }

        for led in 0..LEDS_PER_BAR {
            for ((_, line), state) in self.data.iter_mut().zip(&states) {
                line.set_level(state & (1 << led) != 0)?;
            }
            for _ in 0..CLOCKS_PER_LED {
                self.toggle_clock()?;
            }
        }

        thread::sleep(LATCH_DELAY);
        for (_, line) in &mut self.data {
            line.set_low()?;
            for _ in 0..LATCH_PULSES {
                line.set_high()?;
                line.set_low()?;
            }
        }
        Ok(())
    }

    fn toggle_clock(&mut self) -> Result<()> {
        self.clock_high = !self.clock_high;
        self.clock.1.set_level(self.clock_high)
    }
}
