//! Governed driver switches.
//!
//! Four enable switches, sampled fresh every publisher cycle; nothing is
//! persisted between cycles. The input lines are pull-up biased, so the
//! electrical and logical senses are inverted: idle reads high and
//! publishes 0, actuated pulls the line low and publishes 1.

use serde::Deserialize;

use crate::gpio::{DigitalIo, GpioError};
use crate::schema;

pub const SWITCH_COUNT: usize = 4;

/// Input pin assignment (BCM numbering), one line per switch.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SwitchPins {
    pub regen_braking: u8,
    pub longitudinal: u8,
    pub lateral: u8,
    pub v2x: u8,
}

impl Default for SwitchPins {
    fn default() -> Self {
        // Deployed harness assignment.
        Self {
            regen_braking: 17,
            longitudinal: 27,
            lateral: 22,
            v2x: 5,
        }
    }
}

/// One cycle's sampled switch states in the protocol's logical sense
/// (`true` = actuated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchSample {
    pub regen_braking: bool,
    pub longitudinal: bool,
    pub lateral: bool,
    pub v2x: bool,
}

impl SwitchSample {
    /// The sample as wire signal values, ready for the schema encoder.
    pub fn signal_values(&self) -> [(&'static str, u64); SWITCH_COUNT] {
        [
            (schema::SIG_REGEN_SWITCH, u64::from(self.regen_braking)),
            (schema::SIG_LONG_SWITCH, u64::from(self.longitudinal)),
            (schema::SIG_LAT_SWITCH, u64::from(self.lateral)),
            (schema::SIG_V2X_SWITCH, u64::from(self.v2x)),
        ]
    }
}

/// The four governed switches. Read-only from everywhere except the switch
/// publisher's sampling step.
#[derive(Debug, Clone, Copy)]
pub struct SwitchBank {
    pins: SwitchPins,
}

impl SwitchBank {
    pub fn new(pins: SwitchPins) -> Self {
        Self { pins }
    }

    /// Sample all four inputs. Purely local I/O; callers never hold the bus
    /// coordinator around this.
    pub fn sample<IO: DigitalIo>(&self, io: &IO) -> Result<SwitchSample, GpioError> {
        Ok(SwitchSample {
            regen_braking: !io.read_input(self.pins.regen_braking)?.is_high(),
            longitudinal: !io.read_input(self.pins.longitudinal)?.is_high(),
            lateral: !io.read_input(self.pins.lateral)?.is_high(),
            v2x: !io.read_input(self.pins.v2x)?.is_high(),
        })
    }
}
