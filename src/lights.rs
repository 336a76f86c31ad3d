//! Governed status indicator lights.
//!
//! Five indicators, one per governed vehicle function. The bank retains the
//! most recently decoded state per light; what actually reaches the output
//! pins is derived from that plus the watchdog's fail-safe flag, never from
//! a mixture of stale and fresh fields. Flashing is driven by a single
//! software phase bit shared by all lights and toggled once per control
//! cycle, so every flashing light switches in lockstep at the control-loop
//! period.

use serde::Deserialize;
use tracing::trace;

use crate::gpio::{DigitalIo, GpioError, Level};

pub const LIGHT_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightId {
    Propulsion,
    HighVoltage,
    LongitudinalControl,
    LateralControl,
    V2xControl,
}

impl LightId {
    pub const ALL: [LightId; LIGHT_COUNT] = [
        LightId::Propulsion,
        LightId::HighVoltage,
        LightId::LongitudinalControl,
        LightId::LateralControl,
        LightId::V2xControl,
    ];
}

/// Commanded state of one indicator, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightState {
    #[default]
    Off,
    On,
    Flashing,
}

impl LightState {
    /// Map a decoded raw value into the `{0, 1, 2}` domain. Anything else is
    /// the caller's cue to treat the whole frame as undecodable, not to
    /// clamp.
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(LightState::Off),
            1 => Some(LightState::On),
            2 => Some(LightState::Flashing),
            _ => None,
        }
    }
}

/// Output pin assignment (BCM numbering), one line per indicator.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LightPins {
    pub propulsion: u8,
    pub high_voltage: u8,
    pub longitudinal: u8,
    pub lateral: u8,
    pub v2x: u8,
}

impl Default for LightPins {
    fn default() -> Self {
        // Deployed harness assignment.
        Self {
            propulsion: 23,
            high_voltage: 24,
            longitudinal: 12,
            lateral: 16,
            v2x: 7,
        }
    }
}

#[derive(Debug)]
struct LightUnit {
    id: LightId,
    pin: u8,
    /// Most recently decoded state; retained across fail-safe episodes.
    decoded: LightState,
    /// Last state actually driven to the output.
    applied: Option<LightState>,
}

/// The five governed lights, owned exclusively by the light-state
/// controller.
#[derive(Debug)]
pub struct LightBank {
    units: [LightUnit; LIGHT_COUNT],
    flash_phase: bool,
}

impl LightBank {
    /// The output lines are initialized low by the pin driver, so every
    /// light starts with `Off` both decoded and applied.
    pub fn new(pins: &LightPins) -> Self {
        let pin_of = |id: LightId| match id {
            LightId::Propulsion => pins.propulsion,
            LightId::HighVoltage => pins.high_voltage,
            LightId::LongitudinalControl => pins.longitudinal,
            LightId::LateralControl => pins.lateral,
            LightId::V2xControl => pins.v2x,
        };
        let units = LightId::ALL.map(|id| LightUnit {
            id,
            pin: pin_of(id),
            decoded: LightState::Off,
            applied: Some(LightState::Off),
        });
        Self {
            units,
            flash_phase: false,
        }
    }

    /// Record the decoded propulsion/HV status frame. The other three
    /// lights keep their values.
    pub fn record_propulsion(&mut self, propulsion: LightState, high_voltage: LightState) {
        self.set_decoded(LightId::Propulsion, propulsion);
        self.set_decoded(LightId::HighVoltage, high_voltage);
    }

    /// Record the decoded ADAS status frame. Propulsion and HV keep their
    /// values.
    pub fn record_adas(&mut self, longitudinal: LightState, lateral: LightState, v2x: LightState) {
        self.set_decoded(LightId::LongitudinalControl, longitudinal);
        self.set_decoded(LightId::LateralControl, lateral);
        self.set_decoded(LightId::V2xControl, v2x);
    }

    fn set_decoded(&mut self, id: LightId, state: LightState) {
        // Units are laid out in `LightId::ALL` order.
        self.units[id as usize].decoded = state;
    }

    pub fn decoded(&self, id: LightId) -> LightState {
        self.units[id as usize].decoded
    }

    pub fn pins(&self) -> [u8; LIGHT_COUNT] {
        let mut pins = [0u8; LIGHT_COUNT];
        for (slot, unit) in pins.iter_mut().zip(&self.units) {
            *slot = unit.pin;
        }
        pins
    }

    /// Drive every output to its inactive level once and reset the flash
    /// phase. Run on a lost transition (so fail-safe toggling starts
    /// phase-aligned) and on a restored transition (neutral baseline before
    /// newly decoded values are applied).
    pub fn extinguish<IO: DigitalIo>(&mut self, io: &mut IO) -> Result<(), GpioError> {
        self.flash_phase = false;
        for unit in &mut self.units {
            io.write_output(unit.pin, Level::Low)?;
            unit.applied = Some(LightState::Off);
        }
        Ok(())
    }

    /// Apply targets to the outputs. A light's output is written only when
    /// its target differs from what was last applied, except `Flashing`,
    /// which is re-applied every cycle at the shared phase - that is what
    /// produces the flashing effect at the control-loop period.
    pub fn apply<IO: DigitalIo>(&mut self, io: &mut IO, fail_safe: bool) -> Result<(), GpioError> {
        self.flash_phase = !self.flash_phase;
        let phase = self.flash_phase;
        for unit in &mut self.units {
            let target = if fail_safe {
                LightState::Flashing
            } else {
                unit.decoded
            };
            if unit.applied != Some(target) || target == LightState::Flashing {
                let level = match target {
                    LightState::Off => Level::Low,
                    LightState::On => Level::High,
                    LightState::Flashing => Level::from(phase),
                };
                io.write_output(unit.pin, level)?;
                unit.applied = Some(target);
                trace!(light = ?unit.id, state = ?target, ?level, "output updated");
            }
        }
        Ok(())
    }
}
