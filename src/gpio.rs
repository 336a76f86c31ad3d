//! Digital pin contract and backends.
//!
//! The node reads four switch inputs (pull-up biased, electrically high when
//! idle) and drives five light outputs. [`DigitalIo`] is the whole contract;
//! the Raspberry Pi backend lives behind the `gpio` feature and [`MockPins`]
//! serves tests and simulation-mode runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("pin {0} is not configured")]
    UnknownPin(u8),
    #[error("pin driver fault: {0}")]
    Driver(String),
}

/// Electrical level of a digital pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Digital I/O driver contract.
///
/// Sampling and driving pins is purely local I/O, independent of bus
/// contention; callers never hold the bus coordinator around these calls.
pub trait DigitalIo: Send + Sync {
    fn read_input(&self, pin: u8) -> Result<Level, GpioError>;
    fn write_output(&mut self, pin: u8, level: Level) -> Result<(), GpioError>;
}

impl DigitalIo for Box<dyn DigitalIo> {
    fn read_input(&self, pin: u8) -> Result<Level, GpioError> {
        (**self).read_input(pin)
    }

    fn write_output(&mut self, pin: u8, level: Level) -> Result<(), GpioError> {
        (**self).write_output(pin, level)
    }
}

#[derive(Debug, Default)]
struct MockPinState {
    inputs: HashMap<u8, Level>,
    outputs: HashMap<u8, Level>,
    writes: Vec<(u8, Level)>,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-memory pin bank for tests and simulation-mode runs.
///
/// Inputs float high until set, matching the pull-up bias of the switch
/// lines; outputs start low, matching initialization of the light lines.
#[derive(Debug, Default)]
pub struct MockPins {
    state: Arc<Mutex<MockPinState>>,
}

impl MockPins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle for poking inputs and observing outputs while the pin
    /// bank itself is owned by the node.
    pub fn handle(&self) -> MockPinsHandle {
        MockPinsHandle {
            state: Arc::clone(&self.state),
        }
    }
}

/// Test-side view of a [`MockPins`].
#[derive(Debug, Clone)]
pub struct MockPinsHandle {
    state: Arc<Mutex<MockPinState>>,
}

impl MockPinsHandle {
    pub fn set_input(&self, pin: u8, level: Level) {
        self.state.lock().unwrap().inputs.insert(pin, level);
    }

    pub fn output(&self, pin: u8) -> Level {
        *self
            .state
            .lock()
            .unwrap()
            .outputs
            .get(&pin)
            .unwrap_or(&Level::Low)
    }

    /// Every `write_output` call in order, including re-writes of the same
    /// level.
    pub fn writes(&self) -> Vec<(u8, Level)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }
}

impl DigitalIo for MockPins {
    fn read_input(&self, pin: u8) -> Result<Level, GpioError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(GpioError::Driver("scripted read fault".into()));
        }
        Ok(*state.inputs.get(&pin).unwrap_or(&Level::High))
    }

    fn write_output(&mut self, pin: u8, level: Level) -> Result<(), GpioError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(GpioError::Driver("scripted write fault".into()));
        }
        state.outputs.insert(pin, level);
        state.writes.push((pin, level));
        Ok(())
    }
}

/// Raspberry Pi pin bank.
#[cfg(all(target_os = "linux", feature = "gpio"))]
pub use self::rpi::RpPins;

#[cfg(all(target_os = "linux", feature = "gpio"))]
mod rpi {
    use super::{DigitalIo, GpioError, Level};
    use rppal::gpio::Gpio;
    use std::collections::HashMap;
    use tracing::debug;

    pub struct RpPins {
        inputs: HashMap<u8, rppal::gpio::InputPin>,
        outputs: HashMap<u8, rppal::gpio::OutputPin>,
    }

    impl RpPins {
        /// Claim the given BCM pins: inputs with the internal pull-up,
        /// outputs driven low.
        pub fn configure(input_pins: &[u8], output_pins: &[u8]) -> Result<Self, GpioError> {
            let gpio = Gpio::new().map_err(|e| GpioError::Driver(e.to_string()))?;
            let mut inputs = HashMap::new();
            for &pin in input_pins {
                let claimed = gpio
                    .get(pin)
                    .map_err(|e| GpioError::Driver(format!("input pin {pin}: {e}")))?
                    .into_input_pullup();
                inputs.insert(pin, claimed);
            }
            let mut outputs = HashMap::new();
            for &pin in output_pins {
                let claimed = gpio
                    .get(pin)
                    .map_err(|e| GpioError::Driver(format!("output pin {pin}: {e}")))?
                    .into_output_low();
                outputs.insert(pin, claimed);
            }
            debug!(
                inputs = input_pins.len(),
                outputs = output_pins.len(),
                "GPIO pins claimed"
            );
            Ok(Self { inputs, outputs })
        }
    }

    impl DigitalIo for RpPins {
        fn read_input(&self, pin: u8) -> Result<Level, GpioError> {
            let claimed = self.inputs.get(&pin).ok_or(GpioError::UnknownPin(pin))?;
            Ok(match claimed.read() {
                rppal::gpio::Level::High => Level::High,
                rppal::gpio::Level::Low => Level::Low,
            })
        }

        fn write_output(&mut self, pin: u8, level: Level) -> Result<(), GpioError> {
            let claimed = self
                .outputs
                .get_mut(&pin)
                .ok_or(GpioError::UnknownPin(pin))?;
            match level {
                Level::High => claimed.set_high(),
                Level::Low => claimed.set_low(),
            }
            Ok(())
        }
    }
}
