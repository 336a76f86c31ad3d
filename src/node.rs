//! The two worker loops and the node lifecycle.
//!
//! The light-state controller is the sole consumer of inbound frames and the
//! sole owner of the watchdog and light state. The switch publisher samples
//! and transmits independently. Both route every transport operation through
//! one shared mutex (the bus access coordinator); nothing else ever holds
//! it. No fairness is guaranteed between the workers - a receive holding the
//! coordinator for its full bounded wait delays switch publication by up to
//! that bound, which is an accepted property of the design.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, BusFrame, BusTransport};
use crate::config::{FrameIds, Timing};
use crate::gpio::{DigitalIo, GpioError, Level};
use crate::lights::{LightBank, LightPins, LightState};
use crate::schema::{self, MessageSchema, SchemaError};
use crate::switches::{SwitchBank, SwitchPins, SwitchSample};
use crate::watchdog::{LinkActivity, LinkTransition, LinkWatchdog};

/// The bus access coordinator: one mutual-exclusion region around the
/// transport handle, shared by both workers.
pub type SharedBus = Arc<Mutex<Box<dyn BusTransport>>>;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Gpio(#[from] GpioError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Decoded content of one inbound lights frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LightUpdate {
    Propulsion {
        propulsion: LightState,
        high_voltage: LightState,
    },
    Adas {
        longitudinal: LightState,
        lateral: LightState,
        v2x: LightState,
    },
}

/// Consumes inbound frames and drives the five governed light outputs.
pub struct LightController<IO: DigitalIo> {
    schema: Arc<MessageSchema>,
    frames: FrameIds,
    bank: LightBank,
    watchdog: LinkWatchdog,
    io: IO,
}

impl<IO: DigitalIo> LightController<IO> {
    pub fn new(
        schema: Arc<MessageSchema>,
        frames: FrameIds,
        pins: &LightPins,
        io: IO,
        comm_timeout: Duration,
        now: Instant,
    ) -> Self {
        Self {
            schema,
            frames,
            bank: LightBank::new(pins),
            watchdog: LinkWatchdog::new(comm_timeout, now),
            io,
        }
    }

    /// Run one control cycle against a completed receive outcome (`None`
    /// means the bounded wait elapsed without a frame).
    ///
    /// A decode failure - including an out-of-range value - poisons trust in
    /// the bus as a whole: fail-safe is entered for all five lights, not
    /// just the ones the failed frame would have updated. Pin faults
    /// propagate; continuing with an unwritable output would silently defeat
    /// the fail-safe guarantee.
    pub fn step(&mut self, frame: Option<&BusFrame>, now: Instant) -> Result<(), GpioError> {
        match frame {
            Some(frame) => match self.decode_lights(frame) {
                Ok(update) => {
                    if self.watchdog.observe(LinkActivity::ValidFrame, now)
                        == Some(LinkTransition::Restored)
                    {
                        info!("communication restored");
                        // Neutral baseline first, so the newly decoded values
                        // are applied from a known all-off state.
                        self.bank.extinguish(&mut self.io)?;
                    }
                    match update {
                        LightUpdate::Propulsion {
                            propulsion,
                            high_voltage,
                        } => {
                            self.bank.record_propulsion(propulsion, high_voltage);
                            debug!(?propulsion, ?high_voltage, "propulsion/HV lights updated");
                        }
                        LightUpdate::Adas {
                            longitudinal,
                            lateral,
                            v2x,
                        } => {
                            self.bank.record_adas(longitudinal, lateral, v2x);
                            debug!(?longitudinal, ?lateral, ?v2x, "ADAS lights updated");
                        }
                    }
                }
                Err(e) => {
                    warn!(id = frame.id(), "undecodable frame: {e}");
                    self.watchdog.observe(LinkActivity::UndecodableFrame, now);
                }
            },
            None => {
                if self.watchdog.observe(LinkActivity::Silence, now)
                    == Some(LinkTransition::Lost)
                {
                    warn!(
                        timeout = ?self.watchdog.timeout(),
                        "communication lost; all lights entering fail-safe"
                    );
                    // One synchronized all-off so fail-safe flashing starts
                    // phase-aligned across the bank.
                    self.bank.extinguish(&mut self.io)?;
                }
            }
        }
        self.bank.apply(&mut self.io, self.watchdog.fail_safe_active())
    }

    fn decode_lights(&self, frame: &BusFrame) -> Result<LightUpdate, SchemaError> {
        let values = self.schema.decode(frame.id(), frame.data())?;
        let state_of = |name: &str| -> Result<LightState, SchemaError> {
            let raw = values
                .get(name)
                .copied()
                .ok_or_else(|| SchemaError::UnknownSignal {
                    message: format!("0x{:03X}", frame.id()),
                    signal: name.to_string(),
                })?;
            LightState::from_raw(raw).ok_or(SchemaError::OutOfRange {
                signal: name.to_string(),
                value: raw,
            })
        };
        if frame.id() == self.frames.psc_lights {
            Ok(LightUpdate::Propulsion {
                propulsion: state_of(schema::SIG_PROPULSION_LIGHT)?,
                high_voltage: state_of(schema::SIG_HV_LIGHT)?,
            })
        } else if frame.id() == self.frames.adas_lights {
            Ok(LightUpdate::Adas {
                longitudinal: state_of(schema::SIG_LONG_CTRL_LIGHT)?,
                lateral: state_of(schema::SIG_LAT_CTRL_LIGHT)?,
                v2x: state_of(schema::SIG_V2X_LIGHT)?,
            })
        } else {
            // The transport filter should make this unreachable.
            Err(SchemaError::UnknownFrame(frame.id()))
        }
    }

    pub fn watchdog(&self) -> &LinkWatchdog {
        &self.watchdog
    }

    pub fn bank(&self) -> &LightBank {
        &self.bank
    }

    /// Shutdown sweep: drive each light low with a settle delay between
    /// pins, so the whole bank never switches in the same instant.
    pub async fn extinguish_staggered(&mut self, settle: Duration) -> Result<(), GpioError> {
        for pin in self.bank.pins() {
            self.io.write_output(pin, Level::Low)?;
            sleep(settle).await;
        }
        Ok(())
    }
}

/// What became of one publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    SentAfterRetry,
    Dropped,
}

/// Samples the governed switches and publishes their status frame.
pub struct SwitchPublisher<IO: DigitalIo> {
    schema: Arc<MessageSchema>,
    frame_id: u32,
    bank: SwitchBank,
    io: IO,
    backoff: Duration,
}

impl<IO: DigitalIo> SwitchPublisher<IO> {
    pub fn new(
        schema: Arc<MessageSchema>,
        frame_id: u32,
        pins: SwitchPins,
        io: IO,
        backoff: Duration,
    ) -> Self {
        Self {
            schema,
            frame_id,
            bank: SwitchBank::new(pins),
            io,
            backoff,
        }
    }

    /// Sample all four switches fresh; nothing carries over between cycles.
    pub fn sample(&self) -> Result<SwitchSample, GpioError> {
        self.bank.sample(&self.io)
    }

    pub fn encode(&self, sample: &SwitchSample) -> Result<BusFrame, NodeError> {
        let data = self.schema.encode(self.frame_id, &sample.signal_values())?;
        Ok(BusFrame::new(self.frame_id, data)?)
    }

    /// Transmit under an already-held coordinator guard. Backpressure gets
    /// exactly one retry after the backoff, still under the same guard so no
    /// receive can interleave; any other send fault drops immediately. A
    /// dropped frame is never queued - the next cycle samples fresh.
    pub async fn publish(&self, bus: &mut dyn BusTransport, frame: &BusFrame) -> PublishOutcome {
        match bus.send(frame).await {
            Ok(()) => PublishOutcome::Sent,
            Err(BusError::Backlogged) => {
                sleep(self.backoff).await;
                match bus.send(frame).await {
                    Ok(()) => {
                        debug!("switch frame sent after backoff");
                        PublishOutcome::SentAfterRetry
                    }
                    Err(e) => {
                        warn!("dropping switch frame after retry: {e}");
                        PublishOutcome::Dropped
                    }
                }
            }
            Err(e) => {
                warn!("dropping switch frame: {e}");
                PublishOutcome::Dropped
            }
        }
    }
}

/// Light-state controller worker. Returns the controller on shutdown so the
/// caller can run the final all-off sweep with its pin driver.
pub async fn run_light_worker<IO: DigitalIo>(
    mut controller: LightController<IO>,
    bus: SharedBus,
    timing: Timing,
    shutdown: watch::Receiver<bool>,
) -> Result<LightController<IO>, NodeError> {
    info!("light-state controller running");
    while !*shutdown.borrow() {
        {
            // One full cycle under the coordinator: bounded receive,
            // watchdog transition, decode, output application.
            let mut bus = bus.lock().await;
            let frame = match bus.recv(timing.recv_wait()).await {
                Ok(frame) => frame,
                Err(e) => {
                    // Transient receive faults degrade to "nothing arrived";
                    // the watchdog's silence accounting covers the rest.
                    warn!("receive fault: {e}");
                    None
                }
            };
            controller.step(frame.as_ref(), Instant::now())?;
        }
        sleep(timing.light_pause()).await;
    }
    info!("light-state controller stopped");
    Ok(controller)
}

/// Switch publisher worker.
pub async fn run_switch_worker<IO: DigitalIo>(
    publisher: SwitchPublisher<IO>,
    bus: SharedBus,
    timing: Timing,
    shutdown: watch::Receiver<bool>,
) -> Result<(), NodeError> {
    info!("switch publisher running");
    while !*shutdown.borrow() {
        // Sampling is local I/O; the coordinator is held only for the send.
        let sample = publisher.sample()?;
        match publisher.encode(&sample) {
            Ok(frame) => {
                let mut bus = bus.lock().await;
                publisher.publish(&mut **bus, &frame).await;
            }
            Err(e) => error!("failed to encode switch frame: {e}"),
        }
        sleep(timing.publish_pause()).await;
    }
    info!("switch publisher stopped");
    Ok(())
}

/// Process-wide shutdown: lights to their inactive level (staggered), then
/// the transport closed. A close failure is logged, never escalated.
pub async fn shutdown_node<IO: DigitalIo>(
    controller: &mut LightController<IO>,
    bus: &SharedBus,
    timing: &Timing,
) {
    info!("driving all lights to their inactive level");
    if let Err(e) = controller
        .extinguish_staggered(timing.shutdown_settle())
        .await
    {
        error!("failed to extinguish lights during shutdown: {e}");
    }
    let mut bus = bus.lock().await;
    if let Err(e) = bus.close().await {
        warn!("failed to close bus transport: {e}");
    }
}
