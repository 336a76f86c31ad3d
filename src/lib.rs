//! # Vehicle Lights-and-Switches Node
//!
//! Control-node library for a vehicle CAN network: mirrors the state of the
//! driver switches onto the bus at a fixed cadence and drives the physical
//! status indicator lights from status frames published by other nodes, with
//! a defined fail-safe (all lights flashing) when those frames stop arriving
//! or stop decoding.
//!
//! ## Architecture
//!
//! - [`bus`] - frame types and the serialized transport contract
//! - [`schema`] - message-schema resource and signal-level codec
//! - [`gpio`] - digital pin contract for switches and lights
//! - [`watchdog`] - communication-loss watchdog and fail-safe derivation
//! - [`lights`] - governed light bank and output application
//! - [`switches`] - governed switch bank and sampling
//! - [`node`] - the two worker loops and the shutdown sequence
//! - [`config`] - node configuration with deployed defaults
//!
//! Two workers run for the lifetime of the process: the light-state
//! controller (sole consumer of inbound frames, sole owner of watchdog and
//! light state) and the switch publisher. Every transport access from either
//! worker is serialized through a single mutex, because the transport handle
//! is not safe for uncoordinated concurrent use.

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bus;
pub mod config;
pub mod gpio;
pub mod lights;
pub mod node;
pub mod schema;
pub mod switches;
pub mod watchdog;

// Re-export main public types for convenience
pub use bus::{BusError, BusFrame, BusTransport, MockBus};
pub use config::NodeConfig;
pub use gpio::{DigitalIo, Level, MockPins};
pub use lights::{LightBank, LightId, LightState};
pub use node::{LightController, NodeError, SwitchPublisher};
pub use schema::MessageSchema;
pub use switches::{SwitchBank, SwitchSample};
pub use watchdog::{LinkActivity, LinkTransition, LinkWatchdog};
