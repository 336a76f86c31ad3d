//! Node daemon: open the bus and pin driver, run the two workers, and hold
//! the main thread on the termination signal.

use std::process;
use std::sync::Arc;
use std::time::Instant;

use clap::{App, Arg};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use lightsbus::bus::{BusError, BusFilter, BusTransport};
use lightsbus::config::NodeConfig;
use lightsbus::gpio::{DigitalIo, GpioError};
use lightsbus::node::{self, LightController, SharedBus, SwitchPublisher};
use lightsbus::schema::MessageSchema;

// Fatal startup faults get distinct exit statuses.
const EXIT_BUS_UNAVAILABLE: i32 = 1;
const EXIT_BAD_CONFIG: i32 = 2;
const EXIT_PINS_UNAVAILABLE: i32 = 3;
const EXIT_WORKER_FAULT: i32 = 4;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let matches = App::new("lightsbusd")
        .version("0.1.0")
        .about("Vehicle lights-and-switches control node")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Node configuration file (YAML)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("interface")
                .short("i")
                .long("interface")
                .value_name("IFACE")
                .help("CAN interface override")
                .takes_value(true),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => match NodeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("failed to load configuration {path}: {e}");
                process::exit(EXIT_BAD_CONFIG);
            }
        },
        None => NodeConfig::default(),
    };
    if let Some(interface) = matches.value_of("interface") {
        config.interface = interface.to_string();
    }

    // A node without a usable schema cannot honor its own fail-safe
    // contract, so a load failure is fatal.
    let schema = match MessageSchema::from_file(&config.schema_path) {
        Ok(schema) => Arc::new(schema),
        Err(e) => {
            error!(
                "failed to load message schema {}: {e}",
                config.schema_path.display()
            );
            process::exit(EXIT_BAD_CONFIG);
        }
    };

    let filters = [
        BusFilter::exact(config.frames.psc_lights),
        BusFilter::exact(config.frames.adas_lights),
    ];
    let bus: SharedBus = match open_bus(&config, &filters) {
        Ok(bus) => Arc::new(Mutex::new(bus)),
        Err(e) => {
            error!("CAN bus unavailable on {}: {e}", config.interface);
            process::exit(EXIT_BUS_UNAVAILABLE);
        }
    };

    let (light_io, switch_io) = match open_pins(&config) {
        Ok(pair) => pair,
        Err(e) => {
            error!("pin driver unavailable: {e}");
            process::exit(EXIT_PINS_UNAVAILABLE);
        }
    };

    let controller = LightController::new(
        Arc::clone(&schema),
        config.frames,
        &config.lights,
        light_io,
        config.timing.comm_timeout(),
        Instant::now(),
    );
    let publisher = SwitchPublisher::new(
        Arc::clone(&schema),
        config.frames.switch_status,
        config.switches,
        switch_io,
        config.timing.send_backoff(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut light_task = tokio::spawn(node::run_light_worker(
        controller,
        Arc::clone(&bus),
        config.timing,
        shutdown_rx.clone(),
    ));
    let mut switch_task = tokio::spawn(node::run_switch_worker(
        publisher,
        Arc::clone(&bus),
        config.timing,
        shutdown_rx,
    ));

    info!(interface = %config.interface, "node running");

    // The main thread does no work beyond waiting for termination - either
    // the interrupt signal or a worker dying on a fatal fault.
    let mut exit_code = 0;
    let mut controller_back = None;
    let mut light_done = false;
    let mut switch_done = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; shutting down");
        }
        result = &mut light_task => {
            light_done = true;
            exit_code = EXIT_WORKER_FAULT;
            match result {
                Ok(Ok(controller)) => {
                    error!("light-state controller exited unexpectedly");
                    controller_back = Some(controller);
                }
                Ok(Err(e)) => error!("light-state controller fault: {e}"),
                Err(e) => error!("light-state controller panicked: {e}"),
            }
        }
        result = &mut switch_task => {
            switch_done = true;
            exit_code = EXIT_WORKER_FAULT;
            match result {
                Ok(Ok(())) => error!("switch publisher exited unexpectedly"),
                Ok(Err(e)) => error!("switch publisher fault: {e}"),
                Err(e) => error!("switch publisher panicked: {e}"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    if !light_done {
        match light_task.await {
            Ok(Ok(controller)) => controller_back = Some(controller),
            Ok(Err(e)) => {
                error!("light-state controller fault: {e}");
                exit_code = EXIT_WORKER_FAULT;
            }
            Err(e) => {
                error!("light-state controller panicked: {e}");
                exit_code = EXIT_WORKER_FAULT;
            }
        }
    }
    if !switch_done {
        match switch_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("switch publisher fault: {e}");
                exit_code = EXIT_WORKER_FAULT;
            }
            Err(e) => {
                error!("switch publisher panicked: {e}");
                exit_code = EXIT_WORKER_FAULT;
            }
        }
    }

    match controller_back {
        Some(mut controller) => {
            node::shutdown_node(&mut controller, &bus, &config.timing).await;
        }
        None => {
            // The controller died with its pin driver; the transport can
            // still be closed cleanly.
            let mut bus = bus.lock().await;
            if let Err(e) = bus.close().await {
                warn!("failed to close bus transport: {e}");
            }
        }
    }

    info!("node stopped");
    process::exit(exit_code);
}

#[cfg(all(target_os = "linux", feature = "can-linux"))]
fn open_bus(config: &NodeConfig, filters: &[BusFilter]) -> Result<Box<dyn BusTransport>, BusError> {
    Ok(Box::new(lightsbus::bus::SocketCanBus::open(
        &config.interface,
        filters,
    )?))
}

#[cfg(not(all(target_os = "linux", feature = "can-linux")))]
fn open_bus(config: &NodeConfig, filters: &[BusFilter]) -> Result<Box<dyn BusTransport>, BusError> {
    warn!(
        "SocketCAN support not compiled in; {} runs in simulation mode",
        config.interface
    );
    Ok(Box::new(lightsbus::bus::MockBus::new(filters.to_vec())))
}

#[cfg(all(target_os = "linux", feature = "gpio"))]
fn open_pins(config: &NodeConfig) -> Result<(Box<dyn DigitalIo>, Box<dyn DigitalIo>), GpioError> {
    let lights = config.lights;
    let switches = config.switches;
    let light_io = lightsbus::gpio::RpPins::configure(
        &[],
        &[
            lights.propulsion,
            lights.high_voltage,
            lights.longitudinal,
            lights.lateral,
            lights.v2x,
        ],
    )?;
    let switch_io = lightsbus::gpio::RpPins::configure(
        &[
            switches.regen_braking,
            switches.longitudinal,
            switches.lateral,
            switches.v2x,
        ],
        &[],
    )?;
    Ok((Box::new(light_io), Box::new(switch_io)))
}

#[cfg(not(all(target_os = "linux", feature = "gpio")))]
fn open_pins(_config: &NodeConfig) -> Result<(Box<dyn DigitalIo>, Box<dyn DigitalIo>), GpioError> {
    warn!("GPIO support not compiled in; pins run in simulation mode");
    Ok((
        Box::new(lightsbus::gpio::MockPins::new()),
        Box::new(lightsbus::gpio::MockPins::new()),
    ))
}
