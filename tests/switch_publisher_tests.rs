use std::sync::Arc;
use std::time::Duration;

use lightsbus::bus::{MockBus, SendFault};
use lightsbus::gpio::{Level, MockPins, MockPinsHandle};
use lightsbus::node::{PublishOutcome, SwitchPublisher};
use lightsbus::schema::MessageSchema;
use lightsbus::switches::SwitchPins;

const SWITCH_STATUS_ID: u32 = 0x702;

fn publisher() -> (SwitchPublisher<MockPins>, MockPinsHandle) {
    let path = format!("{}/config/messages.yaml", env!("CARGO_MANIFEST_DIR"));
    let schema = Arc::new(MessageSchema::from_file(path).unwrap());
    let io = MockPins::new();
    let handle = io.handle();
    let publisher = SwitchPublisher::new(
        schema,
        SWITCH_STATUS_ID,
        SwitchPins::default(),
        io,
        Duration::from_millis(5),
    );
    (publisher, handle)
}

#[test]
fn idle_switches_publish_all_zero() {
    let (publisher, _handle) = publisher();

    // Pull-up biased inputs float high when nothing is pressed.
    let sample = publisher.sample().unwrap();
    assert!(!sample.regen_braking);
    assert!(!sample.longitudinal);
    assert!(!sample.lateral);
    assert!(!sample.v2x);

    let frame = publisher.encode(&sample).unwrap();
    assert_eq!(frame.id(), SWITCH_STATUS_ID);
    assert!(frame.data().iter().all(|&b| b == 0));
}

#[test]
fn every_switch_combination_maps_low_to_logical_one() {
    let (publisher, handle) = publisher();
    let pins = SwitchPins::default();

    for combo in 0u8..16 {
        let regen = combo & 0b0001 != 0;
        let long = combo & 0b0010 != 0;
        let lat = combo & 0b0100 != 0;
        let v2x = combo & 0b1000 != 0;

        // Actuated means pulled low.
        let level = |active: bool| if active { Level::Low } else { Level::High };
        handle.set_input(pins.regen_braking, level(regen));
        handle.set_input(pins.longitudinal, level(long));
        handle.set_input(pins.lateral, level(lat));
        handle.set_input(pins.v2x, level(v2x));

        let sample = publisher.sample().unwrap();
        assert_eq!(sample.regen_braking, regen);
        assert_eq!(sample.longitudinal, long);
        assert_eq!(sample.lateral, lat);
        assert_eq!(sample.v2x, v2x);

        let frame = publisher.encode(&sample).unwrap();
        assert_eq!(frame.data()[0], combo);
    }
}

#[test]
fn sampling_fault_is_surfaced() {
    let (publisher, handle) = publisher();

    handle.fail_reads(true);
    assert!(publisher.sample().is_err());
}

#[tokio::test]
async fn clean_send_publishes_one_frame() {
    let (publisher, _handle) = publisher();
    let mut bus = MockBus::new(vec![]);
    let bus_handle = bus.handle();

    let frame = publisher.encode(&publisher.sample().unwrap()).unwrap();
    let outcome = publisher.publish(&mut bus, &frame).await;

    assert_eq!(outcome, PublishOutcome::Sent);
    assert_eq!(bus_handle.sent_frames(), vec![frame]);
    assert_eq!(bus_handle.send_attempts(), 1);
}

#[tokio::test]
async fn backpressure_retry_puts_exactly_one_frame_on_the_bus() {
    let (publisher, _handle) = publisher();
    let mut bus = MockBus::new(vec![]);
    let bus_handle = bus.handle();
    bus_handle.fail_next_send(SendFault::Backlogged);

    let frame = publisher.encode(&publisher.sample().unwrap()).unwrap();
    let outcome = publisher.publish(&mut bus, &frame).await;

    // Not zero, not two: the failed attempt plus one successful retry.
    assert_eq!(outcome, PublishOutcome::SentAfterRetry);
    assert_eq!(bus_handle.sent_frames().len(), 1);
    assert_eq!(bus_handle.send_attempts(), 2);
}

#[tokio::test]
async fn persistent_backpressure_drops_the_frame() {
    let (publisher, _handle) = publisher();
    let mut bus = MockBus::new(vec![]);
    let bus_handle = bus.handle();
    bus_handle.fail_next_send(SendFault::Backlogged);
    bus_handle.fail_next_send(SendFault::Backlogged);

    let frame = publisher.encode(&publisher.sample().unwrap()).unwrap();
    let outcome = publisher.publish(&mut bus, &frame).await;

    // One retry, then the frame is gone; nothing is queued for later.
    assert_eq!(outcome, PublishOutcome::Dropped);
    assert!(bus_handle.sent_frames().is_empty());
    assert_eq!(bus_handle.send_attempts(), 2);
}

#[tokio::test]
async fn non_backpressure_fault_drops_without_retry() {
    let (publisher, _handle) = publisher();
    let mut bus = MockBus::new(vec![]);
    let bus_handle = bus.handle();
    bus_handle.fail_next_send(SendFault::Fault);

    let frame = publisher.encode(&publisher.sample().unwrap()).unwrap();
    let outcome = publisher.publish(&mut bus, &frame).await;

    assert_eq!(outcome, PublishOutcome::Dropped);
    assert!(bus_handle.sent_frames().is_empty());
    assert_eq!(bus_handle.send_attempts(), 1);
}
