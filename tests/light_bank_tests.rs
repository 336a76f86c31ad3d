use lightsbus::gpio::{Level, MockPins, MockPinsHandle};
use lightsbus::lights::{LightBank, LightId, LightPins, LightState};

const PINS: LightPins = LightPins {
    propulsion: 23,
    high_voltage: 24,
    longitudinal: 12,
    lateral: 16,
    v2x: 7,
};

fn bank() -> (LightBank, MockPins, MockPinsHandle) {
    let io = MockPins::new();
    let handle = io.handle();
    (LightBank::new(&PINS), io, handle)
}

fn all_outputs(handle: &MockPinsHandle) -> [Level; 5] {
    [
        handle.output(PINS.propulsion),
        handle.output(PINS.high_voltage),
        handle.output(PINS.longitudinal),
        handle.output(PINS.lateral),
        handle.output(PINS.v2x),
    ]
}

#[test]
fn raw_value_domain_is_exactly_off_on_flashing() {
    assert_eq!(LightState::from_raw(0), Some(LightState::Off));
    assert_eq!(LightState::from_raw(1), Some(LightState::On));
    assert_eq!(LightState::from_raw(2), Some(LightState::Flashing));
    // Out-of-range values are rejected, never clamped.
    assert_eq!(LightState::from_raw(3), None);
}

#[test]
fn idle_bank_writes_nothing() {
    let (mut bank, mut io, handle) = bank();

    // Everything starts off and stays off: no output writes at all.
    for _ in 0..5 {
        bank.apply(&mut io, false).unwrap();
    }
    assert!(handle.writes().is_empty());
}

#[test]
fn steady_states_written_only_on_change() {
    let (mut bank, mut io, handle) = bank();

    bank.record_propulsion(LightState::On, LightState::Off);
    bank.apply(&mut io, false).unwrap();
    assert_eq!(handle.writes(), vec![(PINS.propulsion, Level::High)]);

    // Unchanged targets are not re-written.
    bank.apply(&mut io, false).unwrap();
    bank.apply(&mut io, false).unwrap();
    assert_eq!(handle.writes().len(), 1);

    bank.record_propulsion(LightState::Off, LightState::Off);
    bank.apply(&mut io, false).unwrap();
    assert_eq!(handle.writes().len(), 2);
    assert_eq!(handle.output(PINS.propulsion), Level::Low);
}

#[test]
fn flashing_light_toggles_every_cycle() {
    let (mut bank, mut io, handle) = bank();

    bank.record_propulsion(LightState::Flashing, LightState::Off);

    bank.apply(&mut io, false).unwrap();
    let first = handle.output(PINS.propulsion);
    bank.apply(&mut io, false).unwrap();
    let second = handle.output(PINS.propulsion);
    bank.apply(&mut io, false).unwrap();
    let third = handle.output(PINS.propulsion);

    // The cadence is the control-loop period itself.
    assert_ne!(first, second);
    assert_eq!(first, third);
    assert_eq!(handle.writes().len(), 3);
}

#[test]
fn fail_safe_forces_all_lights_flashing_in_lockstep() {
    let (mut bank, mut io, handle) = bank();

    bank.record_propulsion(LightState::On, LightState::Off);
    bank.record_adas(LightState::Off, LightState::On, LightState::Off);

    bank.apply(&mut io, true).unwrap();
    let first = all_outputs(&handle);
    assert!(first.iter().all(|&level| level == first[0]));

    bank.apply(&mut io, true).unwrap();
    let second = all_outputs(&handle);
    assert!(second.iter().all(|&level| level == second[0]));
    assert_ne!(first[0], second[0]);
}

#[test]
fn extinguish_resynchronizes_the_bank() {
    let (mut bank, mut io, handle) = bank();

    bank.apply(&mut io, true).unwrap();
    bank.apply(&mut io, true).unwrap();

    bank.extinguish(&mut io).unwrap();
    assert!(all_outputs(&handle).iter().all(|&level| level == Level::Low));

    // The first post-reset fail-safe cycle raises every light together.
    bank.apply(&mut io, true).unwrap();
    assert!(all_outputs(&handle)
        .iter()
        .all(|&level| level == Level::High));
}

#[test]
fn decoded_values_survive_a_fail_safe_episode() {
    let (mut bank, mut io, handle) = bank();

    bank.record_adas(LightState::On, LightState::Off, LightState::On);
    bank.apply(&mut io, false).unwrap();

    // A fail-safe episode overrides the outputs but not the decoded state.
    for _ in 0..3 {
        bank.apply(&mut io, true).unwrap();
    }
    assert_eq!(bank.decoded(LightId::LongitudinalControl), LightState::On);

    bank.extinguish(&mut io).unwrap();
    bank.apply(&mut io, false).unwrap();
    assert_eq!(handle.output(PINS.longitudinal), Level::High);
    assert_eq!(handle.output(PINS.lateral), Level::Low);
    assert_eq!(handle.output(PINS.v2x), Level::High);
}
