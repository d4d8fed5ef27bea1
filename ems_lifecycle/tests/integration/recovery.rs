//! Fault handling and the timed ERROR cool-down, end to end.

use std::time::Duration;

use ems_common::lifecycle::config::{BatteryConfig, ChargePointConfig};
use ems_common::lifecycle::flags::StatusFlags;
use ems_common::lifecycle::state::{LifecycleState, Phases, StartStopConfig};
use ems_lifecycle::context::{Clock, ManualClock};
use ems_lifecycle::device::{Battery, BatteryReadings, ChargePoint, ChargePointReadings, ChargeRequest};
use ems_lifecycle::sim::ChargePointModel;

const REQUEST: ChargeRequest = ChargeRequest {
    current_ma: 10_000,
    phases: Phases::Three,
};

fn charge_point() -> ChargePoint {
    ChargePoint::new(ChargePointConfig {
        id: "evcs0".into(),
        start_stop: StartStopConfig::Start,
        phase_switching: false,
        min_current_ma: 6000,
        max_current_ma: 16000,
        start_timeout_s: 60,
        phase_switch_dead_time_s: 30,
        phase_switch_settle_s: 1,
        phase_switch_timeout_s: 600,
        error_cool_down_s: 120,
    })
    .expect("charge point")
}

struct Station {
    cp: ChargePoint,
    model: ChargePointModel,
    clock: ManualClock,
}

impl Station {
    fn new() -> Self {
        Self {
            cp: charge_point(),
            model: ChargePointModel::new(),
            clock: ManualClock::new(),
        }
    }

    /// One cycle, optionally with a fault reported, then advance 1 s.
    fn step(&mut self, faulted: bool) -> LifecycleState {
        let now = self.clock.now();
        self.model.update(now);
        let readings = ChargePointReadings {
            faulted,
            ..self.model.readings()
        };
        let cmd = self.cp.cycle(now, readings, REQUEST);
        self.model.apply(&cmd, now);
        self.clock.advance_secs(1);
        self.cp.state()
    }
}

#[test]
fn fault_cools_down_then_restarts() {
    let mut station = Station::new();
    for _ in 0..10 {
        station.step(false);
    }
    assert_eq!(station.cp.state(), LifecycleState::Running);

    assert_eq!(station.step(true), LifecycleState::Undefined);
    assert_eq!(station.step(true), LifecycleState::Error);
    let entered = station.clock.elapsed() - Duration::from_secs(1);

    // Fault already gone; the cool-down still has to run out.
    while station.clock.elapsed() < entered + Duration::from_secs(120) {
        assert_eq!(station.step(false), LifecycleState::Error);
    }
    assert_eq!(station.step(false), LifecycleState::Undefined);
    assert_eq!(station.step(false), LifecycleState::GoRunning);
    assert_eq!(station.step(false), LifecycleState::Running);
}

#[test]
fn persisting_fault_keeps_cycling_through_error() {
    let mut station = Station::new();
    for _ in 0..10 {
        station.step(false);
    }

    let mut states = Vec::new();
    for _ in 0..200 {
        let state = station.step(true);
        if states.last() != Some(&state) {
            states.push(state);
        }
    }
    use LifecycleState::*;
    assert_eq!(states, [Undefined, Error, Undefined, Error]);
}

#[test]
fn battery_start_timeout_retries_after_cool_down() {
    let clock = ManualClock::new();
    let mut battery = Battery::new(BatteryConfig {
        id: "battery0".into(),
        start_stop: StartStopConfig::Start,
        start_up_relay: Some("io0/Relay4".into()),
        error_cool_down_s: 30,
        max_start_time_s: 60,
    })
    .expect("battery");

    // Relay follows its command, the BMS never takes control.
    let mut relay = false;
    let mut cycle = |battery: &mut Battery| {
        let readings = BatteryReadings {
            bms_control: Some(false),
            start_up_relay: Some(relay),
            faulted: false,
        };
        let cmd = battery.cycle(clock.now(), readings);
        if let Some(on) = cmd.start_up_relay {
            relay = on;
        }
        clock.advance_secs(1);
        battery.state()
    };

    for _ in 0..60 {
        assert_eq!(cycle(&mut battery), LifecycleState::GoRunning);
    }
    assert_eq!(battery.debug_log(), "GoRunning-WaitForBmsControl");
    assert_eq!(cycle(&mut battery), LifecycleState::Error);
    assert!(battery.status_flags().contains(StatusFlags::START_TIMEOUT));

    for _ in 0..29 {
        assert_eq!(cycle(&mut battery), LifecycleState::Error);
    }
    assert_eq!(cycle(&mut battery), LifecycleState::Undefined);
    assert_eq!(cycle(&mut battery), LifecycleState::GoRunning);
    assert_eq!(battery.debug_log(), "GoRunning-WaitForSwitchOn");
}
