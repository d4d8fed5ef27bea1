//! Bring-up of the relay battery and the inverter against their models.

use std::time::{Duration, Instant};

use ems_common::lifecycle::config::{BatteryConfig, BatteryInverterConfig};
use ems_common::lifecycle::flags::StatusFlags;
use ems_common::lifecycle::state::{GridMode, LifecycleState, StartStop, StartStopConfig};
use ems_lifecycle::context::{Clock, ManualClock};
use ems_lifecycle::device::{Battery, BatteryInverter, InverterState};
use ems_lifecycle::sim::{BatteryModel, InverterModel};

fn battery_config() -> BatteryConfig {
    BatteryConfig {
        id: "battery0".into(),
        start_stop: StartStopConfig::Start,
        start_up_relay: Some("io0/Relay4".into()),
        error_cool_down_s: 120,
        max_start_time_s: 120,
    }
}

fn inverter_config() -> BatteryInverterConfig {
    BatteryInverterConfig {
        id: "inverter0".into(),
        start_stop: StartStopConfig::Start,
        grid_mode: GridMode::OnGrid,
        step_timeout_s: 30,
        power_saving_delay_s: 60,
        error_cool_down_s: 120,
    }
}

#[test]
fn battery_pulses_start_up_relay_then_runs() {
    let clock = ManualClock::new();
    let mut battery = Battery::new(battery_config()).expect("battery");
    let mut model = BatteryModel::new();
    let mut relay_writes = Vec::new();

    for _ in 0..10 {
        let now = clock.now();
        model.update(now);
        let cmd = battery.cycle(now, model.readings());
        model.apply(&cmd, now);
        if let Some(on) = cmd.start_up_relay {
            relay_writes.push(on);
        }
        if battery.state() == LifecycleState::Running {
            break;
        }
        assert!(!battery.allows_power(), "power allowed in {}", battery.debug_log());
        clock.advance_secs(1);
    }

    assert_eq!(battery.state(), LifecycleState::Running);
    assert!(battery.allows_power());
    let first_close = relay_writes.iter().position(|&on| on).expect("relay closed");
    let first_open = relay_writes.iter().position(|&on| !on).expect("relay opened");
    assert!(first_close < first_open, "{relay_writes:?}");
    assert!(!model.readings().start_up_relay.unwrap_or(true));
    assert!(battery.status_flags().is_empty());
}

#[test]
fn battery_publishes_start_only_while_running() {
    let clock = ManualClock::new();
    let mut battery = Battery::new(battery_config()).expect("battery");
    let mut model = BatteryModel::new();

    while battery.state() != LifecycleState::Running {
        assert_ne!(battery.lifecycle().published(), StartStop::Start);
        let now = clock.now();
        model.update(now);
        let cmd = battery.cycle(now, model.readings());
        model.apply(&cmd, now);
        clock.advance_secs(1);
        assert!(clock.elapsed() < Duration::from_secs(30));
    }

    let now = clock.now();
    model.update(now);
    battery.cycle(now, model.readings());
    assert_eq!(battery.lifecycle().published(), StartStop::Start);
}

/// One inverter cycle against the model.
fn step(
    inverter: &mut BatteryInverter,
    model: &mut InverterModel,
    now: Instant,
    setpoint_w: i32,
) -> ems_lifecycle::device::InverterCommands {
    model.update(now);
    let cmd = inverter.cycle(now, model.readings(), setpoint_w);
    model.apply(&cmd, now);
    cmd
}

#[test]
fn inverter_wakes_sets_grid_mode_and_starts() {
    let clock = ManualClock::new();
    let mut inverter = BatteryInverter::new(inverter_config()).expect("inverter");
    let mut model = InverterModel::new();
    let mut sub_states = Vec::new();

    for _ in 0..30 {
        step(&mut inverter, &mut model, clock.now(), 2000);
        let log = inverter.debug_log();
        if sub_states.last() != Some(&log) {
            sub_states.push(log);
        }
        if inverter.state() == LifecycleState::Running {
            break;
        }
        clock.advance_secs(1);
    }

    assert_eq!(inverter.state(), LifecycleState::Running);
    assert_eq!(
        sub_states,
        [
            "GoRunning-WakeUp",
            "GoRunning-SetGridMode",
            "GoRunning-StartInverter",
            "Running",
        ]
    );
    assert_eq!(model.readings().state, Some(InverterState::Running));

    clock.advance_secs(1);
    let cmd = step(&mut inverter, &mut model, clock.now(), 2000);
    assert_eq!(cmd.active_power_w, Some(2000));
    assert_eq!(cmd.run, Some(true));
}

#[test]
fn inverter_sleeps_on_zero_setpoint_and_wakes_again() {
    let clock = ManualClock::new();
    let mut inverter = BatteryInverter::new(inverter_config()).expect("inverter");
    let mut model = InverterModel::new();

    while inverter.state() != LifecycleState::Running {
        step(&mut inverter, &mut model, clock.now(), 0);
        clock.advance_secs(1);
        assert!(clock.elapsed() < Duration::from_secs(30));
    }

    for _ in 0..65 {
        step(&mut inverter, &mut model, clock.now(), 0);
        clock.advance_secs(1);
    }
    assert_eq!(inverter.debug_log(), "Running-PowerSaving");
    assert!(inverter.status_flags().contains(StatusFlags::POWER_SAVING));
    assert_eq!(model.readings().state, Some(InverterState::Sleeping));

    let cmd = step(&mut inverter, &mut model, clock.now(), 1500);
    assert_eq!(inverter.debug_log(), "Running");
    assert_eq!(cmd.wake, Some(true));
    assert_eq!(cmd.active_power_w, Some(1500));

    for _ in 0..10 {
        clock.advance_secs(1);
        step(&mut inverter, &mut model, clock.now(), 1500);
        assert_eq!(inverter.state(), LifecycleState::Running);
    }
    assert_eq!(model.readings().state, Some(InverterState::Running));
    assert!(!inverter.status_flags().contains(StatusFlags::POWER_SAVING));
}
