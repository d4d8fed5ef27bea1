//! Charge-point phase switching against the simulated station.

use std::time::Instant;

use ems_common::lifecycle::config::ChargePointConfig;
use ems_common::lifecycle::flags::StatusFlags;
use ems_common::lifecycle::state::{LifecycleState, Phases, StartStopConfig};
use ems_lifecycle::context::{Clock, ManualClock};
use ems_lifecycle::device::{ChargeMode, ChargePoint, ChargePointCommands, ChargeRequest};
use ems_lifecycle::sim::ChargePointModel;

fn config(phase_switching: bool) -> ChargePointConfig {
    ChargePointConfig {
        id: "evcs0".into(),
        start_stop: StartStopConfig::Start,
        phase_switching,
        min_current_ma: 6000,
        max_current_ma: 16000,
        start_timeout_s: 60,
        phase_switch_dead_time_s: 30,
        phase_switch_settle_s: 1,
        phase_switch_timeout_s: 600,
        error_cool_down_s: 120,
    }
}

fn request(phases: Phases) -> ChargeRequest {
    ChargeRequest {
        current_ma: 10_000,
        phases,
    }
}

fn step(
    cp: &mut ChargePoint,
    model: &mut ChargePointModel,
    now: Instant,
    request: ChargeRequest,
) -> ChargePointCommands {
    model.update(now);
    let cmd = cp.cycle(now, model.readings(), request);
    model.apply(&cmd, now);
    cmd
}

/// Bring the station up and let it charge on three phases.
fn charging(cp: &mut ChargePoint, model: &mut ChargePointModel, clock: &ManualClock) {
    for _ in 0..10 {
        step(cp, model, clock.now(), request(Phases::Three));
        clock.advance_secs(1);
    }
    assert_eq!(cp.state(), LifecycleState::Running);
    assert_eq!(model.readings().mode, Some(ChargeMode::Charging));
}

#[test]
fn switch_walks_every_step_and_resumes_charging() {
    let clock = ManualClock::new();
    let mut cp = ChargePoint::new(config(true)).expect("charge point");
    let mut model = ChargePointModel::new();
    charging(&mut cp, &mut model, &clock);

    let mut seen = vec![cp.debug_log()];
    for _ in 0..300 {
        step(&mut cp, &mut model, clock.now(), request(Phases::Single));
        let log = cp.debug_log();
        if seen.last() != Some(&log) {
            seen.push(log);
        }
        clock.advance_secs(1);
    }

    assert_eq!(
        seen,
        [
            "Running",
            "Running-StopCharging",
            "Running-SwitchPhases",
            "Running-ResumeCharging",
            "Running",
        ]
    );
    let readings = model.readings();
    assert_eq!(readings.phases, Some(Phases::Single));
    assert_eq!(readings.mode, Some(ChargeMode::Charging));
    assert!(!cp.status_flags().contains(StatusFlags::PHASE_SWITCH_FAILED));
    assert!(!cp.status_flags().contains(StatusFlags::PHASE_SWITCHING));
}

#[test]
fn switch_holds_charging_off_during_dead_time() {
    let clock = ManualClock::new();
    let mut cp = ChargePoint::new(config(true)).expect("charge point");
    let mut model = ChargePointModel::new();
    charging(&mut cp, &mut model, &clock);

    for _ in 0..30 {
        let cmd = step(&mut cp, &mut model, clock.now(), request(Phases::Single));
        assert_eq!(cmd.enable, Some(false));
        assert_eq!(cp.debug_log(), "Running-StopCharging");
        assert!(cp.status_flags().contains(StatusFlags::PHASE_SWITCHING));
        clock.advance_secs(1);
    }
}

#[test]
fn station_without_switch_keeps_charging() {
    let clock = ManualClock::new();
    let mut cp = ChargePoint::new(config(false)).expect("charge point");
    let mut model = ChargePointModel::new();
    charging(&mut cp, &mut model, &clock);

    for _ in 0..60 {
        let cmd = step(&mut cp, &mut model, clock.now(), request(Phases::Single));
        assert_eq!(cmd.enable, Some(true));
        assert_eq!(cmd.phases, None);
        assert_eq!(cp.debug_log(), "Running");
        clock.advance_secs(1);
    }
    assert_eq!(model.readings().phases, Some(Phases::Three));
}
