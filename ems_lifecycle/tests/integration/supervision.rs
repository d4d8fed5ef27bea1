//! Supervisory inputs: start/stop requests, pinned policies, forced states
//! and grid-mode changes on a running inverter.

use std::time::Duration;

use ems_common::lifecycle::config::BatteryInverterConfig;
use ems_common::lifecycle::state::{GridMode, LifecycleState, StartStop, StartStopConfig};
use ems_lifecycle::context::{Clock, ManualClock};
use ems_lifecycle::device::{BatteryInverter, InverterState};
use ems_lifecycle::sim::InverterModel;

struct Rig {
    inverter: BatteryInverter,
    model: InverterModel,
    clock: ManualClock,
}

impl Rig {
    fn new(start_stop: StartStopConfig) -> Self {
        let inverter = BatteryInverter::new(BatteryInverterConfig {
            id: "inverter0".into(),
            start_stop,
            grid_mode: GridMode::OnGrid,
            step_timeout_s: 30,
            power_saving_delay_s: 0,
            error_cool_down_s: 120,
        })
        .expect("inverter");
        Self {
            inverter,
            model: InverterModel::new(),
            clock: ManualClock::new(),
        }
    }

    fn step(&mut self) -> LifecycleState {
        let now = self.clock.now();
        self.model.update(now);
        let cmd = self.inverter.cycle(now, self.model.readings(), 1000);
        self.model.apply(&cmd, now);
        self.clock.advance_secs(1);
        self.inverter.state()
    }

    /// Distinct states visited over `cycles` cycles.
    fn trace(&mut self, cycles: usize) -> Vec<LifecycleState> {
        let mut states: Vec<LifecycleState> = Vec::new();
        for _ in 0..cycles {
            let state = self.step();
            if states.last() != Some(&state) {
                states.push(state);
            }
        }
        states
    }

    fn until_running(&mut self) {
        for _ in 0..30 {
            if self.step() == LifecycleState::Running {
                return;
            }
        }
        panic!("inverter stuck in {}", self.inverter.debug_log());
    }
}

#[test]
fn stop_request_stops_and_start_request_restarts() {
    let mut rig = Rig::new(StartStopConfig::Auto);
    rig.inverter.set_start_stop(StartStop::Start);
    rig.until_running();

    rig.inverter.set_start_stop(StartStop::Stop);
    use LifecycleState::*;
    assert_eq!(rig.trace(10), [Undefined, GoStopped, Stopped]);
    assert_eq!(rig.inverter.lifecycle().published(), StartStop::Stop);
    assert_eq!(rig.model.readings().state, Some(InverterState::Standby));
    assert!(!rig.inverter.allows_power());

    rig.inverter.set_start_stop(StartStop::Start);
    assert_eq!(rig.trace(15), [Undefined, GoRunning, Running]);
    assert_eq!(rig.inverter.lifecycle().published(), StartStop::Start);
    assert_eq!(rig.model.readings().state, Some(InverterState::Running));
}

#[test]
fn repeated_request_does_not_restart() {
    let mut rig = Rig::new(StartStopConfig::Auto);
    rig.inverter.set_start_stop(StartStop::Start);
    rig.until_running();

    rig.inverter.set_start_stop(StartStop::Start);
    assert_eq!(rig.inverter.lifecycle().machine().pending_override(), None);
    assert_eq!(rig.trace(5), [LifecycleState::Running]);
}

#[test]
fn pinned_stop_policy_ignores_start_request() {
    let mut rig = Rig::new(StartStopConfig::Stop);
    rig.inverter.set_start_stop(StartStop::Start);

    assert_eq!(rig.inverter.lifecycle().requested(), StartStop::Start);
    assert_eq!(rig.inverter.lifecycle().target(), StartStop::Stop);

    let states = rig.trace(10);
    assert!(!states.contains(&LifecycleState::GoRunning), "{states:?}");
    assert_eq!(states.last(), Some(&LifecycleState::Stopped));
    assert_eq!(rig.inverter.lifecycle().published(), StartStop::Stop);
}

#[test]
fn forced_error_runs_the_full_cool_down() {
    let mut rig = Rig::new(StartStopConfig::Start);
    rig.until_running();

    rig.inverter.lifecycle_mut().force_next_state(LifecycleState::Error);
    assert_eq!(rig.step(), LifecycleState::Error);
    let entered = rig.clock.elapsed() - Duration::from_secs(1);

    while rig.clock.elapsed() < entered + Duration::from_secs(120) {
        assert_eq!(rig.step(), LifecycleState::Error);
    }
    assert_eq!(rig.step(), LifecycleState::Undefined);
    assert_eq!(rig.step(), LifecycleState::GoRunning);
}

#[test]
fn grid_mode_change_reruns_bring_up() {
    let mut rig = Rig::new(StartStopConfig::Start);
    rig.until_running();

    rig.inverter.set_grid_mode(GridMode::OffGrid);
    assert_eq!(rig.inverter.grid_mode(), GridMode::OffGrid);

    use LifecycleState::*;
    assert_eq!(rig.trace(20), [Undefined, GoRunning, Running]);
    assert_eq!(rig.model.readings().grid_mode, Some(GridMode::OffGrid));
}
