//! Configuration file to running agent: load, validate, build, tick.

use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;

use ems_common::config::{ConfigError, ConfigLoader};
use ems_common::lifecycle::config::AgentConfig;
use ems_common::lifecycle::flags::StatusFlags;
use ems_common::lifecycle::state::LifecycleState;
use ems_lifecycle::component::Device;
use ems_lifecycle::context::ManualClock;
use ems_lifecycle::cycle::CycleRunner;
use ems_lifecycle::sim::build_devices;
use tempfile::NamedTempFile;

const AGENT_TOML: &str = r#"
cycle_time_ms = 10

[shared]
service_name = "ems-agent-test"
log_level = "debug"

[[battery]]
id = "battery0"
start_up_relay = "io0/Relay4"

[[battery_inverter]]
id = "inverter0"
grid_mode = "on_grid"

[[charge_point]]
id = "evcs0"
phase_switching = true

[[test_rig]]
id = "rig0"
"#;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(text.as_bytes()).expect("write config");
    file
}

#[test]
fn config_file_to_running_devices() {
    let file = write_config(AGENT_TOML);
    let config = AgentConfig::load(file.path()).expect("load");
    config.validate().expect("valid config");
    assert_eq!(config.device_count(), 4);

    let clock = Rc::new(ManualClock::new());
    let devices = build_devices(&config).expect("devices");
    let mut runner =
        CycleRunner::new(devices, Box::new(clock.clone()), config.cycle_time()).expect("runner");

    for _ in 0..30 {
        runner.tick_all();
        clock.advance_secs(1);
    }

    for device in runner.devices() {
        assert_eq!(
            device.state(),
            LifecycleState::Running,
            "{} stuck in {}",
            device.id(),
            device.debug_log()
        );
        assert!(!device.status_flags().contains(StatusFlags::RUN_FAILED));
    }
}

#[test]
fn runner_stops_after_requested_cycles() {
    let config = AgentConfig::from_toml(AGENT_TOML).expect("parse");
    let devices = build_devices(&config).expect("devices");
    let mut runner = CycleRunner::new(
        devices,
        Box::new(Rc::new(ManualClock::new())),
        config.cycle_time(),
    )
    .expect("runner");

    let running = AtomicBool::new(true);
    runner.run(&running, Some(3)).expect("run");

    let stats = runner.stats();
    assert_eq!(stats.cycle_count, 3);
    assert!(stats.min_or_zero() <= stats.avg_cycle_ns());
    assert!(stats.avg_cycle_ns() <= stats.max_cycle_ns);
}

#[test]
fn duplicate_device_ids_are_rejected() {
    let text = format!("{AGENT_TOML}\n[[test_rig]]\nid = \"battery0\"\n");
    let config = AgentConfig::from_toml(&text).expect("parse");
    match config.validate() {
        Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("battery0"), "{msg}"),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn out_of_range_cycle_time_is_rejected() {
    let text = AGENT_TOML.replace("cycle_time_ms = 10", "cycle_time_ms = 1");
    let config = AgentConfig::from_toml(&text).expect("parse");
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ValidationError(_))
    ));
}

#[test]
fn missing_config_file() {
    let result = AgentConfig::load(Path::new("/nonexistent/ems/agent.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound)));
}
