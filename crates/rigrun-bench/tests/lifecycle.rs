//! Engine lifecycle tests driven by scripted devices.
//!
//! The rig is minimal: a scripted source wired into a scripted plant. What
//! matters here is not signal flow but the order and timing of driver
//! calls, and how the run reacts when a stage misbehaves.

use rigrun_bench::{Behavior, ScriptHandle, ScriptedDriver};
use rigrun_core::{CommandRegistry, DeviceRegistry, ExecutionConfig, Test};
use rigrun_proto::{
    CommandInfo, ConnectionInfo, DeviceInfo, ElectricalInterface, PhaseInfo, PortInfo, Range,
    Severity, SignalInfo, TargetInfo, TestInfo, TestbedInfo,
};
use serde_json::json;
use tokio::time::{Duration, Instant};

const SCRIPT_IMPLEMENTATION: &str = "bench.script";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn range(min: f64, max: f64) -> Range {
    Range::new(min, max).unwrap()
}

fn scripted_bed() -> TestbedInfo {
    let source = DeviceInfo::new(
        "source",
        SCRIPT_IMPLEMENTATION,
        ElectricalInterface::new(vec![PortInfo::new("out", "ao0", range(0.0, 5.0))]),
    );
    let plant = DeviceInfo::new(
        "plant",
        SCRIPT_IMPLEMENTATION,
        ElectricalInterface::new(vec![PortInfo::new("in", "in0", range(0.0, 5.0))]),
    );
    TestbedInfo::new(
        vec![source, plant],
        vec![ConnectionInfo::new("source", "out", "plant", "in")],
    )
}

/// One phase driving `plant.in` with a single set at `time`.
fn single_set_test(duration: f64, time: f64) -> TestInfo {
    let targets = vec![TargetInfo::new(
        "plant",
        vec![SignalInfo::new("in", range(0.0, 10.0))],
    )];
    let phases = vec![PhaseInfo::new(
        duration,
        vec![CommandInfo::new(time, "set-signal", "plant")
            .with_data(json!({ "signal": "in", "value": 5.0 }))],
    )];
    TestInfo::new(targets, vec![], phases)
}

fn registry_for(script: &ScriptHandle) -> DeviceRegistry {
    let mut registry = DeviceRegistry::new();
    ScriptedDriver::register(&mut registry, SCRIPT_IMPLEMENTATION, script);
    registry
}

fn build(test: &TestInfo, script: &ScriptHandle, config: ExecutionConfig) -> Test {
    Test::build(
        test,
        &scripted_bed(),
        &registry_for(script),
        &CommandRegistry::default(),
        config,
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_stages_run_in_order_through_a_clean_pass() {
    init_tracing();
    let script = ScriptHandle::new();
    let test = build(
        &single_set_test(0.2, 0.05),
        &script,
        ExecutionConfig::default(),
    );

    let report = test.execute().await;

    assert!(!report.failed(), "run failed:\n{}", report.what());
    assert!(report.results.is_empty());
    assert_eq!(
        script.ops(),
        vec!["open", "open", "setup", "setup", "set_signal", "close", "close"]
    );

    // 2 opens + 2 setups + 1 command + 2 closes.
    assert_eq!(report.logbook.len(), 7);
    let command = report
        .logbook
        .iter()
        .find(|e| e.what.contains("set_signal"))
        .unwrap();
    let data = command.data.as_ref().unwrap();
    let submitted = data["submitted_at"].as_f64().unwrap();
    assert!((0.05..0.052).contains(&submitted));
    assert!(data["completed_at"].as_f64().unwrap() >= submitted);
}

#[tokio::test(start_paused = true)]
async fn test_setup_panic_skips_to_closing_the_devices() {
    init_tracing();
    let script = ScriptHandle::new();
    script.set(
        "setup",
        Behavior::Reply(Severity::Panic, "interlock refused to arm".to_string()),
    );
    let test = build(
        &single_set_test(0.2, 0.05),
        &script,
        ExecutionConfig::default(),
    );

    let report = test.execute().await;

    assert!(report.failed());
    assert!(report.results.is_empty());
    let ops = script.ops();
    assert!(!ops.contains(&"set_signal".to_string()));
    assert_eq!(ops.iter().filter(|op| *op == "close").count(), 2);
    assert!(report
        .logbook
        .iter()
        .any(|e| e.severity == Severity::Panic && e.what == "interlock refused to arm"));
}

#[tokio::test(start_paused = true)]
async fn test_commands_fire_on_time_and_never_early() {
    init_tracing();
    let script = ScriptHandle::new();
    let test = build(
        &single_set_test(0.2, 0.05),
        &script,
        ExecutionConfig::default(),
    );

    let origin = Instant::now();
    test.execute().await;

    let calls = script.calls();
    let set = calls.iter().find(|c| c.op == "set_signal").unwrap();
    assert_eq!(set.device, "source");
    let delay = set.at.duration_since(origin);
    assert!(delay >= Duration::from_millis(50), "issued early: {delay:?}");
    assert!(delay <= Duration::from_millis(52), "issued late: {delay:?}");
}

#[tokio::test(start_paused = true)]
async fn test_hung_command_panics_after_its_timeout() {
    init_tracing();
    let script = ScriptHandle::new();
    script.set("set_signal", Behavior::Hang);
    let config = ExecutionConfig {
        default_timeout: 0.2,
        ..ExecutionConfig::default()
    };
    let test = build(&single_set_test(0.5, 0.05), &script, config);

    let report = test.execute().await;

    assert!(report.failed());
    let timeout = report
        .logbook
        .iter()
        .find(|e| e.severity == Severity::Panic)
        .unwrap();
    assert!(timeout.what.contains("timed out waiting for"));
    assert!(timeout.what.contains("set_signal on source"));
    // The run aborted, but the devices were still closed.
    assert_eq!(
        script.ops().iter().filter(|op| *op == "close").count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_command_overtaken_by_the_end_of_test_warns() {
    init_tracing();
    let script = ScriptHandle::new();
    // Heartbeat so coarse the 0.08 s slot falls between the last tick at
    // 0.05 s and the end of the 0.1 s phase.
    let config = ExecutionConfig {
        heartbeat: 0.05,
        ..ExecutionConfig::default()
    };
    let test = build(&single_set_test(0.1, 0.08), &script, config);

    let report = test.execute().await;

    assert!(!report.failed());
    assert!(!script.ops().contains(&"set_signal".to_string()));
    let warning = report
        .logbook
        .iter()
        .find(|e| e.severity == Severity::Warning)
        .unwrap();
    assert!(warning.what.contains("never issued before the test ended"));
    assert!(warning.what.contains("set plant.in to 5"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_device_reply_is_collected_on_a_later_tick() {
    init_tracing();
    let script = ScriptHandle::new();
    script.set(
        "set_signal",
        Behavior::DelayThen(
            Duration::from_millis(30),
            Severity::Info,
            "relay settled".to_string(),
        ),
    );
    let test = build(
        &single_set_test(0.2, 0.05),
        &script,
        ExecutionConfig::default(),
    );

    let report = test.execute().await;

    assert!(!report.failed(), "run failed:\n{}", report.what());
    let entry = report
        .logbook
        .iter()
        .find(|e| e.what == "relay settled")
        .unwrap();
    let data = entry.data.as_ref().unwrap();
    let submitted = data["submitted_at"].as_f64().unwrap();
    let completed = data["completed_at"].as_f64().unwrap();
    assert!((completed - submitted) >= 0.03);
    assert!((completed - submitted) <= 0.035);
}
