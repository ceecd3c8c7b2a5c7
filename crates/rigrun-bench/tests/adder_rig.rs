//! End-to-end runs against a virtual adder rig.
//!
//! Two stimulus sources drive the adder's inputs, the adder's sum output
//! feeds a DAQ, and the engine logs the sum back in physical units. The
//! ranges are picked so electrical addition reproduces physical addition
//! exactly: inputs map 0..100 onto 0..5 V and the sum maps 0..200 onto
//! 0..10 V.

use rigrun_bench::{register_builtin, SignalHub, INSTRUMENT_IMPLEMENTATION};
use rigrun_core::{CommandRegistry, DeviceRegistry, ExecutionConfig, Test};
use rigrun_proto::timeseries::{assert_almost_everywhere_close, DEFAULT_ATOL, DEFAULT_RTOL};
use rigrun_proto::{
    CommandInfo, ConnectionInfo, DeviceInfo, ElectricalInterface, InterpolationKind, LoggingInfo,
    PhaseInfo, PortInfo, Range, Severity, SignalInfo, TargetInfo, TestInfo, TestbedInfo,
    TimeSeries,
};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn range(min: f64, max: f64) -> Range {
    Range::new(min, max).unwrap()
}

/// A single-output stimulus source idling at `volts`.
fn source(name: &str, volts: f64) -> DeviceInfo {
    DeviceInfo::new(
        name,
        INSTRUMENT_IMPLEMENTATION,
        ElectricalInterface::new(vec![PortInfo::new("out", "ao0", range(0.0, 5.0))]),
    )
    .with_params(json!({ "initial": { "out": volts } }))
}

/// gpio_a and gpio_b drive the adder; the adder's sum lands on the DAQ.
/// Both sources idle at 2.5 V, physically 50 + 50.
fn adder_bed() -> TestbedInfo {
    let adder = DeviceInfo::new(
        "adder",
        INSTRUMENT_IMPLEMENTATION,
        ElectricalInterface::new(vec![
            PortInfo::new("val1", "in0", range(0.0, 5.0)),
            PortInfo::new("val2", "in1", range(0.0, 5.0)),
            PortInfo::new("sum", "out0", range(0.0, 10.0)),
        ]),
    )
    .with_params(json!({ "sums": [{ "output": "sum", "inputs": ["val1", "val2"] }] }));
    let daq = DeviceInfo::new(
        "daq",
        INSTRUMENT_IMPLEMENTATION,
        ElectricalInterface::new(vec![PortInfo::new("input", "ai0", range(0.0, 10.0))]),
    );
    TestbedInfo::new(
        vec![source("gpio_a", 2.5), source("gpio_b", 2.5), adder, daq],
        vec![
            ConnectionInfo::new("gpio_a", "out", "adder", "val1"),
            ConnectionInfo::new("gpio_b", "out", "adder", "val2"),
            ConnectionInfo::new("adder", "sum", "daq", "input"),
        ],
    )
}

fn adder_target() -> TargetInfo {
    TargetInfo::new(
        "adder",
        vec![
            SignalInfo::new("val1", range(0.0, 100.0)),
            SignalInfo::new("val2", range(0.0, 100.0)),
            SignalInfo::new("sum", range(0.0, 200.0)),
        ],
    )
}

fn run_setup(bed: &TestbedInfo) -> (SignalHub, DeviceRegistry, CommandRegistry) {
    let hub = SignalHub::from_testbed(bed).unwrap();
    let mut devices = DeviceRegistry::new();
    register_builtin(&mut devices, &hub);
    (hub, devices, CommandRegistry::default())
}

/// A constant-level series, for comparing trace windows against.
fn level(value: f64) -> TimeSeries {
    TimeSeries::new(vec![0.0], vec![value], InterpolationKind::Previous).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_adder_rig_records_the_summed_signal() {
    init_tracing();
    let test = TestInfo::new(
        vec![adder_target()],
        vec![LoggingInfo::new("adder", "sum", 0.1)],
        vec![PhaseInfo::new(
            5.0,
            vec![
                CommandInfo::new(1.0, "set-signal", "adder")
                    .with_data(json!({ "signal": "val1", "value": 75.0 })),
                CommandInfo::new(2.0, "set-signal", "adder")
                    .with_data(json!({ "signal": "val2", "value": 25.0 })),
            ],
        )],
    );
    let bed = adder_bed();
    let (hub, devices, commands) = run_setup(&bed);
    let test = Test::build(&test, &bed, &devices, &commands, ExecutionConfig::default()).unwrap();

    hub.start();
    let report = test.execute().await;

    assert!(!report.failed(), "run failed:\n{}", report.what());
    assert_eq!(report.results.len(), 1);
    let sum = report.result("adder.sum").unwrap();
    assert_eq!(sum.kind(), InterpolationKind::Previous);
    assert_eq!(sum.lower(), 0.0);
    assert!(sum.upper() >= 4.9);

    // 50 + 50 initially, val1 → 75 at 1 s, val2 → 25 at 2 s. Windows stay
    // clear of the bench settling ticks around each step.
    for (lower, upper, expected) in [(0.2, 0.9, 100.0), (1.2, 1.9, 125.0), (2.2, 4.8, 100.0)] {
        assert_almost_everywhere_close(sum, &level(expected), lower, upper, DEFAULT_RTOL, DEFAULT_ATOL);
    }
}

#[tokio::test(start_paused = true)]
async fn test_ramp_command_sweeps_the_sum() {
    init_tracing();
    let test = TestInfo::new(
        vec![adder_target()],
        vec![LoggingInfo::new("adder", "sum", 0.1)],
        vec![PhaseInfo::new(
            4.0,
            vec![CommandInfo::new(1.0, "set-signal-ramp", "adder").with_data(json!({
                "signal": "val1", "start": 50.0, "slope": 25.0, "duration": 2.0
            }))],
        )],
    );
    let bed = adder_bed();
    let (hub, devices, commands) = run_setup(&bed);
    let test = Test::build(&test, &bed, &devices, &commands, ExecutionConfig::default()).unwrap();

    hub.start();
    let report = test.execute().await;

    assert!(!report.failed(), "run failed:\n{}", report.what());
    let sum = report.result("adder.sum").unwrap();

    // Sum ramps 100 → 150 over [1, 3], then holds. Mid-ramp the sampled
    // staircase lags the true line by at most a few bench grains.
    assert_almost_everywhere_close(sum, &level(100.0), 0.2, 0.9, DEFAULT_RTOL, DEFAULT_ATOL);
    assert!((sum.eval(2.0) - 125.0).abs() < 1.5);
    assert_almost_everywhere_close(sum, &level(150.0), 3.2, 3.9, DEFAULT_RTOL, DEFAULT_ATOL);
}

#[tokio::test(start_paused = true)]
async fn test_unroutable_logging_request_fails_alone() {
    init_tracing();
    // "spare" is a declared target signal, but nothing in the bed carries
    // it onward, so its request cannot resolve to a logging device.
    let target = TargetInfo::new(
        "adder",
        vec![
            SignalInfo::new("val1", range(0.0, 100.0)),
            SignalInfo::new("val2", range(0.0, 100.0)),
            SignalInfo::new("sum", range(0.0, 200.0)),
            SignalInfo::new("spare", range(0.0, 1.0)),
        ],
    );
    let test = TestInfo::new(
        vec![target],
        vec![
            LoggingInfo::new("adder", "spare", 0.1),
            LoggingInfo::new("adder", "sum", 0.1),
        ],
        vec![PhaseInfo::new(1.0, vec![])],
    );
    let bed = adder_bed();
    let (hub, devices, commands) = run_setup(&bed);
    let test = Test::build(&test, &bed, &devices, &commands, ExecutionConfig::default()).unwrap();

    hub.start();
    let report = test.execute().await;

    assert!(report.failed());
    let failures: Vec<_> = report
        .logbook
        .iter()
        .filter(|e| e.severity >= Severity::Failed)
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].what.contains("cannot log adder.spare"));

    // The healthy request still delivered its trace.
    assert_eq!(report.results.len(), 1);
    let sum = report.result("adder.sum").unwrap();
    assert_almost_everywhere_close(sum, &level(100.0), 0.2, 0.9, DEFAULT_RTOL, DEFAULT_ATOL);
}
