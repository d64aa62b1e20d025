//! Full three-mote runs through the public API.

use motesim_common::SimTime;
use motesim_model::RunConfig;
use motesim_mote::DeviceTimings;
use motesim_runner::{load_trace, run_simulation, RunSummary};
use std::io::Write;

fn conservation_holds(summary: &RunSummary) -> bool {
    summary.metrics.forwarded + summary.metrics.total_dropped() == summary.metrics.total_offered
}

#[test]
fn test_default_run_conserves_packets() {
    let config = RunConfig {
        seed: 42,
        ..RunConfig::default()
    };
    let summary = run_simulation(&config, &DeviceTimings::default()).unwrap();

    // 100 pps over 10 s, minus the tail margin the generator leaves.
    assert!(
        (950..=1000).contains(&summary.metrics.total_offered),
        "offered {}",
        summary.metrics.total_offered
    );
    assert!(conservation_holds(&summary), "summary: {summary}");
    // At 10 ms spacing the pipelines never contend for long.
    assert!(summary.delivery_ratio > 0.95, "summary: {summary}");
    assert_eq!(
        summary.metrics.intra_stack_delays.len() as u64,
        summary.metrics.forwarded
    );
}

#[test]
fn test_identical_seeds_reproduce_the_run() {
    let config = RunConfig {
        seed: 7,
        ..RunConfig::default()
    };
    let first = run_simulation(&config, &DeviceTimings::default()).unwrap();
    let second = run_simulation(&config, &DeviceTimings::default()).unwrap();

    assert_eq!(first.metrics, second.metrics);
    assert_eq!(first.events_processed, second.events_processed);
}

#[test]
fn test_overload_without_cca_counts_every_loss() {
    let config = RunConfig {
        seed: 3,
        duration: SimTime::from_secs(5.0),
        pps: 1000.0,
        cca_enabled: false,
        ..RunConfig::default()
    };
    let summary = run_simulation(&config, &DeviceTimings::default()).unwrap();

    assert!(summary.metrics.total_offered > 3000);
    assert!(summary.metrics.total_dropped() > 0, "summary: {summary}");
    assert!(conservation_holds(&summary), "summary: {summary}");
}

#[test]
fn test_suppressed_transmission_delivers_everything() {
    let config = RunConfig {
        seed: 9,
        duration: SimTime::from_secs(2.0),
        suppress_transmission: true,
        ..RunConfig::default()
    };
    let summary = run_simulation(&config, &DeviceTimings::default()).unwrap();

    assert!(summary.metrics.total_offered > 0);
    assert_eq!(summary.metrics.forwarded, summary.metrics.total_offered);
}

#[test]
fn test_trace_driven_run_offers_planned_frames() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    // Three widely spaced frames, times relative to the first.
    writeln!(file, "5000\n0\n25000\n10\n45000\n20").unwrap();
    let schedule = load_trace(file.path()).unwrap();

    let config = RunConfig {
        seed: 5,
        duration: SimTime::from_secs(1.0),
        schedule: Some(schedule),
        ..RunConfig::default()
    };
    let summary = run_simulation(&config, &DeviceTimings::default()).unwrap();

    assert_eq!(summary.metrics.total_offered, 3);
    assert_eq!(summary.metrics.forwarded, 3);
}

#[test]
fn test_summary_json_round_trip() {
    let config = RunConfig {
        seed: 1,
        duration: SimTime::from_secs(1.0),
        ..RunConfig::default()
    };
    let summary = run_simulation(&config, &DeviceTimings::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summary.json");
    std::fs::write(&path, serde_json::to_string_pretty(&summary).unwrap()).unwrap();

    let loaded: RunSummary =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(loaded, summary);
}
