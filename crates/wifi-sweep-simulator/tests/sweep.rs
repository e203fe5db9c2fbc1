use anyhow::anyhow;
use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use wifi_sweep_abstract::{OutputFormat, PhyConfig, SweepConfig, Vector3, WifiStandard};
use wifi_sweep_simulator::analysis::analyze_file;
use wifi_sweep_simulator::{NodeId, Simulator, Topology, run_sweep, run_tuple, sweep_with};

fn short_config(dir: &std::path::Path) -> SweepConfig {
    SweepConfig {
        standards: vec![WifiStandard::Ieee80211ax],
        distances: vec![0.0],
        user_counts: vec![1],
        sim_time_secs: 0.5,
        output_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

#[test]
fn single_tuple_sweep_writes_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = short_config(dir.path());

    let summary = run_sweep(&config, "run-100").unwrap();
    assert_eq!(summary.completed.len(), 1);
    assert!(summary.failures.is_empty());

    let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1);

    let report = &summary.completed[0];
    assert_eq!(
        report.output.file_name().unwrap(),
        "DataOfUser1-run-100-0m-1users-WiFi6_80211ax-run-100.sca"
    );
    assert_eq!(report.engine.nodes, 2);

    let metrics = analyze_file(&report.output, config.sim_time_secs).unwrap();
    // 1.6 ms interval over 0.5 s, both ends inclusive.
    assert_eq!(metrics.tx_packets, 313);
    assert!(metrics.rx_packets > 0);
    assert!(metrics.rx_packets <= metrics.tx_packets);
    assert!(metrics.avg_delay_ms > 0.0);
    assert_eq!(metrics.users, Some(1));
    assert_eq!(metrics.distance_m, Some(0.0));
}

#[test]
fn every_tuple_gets_its_own_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = SweepConfig {
        standards: vec![WifiStandard::Ieee80211ax, WifiStandard::Ieee80211be],
        distances: vec![0.0, 30.0],
        user_counts: vec![1, 3],
        sim_time_secs: 0.05,
        format: OutputFormat::Json,
        ..short_config(dir.path())
    };

    let summary = run_sweep(&config, "run-7").unwrap();
    assert_eq!(summary.completed.len(), 8);

    let names: HashSet<_> = summary
        .completed
        .iter()
        .map(|r| r.output.file_name().unwrap().to_owned())
        .collect();
    assert_eq!(names.len(), 8);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 8);

    // Nested order: standard, then distance, then users.
    let order: Vec<_> = summary
        .completed
        .iter()
        .map(|r| r.tuple.unwrap())
        .map(|t| (t.standard, t.distance as u32, t.users))
        .collect();
    assert_eq!(order[0], (WifiStandard::Ieee80211ax, 0, 1));
    assert_eq!(order[1], (WifiStandard::Ieee80211ax, 0, 3));
    assert_eq!(order[2], (WifiStandard::Ieee80211ax, 30, 1));
    assert_eq!(order[7], (WifiStandard::Ieee80211be, 30, 3));
}

#[test]
fn runs_do_not_share_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = SweepConfig {
        user_counts: vec![5, 1],
        sim_time_secs: 0.05,
        ..short_config(dir.path())
    };

    let summary = run_sweep(&config, "run-1").unwrap();
    assert_eq!(summary.completed[0].engine.nodes, 6);
    assert_eq!(summary.completed[1].engine.nodes, 2);

    // The second run only knows its own endpoint.
    let text = fs::read_to_string(&summary.completed[1].output).unwrap();
    assert!(text.contains("scalar node[1] wifi-rx-frames"));
    assert!(!text.contains("node[2]"));
    assert_eq!(text.matches("sender-tx-packets").count(), 1);
}

#[test]
fn fresh_simulators_restart_addressing() {
    for users in [4, 2] {
        let mut sim = Simulator::new(PhyConfig::default());
        let topology = Topology::build(&mut sim, WifiStandard::Ieee80211ax, 0.0, users).unwrap();
        assert_eq!(sim.node_count(), users as usize + 1);
        assert_eq!(topology.coordinator_address(), Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(topology.endpoint_address(0), Some(Ipv4Addr::new(192, 168, 0, 2)));
        // Distance zero co-locates every endpoint with the coordinator.
        assert_eq!(sim.position(NodeId(1)), Some(Vector3::new(0.0, 0.0, 0.0)));
    }
}

#[test]
fn a_failing_tuple_does_not_stop_the_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let config = SweepConfig {
        distances: vec![0.0, 30.0, 60.0],
        sim_time_secs: 0.05,
        ..short_config(dir.path())
    };

    let summary = sweep_with(&config, "run-9", |tuple| {
        if tuple.distance == 30.0 {
            Err(anyhow!("injected failure"))
        } else {
            run_tuple(&config, "run-9", tuple)
        }
    })
    .unwrap();

    assert_eq!(summary.completed.len(), 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].tuple.distance, 30.0);
    assert!(summary.failures[0].error.contains("injected failure"));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[test]
fn invalid_configuration_is_rejected_before_any_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = SweepConfig {
        distances: vec![30.2, 30.7],
        ..short_config(dir.path())
    };
    let mut calls = 0;
    let result = sweep_with(&config, "run-0", |tuple| {
        calls += 1;
        run_tuple(&config, "run-0", tuple)
    });
    assert!(result.is_err());
    assert_eq!(calls, 0);
}
