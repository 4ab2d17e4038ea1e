#![cfg(unix)]

use std::fs;
use std::path::Path;
use summit::norm::test_norm;
use summit::{Config, Controller, InstanceKind, Outcome, StopReason};

/// Throughput rises with load until it flattens out at 4.
const SATURATING: &str = r#"if [ "$SUMMIT_LOAD" -gt 4 ]; then echo "bw=4"; else echo "bw=$SUMMIT_LOAD"; fi"#;

fn config(dir: &Path, script: &str, extra: &str) -> Config {
    let yaml = format!(
        r#"
kinds: [rc_write, rc_read]
run:
  max_retries: 1
{extra}
driver:
  program: sh
  args: ["-c", '{script}', "{{kind}}"]
  output_dir: '{dir}'
analyzer:
  pattern: 'bw=(?P<throughput>\S+)'
"#,
        script = script.replace('\'', "''"),
        dir = dir.display(),
    );
    Config::from_yaml_str(&yaml).unwrap()
}

#[test]
fn search_finds_the_knee() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), SATURATING, "");

    let mut controller = Controller::new(
        InstanceKind::new("rc_write"),
        config.run.clone(),
        config.driver().unwrap(),
        config.analyzer().unwrap(),
    )
    .unwrap();
    let report = controller.launch();

    let loads: Vec<_> = report.history.iter().map(|r| r.case.load).collect();
    assert_eq!(loads, vec![1, 2, 4, 8, 6, 5]);
    assert_eq!(report.stop, StopReason::CasesExhausted);
    assert_eq!(report.peak().map(|r| r.case.load), Some(4));
    assert_eq!(report.estimate, 4..5);

    let first = fs::read_to_string(dir.path().join("test_result_rc_write_1.txt")).unwrap();
    assert_eq!(first.trim(), "bw=1");
    assert!(dir.path().join("test_result_rc_write_6.txt").exists());
}

#[test]
fn stagnation_ends_the_climb() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        dir.path(),
        SATURATING,
        "  destination:\n    - stagnation: { steps: 1 }",
    );

    let mut controller = Controller::new(
        InstanceKind::new("rc_write"),
        config.run.clone(),
        config.driver().unwrap(),
        config.analyzer().unwrap(),
    )
    .unwrap();
    let report = controller.launch();

    let loads: Vec<_> = report.history.iter().map(|r| r.case.load).collect();
    assert_eq!(loads, vec![1, 2, 4, 8]);
    assert_eq!(report.stop, StopReason::DestinationReached);
}

#[test]
fn failing_program_aborts_after_retries() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), "echo starting; exit 3", "");

    let mut controller = Controller::new(
        InstanceKind::new("rc_read"),
        config.run.clone(),
        config.driver().unwrap(),
        config.analyzer().unwrap(),
    )
    .unwrap();
    let report = controller.launch();

    assert_eq!(report.stop, StopReason::Aborted);
    assert_eq!(report.history.len(), 1);
    let only = report.history.last().unwrap();
    assert_eq!(only.attempts, 2);
    assert!(matches!(only.outcome, Outcome::Aborted { .. }));
}

#[test]
fn unreadable_output_is_a_failed_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        dir.path(),
        "echo no numbers here",
        "  stepping: { mode: sweep, loads: [1, 2, 3] }",
    );

    let mut controller = Controller::new(
        InstanceKind::new("rc_write"),
        config.run.clone(),
        config.driver().unwrap(),
        config.analyzer().unwrap(),
    )
    .unwrap();
    let report = controller.launch();

    // the first failure already counts as "no gain", which ends a sweep
    assert_eq!(report.history.len(), 1);
    assert_eq!(report.stop, StopReason::CasesExhausted);
    assert!(matches!(
        report.history.last().unwrap().outcome,
        Outcome::Failed { .. }
    ));
}

#[test]
fn norm_records_every_kind() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), SATURATING, "");

    let report = test_norm(&config, |_: &InstanceKind| -> summit::error::Result<_> {
        Ok((config.driver()?, config.analyzer()?))
    })
    .unwrap();

    assert_eq!(report.records.len(), 2);
    for record in &report.records {
        let peak = record.peak.as_ref().unwrap();
        assert_eq!((peak.load, peak.throughput), (4, 4.0));
    }
    // result files are kept apart per kind
    assert!(dir.path().join("test_result_rc_read_1.txt").exists());
    assert!(dir.path().join("test_result_rc_write_1.txt").exists());

    let saved = dir.path().join("peaks.json");
    report.save(&saved).unwrap();
    assert_eq!(summit::norm::NormReport::load(&saved).unwrap(), report);
}
