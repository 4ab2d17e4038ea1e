//! Peak performance of every instance kind.
//!
//! [`test_norm`] runs one full [`Controller::launch`] per configured instance kind and records
//! the peak throughput each one reached. Every kind gets its own driver, analyzer, controller and
//! history; nothing is shared between runs, which is what lets [`test_norm_parallel`] run them
//! side by side.

use crate::analyzer::Analyzer;
use crate::case::InstanceKind;
use crate::config::Config;
use crate::controller::{Controller, RunReport, StopReason};
use crate::driver::Driver;
use crate::error::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[cfg(test)]
use crate::driver::Artifact;
#[cfg(test)]
use crate::error::{AnalysisError, DriverError};
#[cfg(test)]
use crate::TestCase;

/// The best iteration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Load at which peak throughput was measured.
    pub load: usize,
    /// The peak throughput.
    pub throughput: f64,
    /// Iteration that measured it.
    pub iteration: usize,
}

/// The recorded outcome of characterizing one instance kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakRecord {
    /// The kind this record is for.
    pub kind: InstanceKind,
    /// The best iteration, or `None` if no iteration completed.
    pub peak: Option<Peak>,
    /// Number of iterations the run took.
    pub iterations: usize,
    /// Why the run ended.
    pub stop: StopReason,
}

impl From<&RunReport> for PeakRecord {
    fn from(report: &RunReport) -> Self {
        PeakRecord {
            kind: report.kind.clone(),
            peak: report.peak().and_then(|r| {
                Some(Peak {
                    load: r.case.load,
                    throughput: r.throughput()?,
                    iteration: r.case.iteration,
                })
            }),
            iterations: report.history.len(),
            stop: report.stop,
        }
    }
}

/// Peak records for every instance kind, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormReport {
    /// One record per kind.
    pub records: Vec<PeakRecord>,
}

impl NormReport {
    /// The record for `kind`.
    pub fn get(&self, kind: &InstanceKind) -> Option<&PeakRecord> {
        self.records.iter().find(|r| &r.kind == kind)
    }

    /// Write the report to `path` as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read a report previously written with [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}

fn characterize<D, A>(
    config: &Config,
    kind: &InstanceKind,
    driver: D,
    analyzer: A,
) -> Result<PeakRecord>
where
    D: Driver,
    A: Analyzer,
{
    let mut controller = Controller::new(kind.clone(), config.run.clone(), driver, analyzer)?;
    let record = PeakRecord::from(&controller.launch());
    match record.peak {
        Some(ref peak) => tracing::info!(
            %kind,
            load = peak.load,
            throughput = peak.throughput,
            "recorded peak"
        ),
        None => tracing::warn!(%kind, stop = %record.stop, "no iteration completed"),
    }
    Ok(record)
}

/// Test the peak performance of each instance kind in `config`, one kind at a time.
///
/// `factory` builds a fresh driver and analyzer for every kind.
pub fn test_norm<D, A, F>(config: &Config, mut factory: F) -> Result<NormReport>
where
    D: Driver,
    A: Analyzer,
    F: FnMut(&InstanceKind) -> Result<(D, A)>,
{
    config.validate()?;
    let mut records = Vec::with_capacity(config.kinds.len());
    for kind in &config.kinds {
        let (driver, analyzer) = factory(kind)?;
        records.push(characterize(config, kind, driver, analyzer)?);
    }
    Ok(NormReport { records })
}

/// Like [`test_norm`], but the kinds run concurrently on rayon's thread pool.
///
/// Records still come back in configuration order.
pub fn test_norm_parallel<D, A, F>(config: &Config, factory: F) -> Result<NormReport>
where
    D: Driver,
    A: Analyzer,
    F: Fn(&InstanceKind) -> Result<(D, A)> + Sync,
{
    config.validate()?;
    let records = config
        .kinds
        .par_iter()
        .map(|kind| {
            let (driver, analyzer) = factory(kind)?;
            characterize(config, kind, driver, analyzer)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(NormReport { records })
}

#[cfg(test)]
type ScriptDriver = fn(&TestCase) -> Result<Artifact, DriverError>;
#[cfg(test)]
type ScriptAnalyzer = Box<dyn FnMut(&Artifact) -> Result<f64, AnalysisError> + Send>;
#[cfg(test)]
type Pair = (ScriptDriver, ScriptAnalyzer);

#[cfg(test)]
fn in_memory(case: &TestCase) -> Result<Artifact, DriverError> {
    Ok(Artifact::new(case.clone(), "mem"))
}

/// Throughput grows with load until it saturates at a per-kind ceiling.
#[cfg(test)]
fn saturating(kind: &InstanceKind) -> Result<Pair> {
    let ceiling = match kind.as_str() {
        "rc_write" => 8,
        "rc_read" => 32,
        _ => return Err(Error::Configuration(format!("unknown kind {kind}"))),
    };
    let driver: ScriptDriver = in_memory;
    let analyzer: ScriptAnalyzer = Box::new(move |a: &Artifact| -> Result<f64, AnalysisError> {
        Ok(a.case.load.min(ceiling) as f64)
    });
    Ok((driver, analyzer))
}

#[cfg(test)]
fn config() -> Config {
    Config::from_yaml_str("kinds: [rc_write, rc_read]\n").unwrap()
}

#[cfg(test)]
fn check(report: &NormReport) {
    let kinds: Vec<_> = report.records.iter().map(|r| r.kind.as_str()).collect();
    assert_eq!(kinds, vec!["rc_write", "rc_read"]);

    let write = report.get(&"rc_write".into()).unwrap();
    let peak = write.peak.as_ref().unwrap();
    assert_eq!((peak.load, peak.throughput), (8, 8.0));
    assert_eq!(write.stop, StopReason::CasesExhausted);

    let read = report.get(&"rc_read".into()).unwrap();
    let peak = read.peak.as_ref().unwrap();
    assert_eq!((peak.load, peak.throughput), (32, 32.0));
}

#[test]
fn sequential() {
    check(&test_norm(&config(), saturating).unwrap());
}

#[test]
fn parallel() {
    check(&test_norm_parallel(&config(), saturating).unwrap());
}

#[test]
fn factory_errors_propagate() {
    let config = Config::from_yaml_str("kinds: [rc_write, ud_send]\n").unwrap();
    assert!(matches!(
        test_norm(&config, saturating),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn no_completed_iteration_means_no_peak() {
    let config = Config::from_yaml_str("kinds: [rc_write]\n").unwrap();
    let report = test_norm(&config, |_: &InstanceKind| -> Result<Pair> {
        let driver: ScriptDriver = in_memory;
        let analyzer: ScriptAnalyzer = Box::new(|_: &Artifact| -> Result<f64, AnalysisError> {
            Err(AnalysisError::Other("empty report".into()))
        });
        Ok((driver, analyzer))
    })
    .unwrap();
    let record = &report.records[0];
    assert!(record.peak.is_none());
    // a failed first load leaves the search nothing to bisect
    assert_eq!(record.iterations, 1);
}

#[test]
fn save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("peaks.json");
    let report = test_norm(&config(), saturating).unwrap();
    report.save(&path).unwrap();
    assert_eq!(NormReport::load(&path).unwrap(), report);
}
