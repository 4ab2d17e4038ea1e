//! Drive a performance test until its throughput reaches a destination.
//!
//! Characterizing a system usually means running the same benchmark over and over: run it at
//! some load, read the throughput out of its output, decide on the next load, and stop once
//! there is nothing more to learn. This crate provides that loop.
//!
//! A [`Controller`] owns one run against one [`InstanceKind`]. Every iteration it:
//!
//!  1. asks a [`Driver`] to execute the current [`TestCase`], producing an [`Artifact`],
//!  2. asks an [`Analyzer`] to compute a throughput from that artifact,
//!  3. appends the [`TestResult`] to the run's [`History`],
//!  4. picks the next case with a [`CaseStepper`](step::CaseStepper), and
//!  5. checks whether the [`Destination`](destination::Destination) has been reached.
//!
//! The default stepping policy doubles the load for as long as throughput improves, then
//! bisects between the best load and the first load that did not improve things. A run ends
//! when the destination fires, when the stepper has nothing left to try, when the driver keeps
//! failing, or when the iteration cap is hit, whichever comes first.
//!
//! [`norm::test_norm`] repeats this for every configured instance kind and records each one's
//! peak.
//!
//! # Examples
//!
//! ```rust
//! use summit::{Artifact, Controller, RunSettings, StopReason, TestCase};
//! use summit::{AnalysisError, DriverError};
//!
//! # fn main() -> Result<(), summit::Error> {
//! // A real driver would run a benchmark and write its output to disk.
//! let driver = |case: &TestCase| -> Result<Artifact, DriverError> {
//!     Ok(Artifact::new(case.clone(), format!("run-{}.txt", case.iteration)))
//! };
//! // The system under test stops scaling at a load of 6.
//! let analyzer = |artifact: &Artifact| -> Result<f64, AnalysisError> {
//!     Ok(100.0 * artifact.case.load.min(6) as f64)
//! };
//!
//! let mut controller = Controller::new("rc_write".into(), RunSettings::default(), driver, analyzer)?;
//! let report = controller.launch();
//!
//! // 1, 2, 4 and 8 each improve throughput; 16 does not, so the search bisects back down.
//! let loads: Vec<_> = report.history.iter().map(|r| r.case.load).collect();
//! assert_eq!(loads, vec![1, 2, 4, 8, 16, 12, 10, 9]);
//! assert_eq!(report.stop, StopReason::CasesExhausted);
//! assert_eq!(report.estimate, 8..9);
//! assert_eq!(report.peak().and_then(|r| r.throughput()), Some(600.0));
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

mod analyzer;
mod case;
pub mod config;
mod controller;
pub mod destination;
mod driver;
pub mod error;
mod history;
pub mod norm;
pub mod step;

pub use crate::analyzer::{Analyzer, PatternAnalyzer, PERFTEST_BW};
pub use crate::case::{InstanceKind, TestCase};
pub use crate::config::{Config, RunSettings};
pub use crate::controller::{Controller, RunReport, StopReason};
pub use crate::driver::{Artifact, CommandDriver, Driver};
pub use crate::error::{AnalysisError, DriverError, Error};
pub use crate::history::{History, Outcome, TestResult};
