//! The iteration loop.

use crate::analyzer::Analyzer;
use crate::case::{InstanceKind, TestCase};
use crate::config::RunSettings;
use crate::destination::Destination;
use crate::driver::Driver;
use crate::error::Result;
use crate::history::{History, Outcome, TestResult};
use crate::step::CaseStepper;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(test)]
use crate::config::{DestinationSpec, Stepping};
#[cfg(test)]
use crate::destination::{Iterations, Plateau};
#[cfg(test)]
use crate::driver::Artifact;
#[cfg(test)]
use crate::error::{AnalysisError, DriverError};
#[cfg(test)]
use crate::step::{SearchStepper, SweepStepper};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// The destination predicate fired.
    DestinationReached,
    /// The stepper had no further load to try.
    CasesExhausted,
    /// The iteration cap was hit before anything else stopped the run.
    IterationCap,
    /// The driver kept failing on a case.
    Aborted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::DestinationReached => "destination reached",
            StopReason::CasesExhausted => "cases exhausted",
            StopReason::IterationCap => "iteration cap",
            StopReason::Aborted => "aborted",
        })
    }
}

/// Mutable state of a single run. Created by [`Controller::launch`], advanced once per
/// iteration, and turned into a [`RunReport`] when the loop exits.
#[derive(Debug, Default)]
struct RunState {
    case: Option<TestCase>,
    history: History,
    destination_reached: bool,
    aborted: bool,
}

/// What a run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The instance kind that was tested.
    pub kind: InstanceKind,
    /// Every iteration, in order.
    pub history: History,
    /// Why the run ended.
    pub stop: StopReason,
    /// The stepper's final estimate of the load range holding peak throughput.
    pub estimate: core::ops::Range<usize>,
}

impl RunReport {
    /// The best completed iteration.
    pub fn peak(&self) -> Option<&TestResult> {
        self.history.peak()
    }

    /// True if the run stopped because its destination was reached.
    pub fn destination_reached(&self) -> bool {
        self.stop == StopReason::DestinationReached
    }

    /// True if the run was cut short by a driver that kept failing.
    pub fn aborted(&self) -> bool {
        self.stop == StopReason::Aborted
    }
}

/// Drives a bounded sequence of test iterations against one instance kind.
///
/// Each iteration runs the current case through the [`Driver`], turns the artifact into a
/// throughput with the [`Analyzer`], records the result, picks the next case, and checks the
/// destination. The loop is bounded by [`RunSettings::max_iterations`] regardless of what the
/// destination says.
pub struct Controller<D, A> {
    kind: InstanceKind,
    settings: RunSettings,
    destination: Box<dyn Destination>,
    driver: D,
    analyzer: A,
}

impl<D, A> fmt::Debug for Controller<D, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("kind", &self.kind)
            .field("settings", &self.settings)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

impl<D, A> Controller<D, A>
where
    D: Driver,
    A: Analyzer,
{
    /// A controller for `kind`. Fails if `settings` cannot work.
    pub fn new(kind: InstanceKind, settings: RunSettings, driver: D, analyzer: A) -> Result<Self> {
        settings.validate()?;
        let destination = Box::new(settings.destination());
        Ok(Controller {
            kind,
            settings,
            destination,
            driver,
            analyzer,
        })
    }

    /// Stop at `destination` instead of the configured one.
    pub fn with_destination(mut self, destination: impl Destination + 'static) -> Self {
        self.destination = Box::new(destination);
        self
    }

    /// The instance kind under test.
    pub fn kind(&self) -> &InstanceKind {
        &self.kind
    }

    /// Run iterations with the configured stepping policy until the run stops.
    pub fn launch(&mut self) -> RunReport {
        let stepper = self.settings.stepping.build();
        self.launch_with(stepper)
    }

    /// Run iterations with `stepper` choosing loads until the run stops.
    pub fn launch_with<S>(&mut self, mut stepper: S) -> RunReport
    where
        S: CaseStepper,
    {
        tracing::info!(kind = %self.kind, max_iterations = self.settings.max_iterations, "starting run");

        let mut state = RunState {
            case: stepper
                .next()
                .map(|load| TestCase::new(self.kind.clone(), load, 1)),
            ..RunState::default()
        };

        let stop = loop {
            let case = match state.case.take() {
                Some(case) => case,
                None => break StopReason::CasesExhausted,
            };
            if state.history.len() >= self.settings.max_iterations {
                tracing::warn!(kind = %self.kind, "iteration cap reached");
                break StopReason::IterationCap;
            }

            let result = self.run_case(case);
            let aborted = matches!(result.outcome, Outcome::Aborted { .. });
            state.history.push(result);
            if aborted {
                state.aborted = true;
                break StopReason::Aborted;
            }

            state.case = self.set_next_case(&mut stepper, &state.history);
            if self.reached_destination(&state.history) {
                state.destination_reached = true;
                break StopReason::DestinationReached;
            }
        };

        debug_assert_eq!(state.destination_reached, stop == StopReason::DestinationReached);
        debug_assert_eq!(state.aborted, stop == StopReason::Aborted);

        let report = RunReport {
            kind: self.kind.clone(),
            history: state.history,
            stop,
            estimate: stepper.estimate(),
        };
        tracing::info!(
            kind = %report.kind,
            iterations = report.history.len(),
            stop = %report.stop,
            peak = ?report.peak().and_then(TestResult::throughput),
            "run finished"
        );
        report
    }

    /// Choose the case that follows `history`, or `None` if `stepper` has no more loads.
    ///
    /// The most recent result counts as an improvement only if it completed and beat the best
    /// earlier throughput by more than the configured `improvement` fraction. Anything else is
    /// reported to the stepper as overloaded before it is asked for the next load.
    pub fn set_next_case<S>(&self, stepper: &mut S, history: &History) -> Option<TestCase>
    where
        S: CaseStepper + ?Sized,
    {
        if let Some(last) = history.last() {
            if !history.gained_at(history.len() - 1, self.settings.improvement) {
                tracing::debug!(case = %last.case, "no improvement");
                stepper.overloaded();
            }
        }

        let load = stepper.next()?;
        tracing::debug!(kind = %self.kind, load, estimate = ?stepper.estimate(), "next case");
        Some(TestCase::new(self.kind.clone(), load, history.len() + 1))
    }

    /// True once `history` satisfies the destination. Does not touch any state.
    pub fn reached_destination(&self, history: &History) -> bool {
        self.destination.reached(history)
    }

    fn run_case(&mut self, case: TestCase) -> TestResult {
        let allowed = self.settings.max_retries.saturating_add(1);
        let mut attempts = 0;
        let artifact = loop {
            attempts += 1;
            match self.driver.start_test(&case) {
                Ok(artifact) => break artifact,
                Err(e) if attempts < allowed => {
                    tracing::warn!(%case, attempt = attempts, error = %e, "driver failed, retrying");
                }
                Err(e) => {
                    tracing::error!(%case, attempts, error = %e, "driver failed, aborting run");
                    return TestResult::aborted(case, e, attempts);
                }
            }
        };

        match self.analyzer.calculate_throughput(&artifact) {
            Ok(throughput) => {
                tracing::info!(%case, throughput, "iteration completed");
                TestResult::completed(case, throughput, attempts)
            }
            Err(e) => {
                tracing::warn!(%case, error = %e, "analysis failed");
                TestResult::failed(case, e, attempts)
            }
        }
    }
}

/// Produces in-memory artifacts, failing the listed (iteration, attempt) pairs.
#[cfg(test)]
struct ScriptedDriver {
    fail: Vec<(usize, usize)>,
    attempts: Vec<usize>,
}

#[cfg(test)]
impl ScriptedDriver {
    fn failing(fail: Vec<(usize, usize)>) -> Self {
        ScriptedDriver {
            fail,
            attempts: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Driver for ScriptedDriver {
    fn start_test(&mut self, case: &TestCase) -> Result<Artifact, DriverError> {
        if self.attempts.len() < case.iteration {
            self.attempts.resize(case.iteration, 0);
        }
        self.attempts[case.iteration - 1] += 1;
        let attempt = self.attempts[case.iteration - 1];
        if self.fail.contains(&(case.iteration, attempt)) {
            return Err(DriverError::Other(format!("device busy on attempt {attempt}")));
        }
        Ok(Artifact::new(case.clone(), format!("mem://{}", case.iteration)))
    }
}

/// Yields throughputs by iteration; `None` entries fail analysis. Past the end, throughput keeps
/// growing with load.
#[cfg(test)]
struct ScriptedAnalyzer(Vec<Option<f64>>);

#[cfg(test)]
impl Analyzer for ScriptedAnalyzer {
    fn calculate_throughput(&mut self, artifact: &Artifact) -> Result<f64, AnalysisError> {
        match self.0.get(artifact.case.iteration - 1) {
            Some(Some(t)) => Ok(*t),
            Some(None) => Err(AnalysisError::Other("truncated report".into())),
            None => Ok(artifact.case.load as f64),
        }
    }
}

#[cfg(test)]
fn controller(
    settings: RunSettings,
    fail: Vec<(usize, usize)>,
    throughputs: Vec<Option<f64>>,
) -> Controller<ScriptedDriver, ScriptedAnalyzer> {
    Controller::new(
        "rc_write".into(),
        settings,
        ScriptedDriver::failing(fail),
        ScriptedAnalyzer(throughputs),
    )
    .unwrap()
}

#[cfg(test)]
fn loads(history: &History) -> Vec<usize> {
    history.iter().map(|r| r.case.load).collect()
}

#[test]
fn plateau_stops_doubling() {
    // gains under 1% end the run
    let settings = RunSettings {
        destination: vec![DestinationSpec::Stagnation {
            steps: 1,
            threshold: 0.01,
        }],
        ..RunSettings::default()
    };
    let mut c = controller(
        settings,
        vec![],
        vec![Some(100.0), Some(104.0), Some(103.0), Some(103.5)],
    );
    let report = c.launch();
    assert_eq!(report.stop, StopReason::DestinationReached);
    assert!(report.destination_reached());
    assert_eq!(report.history.len(), 3);
    assert_eq!(loads(&report.history), vec![1, 2, 4]);
    assert_eq!(report.peak().map(|r| r.case.load), Some(2));
}

#[test]
fn wide_plateau_stops_doubling() {
    let mut c = controller(
        RunSettings::default(),
        vec![],
        vec![Some(100.0), Some(104.0), Some(103.0), Some(103.5)],
    )
    .with_destination(Plateau {
        window: 3,
        tolerance: 0.05,
    });
    let report = c.launch_with(SearchStepper::new(1));
    assert_eq!(report.stop, StopReason::DestinationReached);
    assert!(report.destination_reached());
    assert_eq!(report.history.len(), 3);
    assert_eq!(loads(&report.history), vec![1, 2, 4]);
    assert_eq!(report.peak().map(|r| r.case.load), Some(2));
}

#[test]
fn tight_plateau_keeps_going() {
    let mut c = controller(
        RunSettings::default(),
        vec![],
        vec![Some(100.0), Some(104.0), Some(103.0)],
    )
    .with_destination(Plateau {
        window: 3,
        tolerance: 0.01,
    });
    let report = c.launch_with(SearchStepper::new(1));
    assert!(report.history.len() > 3);
    assert_ne!(report.stop, StopReason::DestinationReached);
}

#[test]
fn iteration_cap_bounds_endless_runs() {
    let settings = RunSettings {
        max_iterations: 10,
        ..RunSettings::default()
    };
    // throughput always improves and the stepper never runs dry
    let mut c = controller(settings, vec![], vec![]);
    let report = c.launch_with(SweepStepper::from(1..));
    assert_eq!(report.stop, StopReason::IterationCap);
    assert_eq!(report.history.len(), 10);
    let iterations: Vec<_> = report.history.iter().map(|r| r.case.iteration).collect();
    assert_eq!(iterations, (1..=10).collect::<Vec<_>>());
}

#[test]
fn retry_recovers() {
    let settings = RunSettings {
        max_retries: 1,
        stepping: Stepping::Sweep {
            loads: vec![1, 2, 3, 4, 5],
        },
        ..RunSettings::default()
    };
    let mut c = controller(settings, vec![(2, 1)], vec![]);
    let report = c.launch();
    assert_eq!(report.stop, StopReason::CasesExhausted);
    assert_eq!(report.history.len(), 5);
    assert!(report.history.iter().all(TestResult::is_completed));
    let attempts: Vec<_> = report.history.iter().map(|r| r.attempts).collect();
    assert_eq!(attempts, vec![1, 2, 1, 1, 1]);
}

#[test]
fn retries_exhausted_abort_the_run() {
    let settings = RunSettings {
        max_retries: 1,
        stepping: Stepping::Sweep {
            loads: vec![1, 2, 3, 4, 5],
        },
        ..RunSettings::default()
    };
    let mut c = controller(settings, vec![(2, 1), (2, 2)], vec![]);
    let report = c.launch();
    assert_eq!(report.stop, StopReason::Aborted);
    assert!(report.aborted());
    assert_eq!(report.history.len(), 2);
    let last = report.history.last().unwrap();
    assert!(matches!(last.outcome, Outcome::Aborted { .. }));
    assert_eq!(last.attempts, 2);
}

#[test]
fn analysis_failure_counts_as_no_gain() {
    let settings = RunSettings {
        stepping: Stepping::Search {
            start: 4,
            min_width: Some(1),
            fill_left: false,
        },
        ..RunSettings::default()
    };
    let mut c = controller(
        settings,
        vec![],
        vec![Some(10.0), None, Some(12.0), Some(11.0)],
    );
    let report = c.launch();
    assert_eq!(report.stop, StopReason::CasesExhausted);
    assert_eq!(loads(&report.history), vec![4, 8, 6, 7]);
    assert!(matches!(
        report.history.iter().nth(1).unwrap().outcome,
        Outcome::Failed { .. }
    ));
    assert_eq!(report.estimate, 6..7);
    assert_eq!(report.peak().map(|r| r.case.load), Some(6));
}

#[test]
fn improvement_threshold() {
    let settings = RunSettings {
        improvement: 0.1,
        stepping: Stepping::Sweep {
            loads: vec![1, 2, 3],
        },
        ..RunSettings::default()
    };
    // 105 is not 10% better than 100
    let mut c = controller(settings, vec![], vec![Some(100.0), Some(105.0), Some(200.0)]);
    let report = c.launch();
    assert_eq!(report.history.len(), 2);
    assert_eq!(report.stop, StopReason::CasesExhausted);
}

#[test]
fn configured_destination() {
    let settings = RunSettings {
        destination: vec![DestinationSpec::Iterations(3)],
        ..RunSettings::default()
    };
    let mut c = controller(settings, vec![], vec![]);
    let report = c.launch();
    assert_eq!(report.stop, StopReason::DestinationReached);
    assert_eq!(report.history.len(), 3);
}

#[test]
fn history_grows_by_one_per_iteration() {
    let c = controller(RunSettings::default(), vec![], vec![]).with_destination(Iterations(4));
    let mut stepper = SearchStepper::new(1);
    let mut history = History::new();
    let mut case = stepper.next().map(|l| TestCase::new("rc_write".into(), l, 1));
    while let Some(next) = case {
        history.push(TestResult::completed(next, history.len() as f64 + 1.0, 1));
        case = c.set_next_case(&mut stepper, &history);
        assert_eq!(case.as_ref().map(|c| c.iteration), Some(history.len() + 1));
        let before = history.clone();
        let reached = c.reached_destination(&history);
        assert_eq!(reached, c.reached_destination(&history));
        assert_eq!(before, history);
        if reached {
            break;
        }
    }
    assert_eq!(history.len(), 4);
}

#[test]
fn rejects_bad_settings() {
    let settings = RunSettings {
        max_iterations: 0,
        ..RunSettings::default()
    };
    let c = Controller::new(
        "rc_write".into(),
        settings,
        ScriptedDriver::failing(vec![]),
        ScriptedAnalyzer(vec![]),
    );
    assert!(matches!(c, Err(crate::Error::Configuration(_))));
}
