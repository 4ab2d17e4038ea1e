//! The ordered record of what each iteration of a run produced.

use crate::case::TestCase;
use serde::{Deserialize, Serialize};

/// How a single iteration ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum Outcome {
    /// The case ran and its artifacts yielded a throughput.
    Completed {
        /// The measured throughput.
        throughput: f64,
    },
    /// The case ran, but no throughput could be computed from its artifacts.
    Failed {
        /// Why analysis failed.
        reason: String,
    },
    /// The driver could not run the case, even after retrying. This ends the run.
    Aborted {
        /// The last driver error.
        reason: String,
    },
}

/// What one iteration produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// The case that was run.
    pub case: TestCase,
    /// How it ended.
    pub outcome: Outcome,
    /// How many times the driver was invoked for this case.
    pub attempts: usize,
}

impl TestResult {
    /// A result carrying a measured throughput.
    pub fn completed(case: TestCase, throughput: f64, attempts: usize) -> Self {
        TestResult {
            case,
            outcome: Outcome::Completed { throughput },
            attempts,
        }
    }

    /// A result whose artifacts could not be analyzed.
    pub fn failed(case: TestCase, reason: impl ToString, attempts: usize) -> Self {
        TestResult {
            case,
            outcome: Outcome::Failed {
                reason: reason.to_string(),
            },
            attempts,
        }
    }

    /// A result whose case could not be run at all.
    pub fn aborted(case: TestCase, reason: impl ToString, attempts: usize) -> Self {
        TestResult {
            case,
            outcome: Outcome::Aborted {
                reason: reason.to_string(),
            },
            attempts,
        }
    }

    /// The measured throughput, if the iteration completed.
    pub fn throughput(&self) -> Option<f64> {
        match self.outcome {
            Outcome::Completed { throughput } => Some(throughput),
            _ => None,
        }
    }

    /// True if the iteration completed with a throughput.
    pub fn is_completed(&self) -> bool {
        self.throughput().is_some()
    }
}

/// Results in iteration order.
///
/// A history only grows: entries are appended as iterations finish and are never reordered or
/// removed, so `len()` is always the number of completed iterations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History(Vec<TestResult>);

impl History {
    /// An empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of the iteration that just finished.
    pub fn push(&mut self, result: TestResult) {
        self.0.push(result);
    }

    /// Number of recorded iterations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no iteration has been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The most recent result.
    pub fn last(&self) -> Option<&TestResult> {
        self.0.last()
    }

    /// The last `n` results (fewer if the history is shorter), oldest first.
    pub fn tail(&self, n: usize) -> &[TestResult] {
        &self.0[self.0.len().saturating_sub(n)..]
    }

    /// Iterate over results oldest first.
    pub fn iter(&self) -> std::slice::Iter<'_, TestResult> {
        self.0.iter()
    }

    /// Throughput of every completed iteration, in order.
    pub fn throughputs(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().filter_map(TestResult::throughput)
    }

    /// The completed result with the highest throughput. Ties go to the earliest.
    pub fn peak(&self) -> Option<&TestResult> {
        let mut best: Option<(&TestResult, f64)> = None;
        for result in &self.0 {
            if let Some(t) = result.throughput() {
                match best {
                    Some((_, b)) if b >= t => {}
                    _ => best = Some((result, t)),
                }
            }
        }
        best.map(|(r, _)| r)
    }

    /// The highest throughput among the results recorded before position `index`.
    pub fn best_before(&self, index: usize) -> Option<f64> {
        self.0[..index.min(self.0.len())]
            .iter()
            .filter_map(TestResult::throughput)
            .fold(None, |best, t| Some(best.map_or(t, |b: f64| b.max(t))))
    }

    /// True if the result at `index` completed and beat the best earlier throughput by more than
    /// `threshold` (a fraction of it). A completed result with nothing before it to beat counts
    /// as a gain. A failed or aborted one never does.
    pub fn gained_at(&self, index: usize, threshold: f64) -> bool {
        let t = match self.0.get(index).and_then(TestResult::throughput) {
            Some(t) => t,
            None => return false,
        };
        match self.best_before(index) {
            Some(best) => t > best * (1.0 + threshold),
            None => true,
        }
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a TestResult;
    type IntoIter = std::slice::Iter<'a, TestResult>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
fn case(load: usize, iteration: usize) -> TestCase {
    TestCase::new("rc_write".into(), load, iteration)
}

#[test]
fn peak_prefers_earliest() {
    let mut h = History::new();
    h.push(TestResult::completed(case(1, 1), 10.0, 1));
    h.push(TestResult::completed(case(2, 2), 30.0, 1));
    h.push(TestResult::failed(case(4, 3), "garbled", 1));
    h.push(TestResult::completed(case(8, 4), 30.0, 1));
    assert_eq!(h.peak().map(|r| r.case.load), Some(2));
    assert_eq!(h.throughputs().collect::<Vec<_>>(), vec![10.0, 30.0, 30.0]);
    assert_eq!(h.best_before(3), Some(30.0));
    assert_eq!(h.best_before(1), Some(10.0));
}

#[test]
fn gains_are_relative_to_the_earlier_best() {
    let mut h = History::new();
    h.push(TestResult::completed(case(1, 1), 100.0, 1));
    h.push(TestResult::completed(case(2, 2), 104.0, 1));
    h.push(TestResult::completed(case(4, 3), 103.0, 1));
    h.push(TestResult::failed(case(3, 4), "garbled", 1));
    h.push(TestResult::completed(case(5, 5), 104.5, 1));

    assert!(h.gained_at(0, 0.01));
    assert!(h.gained_at(1, 0.01));
    assert!(!h.gained_at(2, 0.0));
    assert!(!h.gained_at(3, 0.0));
    // 104.5 beats 104, but not by 1%
    assert!(h.gained_at(4, 0.0));
    assert!(!h.gained_at(4, 0.01));
    assert!(!h.gained_at(5, 0.0));
}

#[test]
fn empty_history() {
    let h = History::new();
    assert!(h.is_empty());
    assert!(h.peak().is_none());
    assert!(h.last().is_none());
    assert!(h.tail(3).is_empty());
    assert_eq!(h.best_before(0), None);
    assert!(!h.gained_at(0, 0.0));
}

#[test]
fn tail_is_oldest_first() {
    let mut h = History::new();
    for i in 1..=5 {
        h.push(TestResult::completed(case(i, i), i as f64, 1));
    }
    let loads: Vec<_> = h.tail(2).iter().map(|r| r.case.load).collect();
    assert_eq!(loads, vec![4, 5]);
    assert_eq!(h.tail(10).len(), 5);
}

#[test]
fn outcome_serializes_with_status_tag() {
    let r = TestResult::aborted(case(1, 1), "spawn failed", 2);
    let json = serde_json::to_string(&r).unwrap();
    assert!(json.contains("\"status\":\"aborted\""));
    assert!(json.contains("\"attempts\":2"));
    let back: TestResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, r);
}
