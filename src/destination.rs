//! Stopping conditions for a run.
//!
//! A [`Destination`] is a pure predicate over the [`History`] so far. The controller evaluates it
//! once per iteration, after the iteration's result has been recorded.

use crate::history::History;
use std::fmt;

/// A condition under which a run has gone far enough.
pub trait Destination: fmt::Debug + Send + Sync {
    /// True once `history` satisfies this condition. Must not depend on anything but `history`.
    fn reached(&self, history: &History) -> bool;
}

impl<D> Destination for Box<D>
where
    D: Destination + ?Sized,
{
    fn reached(&self, history: &History) -> bool {
        (**self).reached(history)
    }
}

/// Throughput has stopped moving: the last `window` iterations all completed and their
/// throughputs are within `tolerance` (a fraction of the largest) of each other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plateau {
    /// Number of trailing iterations considered.
    pub window: usize,
    /// Largest allowed `(max - min) / max` over the window.
    pub tolerance: f64,
}

impl Destination for Plateau {
    fn reached(&self, history: &History) -> bool {
        if self.window == 0 || history.len() < self.window {
            return false;
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for result in history.tail(self.window) {
            match result.throughput() {
                Some(t) => {
                    min = min.min(t);
                    max = max.max(t);
                }
                None => return false,
            }
        }

        if max <= 0.0 {
            // all zero is flat, if not very interesting
            return max == min;
        }
        (max - min) / max <= self.tolerance
    }
}

/// Throughput has stopped improving: each of the last `steps` iterations failed to beat the best
/// throughput recorded before it by more than `threshold` (a fraction of that best).
///
/// Iterations that ran before anything completed cannot stagnate, since there is nothing yet to
/// improve on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stagnation {
    /// Number of consecutive iterations without a gain.
    pub steps: usize,
    /// Smallest relative gain that still counts as improving.
    pub threshold: f64,
}

impl Destination for Stagnation {
    fn reached(&self, history: &History) -> bool {
        if self.steps == 0 || history.len() < self.steps {
            return false;
        }
        (history.len() - self.steps..history.len())
            .all(|i| history.best_before(i).is_some() && !history.gained_at(i, self.threshold))
    }
}

/// A fixed number of iterations has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iterations(pub usize);

impl Destination for Iterations {
    fn reached(&self, history: &History) -> bool {
        history.len() >= self.0
    }
}

/// The most recent iteration reached at least the given throughput.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target(pub f64);

impl Destination for Target {
    fn reached(&self, history: &History) -> bool {
        history
            .last()
            .and_then(|r| r.throughput())
            .map_or(false, |t| t >= self.0)
    }
}

/// Reached as soon as any of its members is. An empty set is never reached.
#[derive(Debug, Default)]
pub struct AnyOf(pub Vec<Box<dyn Destination>>);

impl Destination for AnyOf {
    fn reached(&self, history: &History) -> bool {
        self.0.iter().any(|d| d.reached(history))
    }
}

#[cfg(test)]
fn history_of(values: &[Option<f64>]) -> History {
    use crate::case::TestCase;
    use crate::history::TestResult;

    let mut h = History::new();
    for (i, v) in values.iter().enumerate() {
        let case = TestCase::new("rc_write".into(), 1 << i, i + 1);
        h.push(match v {
            Some(t) => TestResult::completed(case, *t, 1),
            None => TestResult::failed(case, "no match", 1),
        });
    }
    h
}

#[test]
fn plateau_needs_a_full_window() {
    let p = Plateau {
        window: 3,
        tolerance: 0.05,
    };
    assert!(!p.reached(&history_of(&[Some(100.0), Some(104.0)])));
    assert!(p.reached(&history_of(&[Some(100.0), Some(104.0), Some(103.0)])));
}

#[test]
fn plateau_tolerance_is_relative_to_max() {
    let tight = Plateau {
        window: 3,
        tolerance: 0.01,
    };
    assert!(!tight.reached(&history_of(&[Some(100.0), Some(104.0), Some(103.0)])));
    assert!(tight.reached(&history_of(&[
        Some(50.0),
        Some(100.0),
        Some(100.5),
        Some(100.9)
    ])));
}

#[test]
fn plateau_rejects_failed_iterations() {
    let p = Plateau {
        window: 2,
        tolerance: 1.0,
    };
    assert!(!p.reached(&history_of(&[Some(10.0), None])));
    assert!(p.reached(&history_of(&[None, Some(10.0), Some(10.0)])));
}

#[test]
fn plateau_of_zeros() {
    let p = Plateau {
        window: 2,
        tolerance: 0.0,
    };
    assert!(p.reached(&history_of(&[Some(0.0), Some(0.0)])));
}

#[test]
fn stagnation_within_one_percent() {
    let s = Stagnation {
        steps: 1,
        threshold: 0.01,
    };
    assert!(!s.reached(&history_of(&[Some(100.0)])));
    assert!(!s.reached(&history_of(&[Some(100.0), Some(104.0)])));
    assert!(s.reached(&history_of(&[Some(100.0), Some(104.0), Some(103.0)])));
    // a small gain is still no gain
    assert!(s.reached(&history_of(&[Some(100.0), Some(104.0), Some(104.9)])));
    assert!(!s.reached(&history_of(&[Some(100.0), Some(104.0), Some(110.0)])));
}

#[test]
fn stagnation_needs_consecutive_misses() {
    let s = Stagnation {
        steps: 2,
        threshold: 0.0,
    };
    assert!(!s.reached(&history_of(&[Some(10.0), Some(20.0), Some(15.0)])));
    assert!(s.reached(&history_of(&[Some(10.0), Some(20.0), Some(15.0), None])));
    assert!(!s.reached(&history_of(&[Some(10.0), Some(9.0), Some(20.0), Some(15.0)])));
    // failures before the first completed result have nothing to stagnate against
    assert!(!s.reached(&history_of(&[None, None])));
    assert!(!s.reached(&history_of(&[None, Some(5.0)])));
}

#[test]
fn iterations_and_target() {
    let h = history_of(&[Some(10.0), Some(95.0)]);
    assert!(Iterations(2).reached(&h));
    assert!(!Iterations(3).reached(&h));
    assert!(Target(90.0).reached(&h));
    assert!(!Target(96.0).reached(&h));
    assert!(!Target(1.0).reached(&history_of(&[Some(10.0), None])));
}

#[test]
fn any_of() {
    let h = history_of(&[Some(10.0)]);
    assert!(!AnyOf::default().reached(&h));
    let any = AnyOf(vec![Box::new(Target(100.0)), Box::new(Iterations(1))]);
    assert!(any.reached(&h));
}

#[test]
fn reached_is_pure() {
    let h = history_of(&[Some(100.0), Some(104.0), Some(103.0)]);
    let p = Plateau {
        window: 3,
        tolerance: 0.05,
    };
    let before = h.clone();
    assert_eq!(p.reached(&h), p.reached(&h));
    assert_eq!(h, before);
}
