use super::CaseStepper;
use core::borrow::Borrow;

/// A stepper that walks a pre-defined sequence of loads until throughput stops improving.
///
/// Any iterator of loads works, so both explicit lists and arithmetic ranges are supported:
///
/// ```rust
/// use summit::step::{CaseStepper, SweepStepper};
///
/// let mut load = SweepStepper::from((8..=32).step_by(8));
/// assert_eq!(load.next(), Some(8));
/// assert_eq!(load.next(), Some(16));
/// load.overloaded();
/// assert_eq!(load.next(), None);
/// assert_eq!(load.estimate(), 8..16);
/// ```
#[derive(Debug, Clone)]
pub struct SweepStepper<I> {
    max_in: core::ops::Range<usize>,
    last: Option<usize>,
    overloaded: bool,
    exhausted: bool,
    iter: I,
}

impl<I, T> CaseStepper for SweepStepper<I>
where
    I: Iterator<Item = T>,
    T: Borrow<usize>,
{
    fn overloaded(&mut self) {
        self.overloaded = true;
    }

    fn estimate(&self) -> core::ops::Range<usize> {
        self.max_in.clone()
    }
}

impl<I, T> Iterator for SweepStepper<I>
where
    I: Iterator<Item = T>,
    T: Borrow<usize>,
{
    type Item = usize;
    fn next(&mut self) -> Option<Self::Item> {
        if let Some(last) = self.last.take() {
            if self.overloaded {
                self.max_in.end = last;
            } else {
                self.max_in.start = last;
            }
        }

        if self.overloaded || self.exhausted {
            return None;
        }

        match self.iter.next() {
            Some(next) => {
                let next = *next.borrow();
                self.last = Some(next);
                Some(next)
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }
}

impl<I, T> From<I> for SweepStepper<I::IntoIter>
where
    I: IntoIterator<Item = T>,
    T: Borrow<usize>,
{
    fn from(v: I) -> Self {
        SweepStepper {
            max_in: 0..usize::MAX,
            last: None,
            overloaded: false,
            exhausted: false,
            iter: v.into_iter(),
        }
    }
}

#[test]
fn sweep_to_the_end() {
    let mut load = SweepStepper::from(&[1, 2, 3, 4]);
    assert_eq!(load.next(), Some(1));
    assert_eq!(load.next(), Some(2));
    assert_eq!(load.next(), Some(3));
    assert_eq!(load.next(), Some(4));
    assert_eq!(load.next(), None);
    assert_eq!(load.estimate(), 4..usize::MAX);

    // stays terminated
    assert_eq!(load.next(), None);
    load.overloaded();
    assert_eq!(load.next(), None);
    assert_eq!(load.estimate(), 4..usize::MAX);
}

#[test]
fn sweep_stops_at_first_loss() {
    let mut load = SweepStepper::from(vec![1, 2, 3, 4]);
    assert_eq!(load.next(), Some(1));
    assert_eq!(load.next(), Some(2));
    load.overloaded();
    assert_eq!(load.next(), None);
    assert_eq!(load.estimate(), 1..2);

    assert_eq!(load.next(), None);
    load.overloaded();
    assert_eq!(load.next(), None);
    assert_eq!(load.estimate(), 1..2);
}

#[test]
fn exhausted_sweep_stays_exhausted() {
    // an iterator that is not fused and resumes after returning `None`
    let mut calls: usize = 0;
    let flaky = core::iter::from_fn(move || {
        calls += 1;
        if calls == 2 {
            None
        } else {
            Some(calls * 4)
        }
    });
    let mut load = SweepStepper::from(flaky);
    assert_eq!(load.next(), Some(4));
    assert_eq!(load.next(), None);
    assert_eq!(load.next(), None);
    assert_eq!(load.estimate(), 4..usize::MAX);
}

#[test]
fn sweep_against_a_curve() {
    // throughput flattens out at 12 queue pairs
    let mut load = SweepStepper::from((4usize..=32).step_by(4));
    let tried = super::climb(&mut load, |l| l.min(12) as f64);
    assert_eq!(tried, vec![4, 8, 12, 16]);
    assert_eq!(load.estimate(), 12..16);
}
