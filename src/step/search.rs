use super::CaseStepper;

/// A stepper that finds the load of peak throughput by exponential growth followed by bisection.
///
/// The first load tried is `start`. As long as throughput keeps improving the load doubles,
/// raising the lower bound of the estimate each time. The first load that does not improve
/// throughput becomes the upper bound, and the stepper then bisects between the two bounds until
/// the range is no wider than the requested fidelity.
///
/// ```rust
/// use summit::step::{CaseStepper, SearchStepper};
///
/// let mut load = SearchStepper::until(4, 2);
/// assert_eq!(load.next(), Some(4));
/// assert_eq!(load.next(), Some(8));
/// assert_eq!(load.next(), Some(16));
/// // 16 was no better than 8
/// load.overloaded();
/// assert_eq!(load.next(), Some(12));
/// load.overloaded();
/// assert_eq!(load.next(), Some(10));
/// assert_eq!(load.next(), None);
/// assert_eq!(load.estimate(), 10..12);
/// ```
#[derive(Debug, Clone)]
pub struct SearchStepper {
    max_in: core::ops::Range<usize>,
    prev_min: usize,
    last: Option<usize>,
    fidelity: usize,
    overloaded: bool,
    done: bool,
    fill_left: bool,
}

impl SearchStepper {
    /// Search for peak throughput starting at `start`, ending when the peak load has been
    /// determined to within a range of `start / 2`.
    pub fn new(start: usize) -> Self {
        Self::until(start, start / 2)
    }

    /// Search for peak throughput starting at `start`, ending when the peak load has been
    /// determined to within a range of `min_width`.
    pub fn until(start: usize, min_width: usize) -> Self {
        Self {
            max_in: start..usize::MAX,
            prev_min: start,
            fidelity: min_width,
            last: None,
            overloaded: false,
            done: false,
            fill_left: false,
        }
    }

    // NOTE: inherent methods mirror CaseStepper so callers that hold the concrete type need not
    // import the trait.

    /// Indicate that the previous load did not improve throughput.
    ///
    /// This provides [`CaseStepper::overloaded`] without having to `use` the trait.
    pub fn overloaded(&mut self) {
        self.overloaded = true;
    }

    /// Give the current estimate of the load range in which peak throughput lies.
    ///
    /// This provides [`CaseStepper::estimate`] without having to `use` the trait.
    pub fn estimate(&self) -> core::ops::Range<usize> {
        self.max_in.clone()
    }

    /// Also sample loads just below the final lower bound.
    ///
    /// Starting at 1 with a peak near 8, the stepper tries 1, 2, 4, 8, 16, then bisects back
    /// down through 12, 10 and 9. The step from 4 straight to 8 leaves a gap in the recorded
    /// throughput curve right where it bends. With filling enabled, once the range is settled
    /// the stepper also samples between the previous lower bound and the final one (6 and 7
    /// here), still respecting the fidelity given to [`until`](Self::until).
    pub fn fill_left(&mut self) {
        self.fill_left = true;
    }
}

impl CaseStepper for SearchStepper {
    fn overloaded(&mut self) {
        SearchStepper::overloaded(self)
    }

    fn estimate(&self) -> core::ops::Range<usize> {
        SearchStepper::estimate(self)
    }
}

impl Iterator for SearchStepper {
    type Item = usize;
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            if self.fill_left {
                let diff = self.max_in.start - self.prev_min;
                if diff > self.fidelity && diff > 1 {
                    let next = self.prev_min + diff / 2;
                    self.prev_min = next;
                    return Some(next);
                }
                self.fill_left = false;
            }
            return None;
        }

        let last = match self.last {
            Some(last) => last,
            None => {
                self.last = Some(self.max_in.start);
                return self.last;
            }
        };

        if self.overloaded {
            // no gain at `last`, so the peak lies below it
            self.max_in.end = last;
            self.overloaded = false;
        } else {
            self.prev_min = self.max_in.start;
            self.max_in.start = last;
        }

        let next = if self.max_in.end == usize::MAX {
            // no upper bound yet
            self.max_in.start.saturating_mul(2)
        } else {
            self.max_in.start + (self.max_in.end - self.max_in.start) / 2
        };

        if self.max_in.end - self.max_in.start > self.fidelity && next > self.max_in.start {
            self.last = Some(next);
            Some(next)
        } else {
            self.done = true;
            // may still yield when filling
            self.next()
        }
    }
}

/// Bandwidth grows with every queue pair up to 24, then falls as they fight over the link.
#[cfg(test)]
fn congested(load: usize) -> f64 {
    let load = load as f64;
    if load <= 24.0 {
        10.0 * load
    } else {
        (10.0 * (48.0 - load)).max(0.0)
    }
}

/// Rises to a peak at 8, then falls off.
#[cfg(test)]
fn peak_at_8(load: usize) -> f64 {
    if load <= 8 {
        load as f64
    } else {
        16usize.saturating_sub(load) as f64
    }
}

#[test]
fn finds_a_congestion_knee() {
    let mut load = SearchStepper::until(1, 0);
    let tried = super::climb(&mut load, congested);
    // 32 only matches 16, so the knee lies between them
    assert_eq!(tried, vec![1, 2, 4, 8, 16, 32, 24, 28, 26, 25]);
    assert_eq!(load.estimate(), 24..25);

    // stays terminated
    assert_eq!(load.next(), None);
    load.overloaded();
    assert_eq!(load.next(), None);
    assert_eq!(load.estimate(), 24..25);
}

#[test]
fn coarse_search_stops_early() {
    let mut load = SearchStepper::until(1, 4);
    let tried = super::climb(&mut load, congested);
    assert_eq!(tried, vec![1, 2, 4, 8, 16, 32, 24, 28]);
    assert_eq!(load.estimate(), 24..28);
}

#[test]
fn fills_below_the_peak() {
    let mut load = SearchStepper::until(1, 2);
    load.fill_left();
    let tried = super::climb(&mut load, peak_at_8);
    // 6 lies between the previous lower bound (4) and the final one (8)
    assert_eq!(tried, vec![1, 2, 4, 8, 16, 12, 10, 6]);
    assert_eq!(load.estimate(), 8..10);
    assert_eq!(load.next(), None);
}

#[test]
fn fill_with_unit_fidelity_terminates() {
    let mut load = SearchStepper::until(1, 0);
    load.fill_left();
    assert_eq!(load.next(), Some(1));
    assert_eq!(load.next(), Some(2));
    assert_eq!(load.next(), Some(4));
    assert_eq!(load.next(), Some(8));
    assert_eq!(load.next(), Some(16));
    load.overloaded();
    assert_eq!(load.next(), Some(12));
    load.overloaded();
    assert_eq!(load.next(), Some(10));
    load.overloaded();
    assert_eq!(load.next(), Some(9));
    load.overloaded();
    assert_eq!(load.next(), Some(6));
    assert_eq!(load.next(), Some(7));
    assert_eq!(load.next(), None);
    assert_eq!(load.estimate(), 8..9);
}

#[test]
fn unit_steps_terminate() {
    // with a start of 1 and no fidelity slack the bisection must still end
    let mut load = SearchStepper::until(1, 0);
    assert_eq!(load.next(), Some(1));
    assert_eq!(load.next(), Some(2));
    assert_eq!(load.next(), Some(4));
    load.overloaded();
    assert_eq!(load.next(), Some(3));
    load.overloaded();
    assert_eq!(load.next(), None);
    assert_eq!(load.estimate(), 2..3);
}

#[test]
fn through_trait() {
    let mut load = SearchStepper::until(2, 1);
    let load: &mut dyn CaseStepper = &mut load;
    assert_eq!(load.next(), Some(2));
    assert_eq!(load.next(), Some(4));
    load.overloaded();
    assert_eq!(load.next(), Some(3));
    assert_eq!(load.next(), None);
    assert_eq!(load.estimate(), 3..4);
}

#[test]
fn failed_first_load_ends_the_search() {
    let mut load = SearchStepper::new(8);
    assert_eq!(load.next(), Some(8));
    // e.g. the report at 8 queue pairs could not be parsed
    load.overloaded();
    assert_eq!(load.next(), None);
    assert_eq!(load.estimate(), 8..8);
}
