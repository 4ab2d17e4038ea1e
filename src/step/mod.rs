//! Strategies for choosing the load of the next test case.
//!
//! A stepper is an [`Iterator`] over loads. After every yielded load the controller tells the
//! stepper whether the system "kept up" (throughput improved) by calling
//! [`CaseStepper::overloaded`] when it did not. The stepper uses that to narrow down the range in
//! which peak throughput lies, and eventually stops yielding loads.

mod search;
mod sweep;

pub use search::SearchStepper;
pub use sweep::SweepStepper;

/// A strategy that yields successive loads and reacts to whether the previous load improved
/// throughput.
pub trait CaseStepper: Iterator<Item = usize> {
    /// Indicate that the previous load yielded by [`Iterator::next`] did not improve throughput
    /// (or did not produce a throughput at all).
    ///
    /// This will affect what value the next call to [`Iterator::next`] yields.
    fn overloaded(&mut self);

    /// Give the current estimate of the load range in which peak throughput lies.
    fn estimate(&self) -> core::ops::Range<usize>;
}

impl<S> CaseStepper for Box<S>
where
    S: CaseStepper + ?Sized,
{
    fn overloaded(&mut self) {
        (**self).overloaded()
    }

    fn estimate(&self) -> core::ops::Range<usize> {
        (**self).estimate()
    }
}

/// Feed `stepper` the throughput `curve` gives for each load, reporting every load that fails to
/// beat the best throughput so far. Returns the loads in the order they were tried.
#[cfg(test)]
fn climb<S>(stepper: &mut S, curve: impl Fn(usize) -> f64) -> Vec<usize>
where
    S: CaseStepper + ?Sized,
{
    let mut best = f64::NEG_INFINITY;
    let mut tried = Vec::new();
    while let Some(load) = stepper.next() {
        tried.push(load);
        let t = curve(load);
        if t > best {
            best = t;
        } else {
            stepper.overloaded();
        }
    }
    tried
}
