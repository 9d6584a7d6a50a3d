use core::ops::RangeInclusive;

use embedded_time::Instant;
use rand::{Rng, SeedableRng};

use embedded_time::duration::Milliseconds;
use crate::time::{millis_since_epoch, since, Clock, Millis};

/// A number of attempts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

/// Strategy to employ when retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Generate a random delay between `init_min` and `init_max` for the
  /// first retry, then double the delay after every failed attempt.
  Exponential {
    /// Minimum (inclusive) delay before the first retry
    init_min: Millis,
    /// Maximum (inclusive) delay before the first retry
    init_max: Millis,
  },
  /// Generate a random delay between `min` and `max`, and wait that
  /// long between every pair of attempts.
  Delay {
    /// Minimum (inclusive) delay between attempts
    min: Millis,
    /// Maximum (inclusive) delay between attempts
    max: Millis,
  },
}

impl Strategy {
  /// Are min & max delays the same? If so the random number generator
  /// can be skipped entirely.
  pub fn has_jitter(&self) -> bool {
    let rng = self.range();
    rng.start() != rng.end()
  }

  /// The min & max initial delays as an inclusive range
  pub fn range(&self) -> RangeInclusive<u64> {
    match self {
      | &Self::Delay { min: Milliseconds(min),
                       max: Milliseconds(max), } => (min..=max),
      | &Self::Exponential { init_min: Milliseconds(min),
                             init_max: Milliseconds(max), } => (min..=max),
    }
  }

  /// The total time this strategy will wait across `attempts` failed
  /// attempts, assuming the worst-case initial delay.
  pub fn max_time(&self, attempts: Attempts) -> Millis {
    Milliseconds(match self {
             | Self::Exponential { init_max, .. } => {
               Self::total_delay_exp(*init_max, attempts.0)
             },
             | Self::Delay { max: Milliseconds(max), .. } => max * attempts.0 as u64,
           })
  }

  /// Given the initial delay and the number of attempts performed so
  /// far, the total time that must have passed before the next retry.
  const fn total_delay_exp(Milliseconds(init): Millis, attempt: u16) -> u64 {
    // | attempt | total delay |
    // | 1       | init        |
    // | 2       | init * 2    |
    // | 3       | init * 4    |
    // | n       | init * 2^(n-1) |
    match attempt {
      | 0 => 0,
      | n => init.saturating_mul(2u64.saturating_pow((n - 1) as u32)),
    }
  }
}

/// Result of [`RetryTimer::poll`]: what the work being retried should
/// do now that enough time has passed.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Signal {
  /// A retry should be performed
  Retry,
  /// The time budget is spent; the work being retried should be
  /// considered poisoned
  Exhausted,
}

/// A non-blocking timer that paces retries of some fallible operation,
/// bounded by an optional total time budget.
///
/// It does not contain the work to be done; it lives alongside it and
/// answers "should I try again yet?".
///
/// ```
/// use embedded_time::duration::Milliseconds;
/// use embedded_time::Instant;
/// use lwm2m::retry::{RetryTimer, Signal, Strategy};
/// use lwm2m::time::Millis;
///
/// // one tick of lwm2m::std::Clock is one millisecond
/// let at = |n| Instant::<lwm2m::std::Clock>::new(n);
///
/// let strategy = Strategy::Delay { min: Milliseconds(1_000),
///                                  max: Milliseconds(1_000) };
/// let mut retry = RetryTimer::new(at(0), strategy, Some(Milliseconds(10_000)));
///
/// // too soon:
/// assert_eq!(retry.poll(at(999)), Err(nb::Error::WouldBlock));
/// // a second elapsed, go again:
/// assert_eq!(retry.poll(at(1_000)), Ok(Signal::Retry));
/// // budget spent:
/// assert_eq!(retry.poll(at(10_000)), Ok(Signal::Exhausted));
/// ```
#[derive(Debug)]
pub struct RetryTimer<C: Clock> {
  start: Instant<C>,
  init: Millis,
  strategy: Strategy,
  attempts: Attempts,
  budget: Option<Millis>,
}

impl<C: Clock> Clone for RetryTimer<C> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<C: Clock> Copy for RetryTimer<C> {}

impl<C: Clock> RetryTimer<C> {
  /// Create a new retrier.
  ///
  /// `start` is when the first attempt happened; `budget` bounds the
  /// total time spent retrying (`None` retries forever).
  pub fn new(start: Instant<C>, strategy: Strategy, budget: Option<Millis>) -> Self {
    Self { start,
           strategy,
           init: if strategy.has_jitter() {
             let mut rand =
               rand_chacha::ChaCha8Rng::seed_from_u64(millis_since_epoch(start).0);
             Milliseconds(rand.gen_range(strategy.range()))
           } else {
             Milliseconds(*strategy.range().start())
           },
           budget,
           attempts: Attempts(1) }
  }

  /// When the thing being retried fails again, ask what to do about
  /// it.
  ///
  /// Returns `nb::Error::WouldBlock` while the appropriate delay has
  /// not fully passed yet.
  pub fn poll(&mut self, now: Instant<C>) -> nb::Result<Signal, core::convert::Infallible> {
    let waited = since(now, self.start);

    match self.budget {
      | Some(budget) if waited >= budget => return Ok(Signal::Exhausted),
      | _ => (),
    }

    if self.is_ready(waited, self.attempts.0) {
      self.attempts.0 = self.attempts.0.saturating_add(1);
      Ok(Signal::Retry)
    } else {
      Err(nb::Error::WouldBlock)
    }
  }

  /// Check if the strategy says an appropriate time has passed
  fn is_ready(&self, Milliseconds(waited): Millis, attempts: u16) -> bool {
    if attempts == 0 {
      return true;
    }

    match self.strategy {
      | Strategy::Delay { .. } => waited >= self.init.0 * attempts as u64,
      | Strategy::Exponential { .. } => {
        waited >= Strategy::total_delay_exp(self.init, attempts)
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::ClockMock;

  fn at(n: u64) -> Instant<ClockMock> {
    ClockMock::instant(n)
  }

  #[test]
  fn delay_retrier() {
    let strategy = Strategy::Delay { min: Milliseconds(1_000),
                                     max: Milliseconds(1_000) };
    let mut retry = RetryTimer::new(at(0), strategy, None);

    // attempt 1 happens before the timer is first polled

    assert_eq!(retry.poll(at(999)), Err(nb::Error::WouldBlock));
    assert_eq!(retry.poll(at(1_000)), Ok(Signal::Retry));
    // fails again (attempt 2)

    assert_eq!(retry.poll(at(1_999)), Err(nb::Error::WouldBlock));
    assert_eq!(retry.poll(at(2_000)), Ok(Signal::Retry));
  }

  #[test]
  fn exponential_retrier() {
    let strategy = Strategy::Exponential { init_min: Milliseconds(1_000),
                                           init_max: Milliseconds(1_000) };
    let mut retry = RetryTimer::new(at(0), strategy, None);

    assert_eq!(retry.poll(at(999)), Err(nb::Error::WouldBlock));
    assert_eq!(retry.poll(at(1_000)), Ok(Signal::Retry));

    assert_eq!(retry.poll(at(1_999)), Err(nb::Error::WouldBlock));
    assert_eq!(retry.poll(at(2_000)), Ok(Signal::Retry));

    assert_eq!(retry.poll(at(3_999)), Err(nb::Error::WouldBlock));
    assert_eq!(retry.poll(at(4_000)), Ok(Signal::Retry));

    assert_eq!(retry.poll(at(8_000)), Ok(Signal::Retry));
  }

  #[test]
  fn budget_exhaustion() {
    let strategy = Strategy::Exponential { init_min: Milliseconds(1_000),
                                           init_max: Milliseconds(1_000) };
    let mut retry = RetryTimer::new(at(0), strategy, Some(Milliseconds(5_000)));

    assert_eq!(retry.poll(at(1_000)), Ok(Signal::Retry));
    assert_eq!(retry.poll(at(2_000)), Ok(Signal::Retry));
    assert_eq!(retry.poll(at(5_000)), Ok(Signal::Exhausted));
    assert_eq!(retry.poll(at(60_000)), Ok(Signal::Exhausted));
  }

  #[test]
  fn exp_calculation() {
    let init = Milliseconds(100);
    assert_eq!(Strategy::total_delay_exp(init, 1), 100);
    assert_eq!(Strategy::total_delay_exp(init, 2), 200);
    assert_eq!(Strategy::total_delay_exp(init, 3), 400);
  }
}
