use embedded_time::duration::Milliseconds;
use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Milliseconds elapsed between `t0` and `now`, saturating at zero
/// when `now` is earlier.
pub fn since<C: Clock>(now: Instant<C>, t0: Instant<C>) -> Millis {
  if now < t0 {
    Milliseconds(0)
  } else {
    (now - t0).try_into().unwrap_or(Milliseconds(u64::MAX))
  }
}

/// Milliseconds since the clock's epoch
pub fn millis_since_epoch<C: Clock>(t: Instant<C>) -> Millis {
  Millis::try_from(t.duration_since_epoch()).unwrap_or(Milliseconds(u64::MAX))
}
