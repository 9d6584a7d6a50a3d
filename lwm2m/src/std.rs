use embedded_time::rate::Fraction;

/// Implement [`embedded_time::Clock`] using [`std::time`] primitives.
///
/// One tick is one millisecond, counted from when the clock was
/// created.
#[derive(Debug, Clone, Copy)]
pub struct Clock(std::time::Instant);

impl Default for Clock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock {
  /// Create a new clock
  pub fn new() -> Self {
    Self(std::time::Instant::now())
  }
}

impl embedded_time::Clock for Clock {
  type T = u64;

  // milliseconds
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

  fn try_now(&self) -> Result<embedded_time::Instant<Self>, embedded_time::clock::Error> {
    let elapsed = std::time::Instant::now().duration_since(self.0);
    Ok(embedded_time::Instant::new(elapsed.as_millis() as u64))
  }
}
