/// How a client declares it can be reached.
///
/// Only [`BindingMode::U`] (always-on UDP) is operative in this
/// profile; the others are accepted on the wire and stored in the
/// directory, but never alter behavior. A client asked to use any
/// mode but `U` answers 5.01 Not Implemented.
///
/// ```
/// use lwm2m::binding::BindingMode;
///
/// assert_eq!(BindingMode::parse("UQS"), BindingMode::UqS);
/// assert_eq!(BindingMode::parse("T"), BindingMode::Unknown);
/// assert_eq!(BindingMode::UqS.as_str(), "UQS");
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub enum BindingMode {
  /// UDP, always on
  #[default]
  U,
  /// UDP with queue mode
  Uq,
  /// SMS, always on
  S,
  /// SMS with queue mode
  Sq,
  /// UDP and SMS
  Us,
  /// UDP with queue mode, and SMS
  UqS,
  /// Anything else seen on the wire; stored verbatim in spirit,
  /// never originated
  Unknown,
}

impl BindingMode {
  /// Recognize a `b=` query value; anything unrecognized is
  /// [`BindingMode::Unknown`]
  pub fn parse(s: &str) -> Self {
    match s {
      | "U" => Self::U,
      | "UQ" => Self::Uq,
      | "S" => Self::S,
      | "SQ" => Self::Sq,
      | "US" => Self::Us,
      | "UQS" => Self::UqS,
      | _ => Self::Unknown,
    }
  }

  /// The query-parameter form (`b=U`).
  ///
  /// [`BindingMode::Unknown`] has no wire form; it is never
  /// originated.
  pub fn as_str(&self) -> &'static str {
    match self {
      | Self::U => "U",
      | Self::Uq => "UQ",
      | Self::S => "S",
      | Self::Sq => "SQ",
      | Self::Us => "US",
      | Self::UqS => "UQS",
      | Self::Unknown => "?",
    }
  }
}
