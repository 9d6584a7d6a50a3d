use std_alloc::string::String;

use crate::retry::Strategy;
use crate::time::Millis;
use embedded_time::duration::Milliseconds;

/// Configuration options related to the client registration lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
  /// Retry strategy for Register requests that have not been
  /// answered.
  ///
  /// The total time spent retrying is always additionally bounded by
  /// the server's lifetime: once that budget is spent the client
  /// falls back to Unregistered.
  ///
  /// Defaults to an exponential retry strategy:
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use lwm2m::config::Registration;
  /// use lwm2m::retry::Strategy;
  /// use lwm2m::time::Millis;
  ///
  /// assert_eq!(Registration::default().retry_strategy,
  ///            Strategy::Exponential { init_min: Milliseconds(2_000),
  ///                                    init_max: Milliseconds(4_000) });
  /// ```
  pub retry_strategy: Strategy,

  /// How long before the registration lifetime runs out the Update
  /// should be sent.
  ///
  /// `None` scales with the lifetime: one tenth of it, clamped to
  /// [2s, 10s].
  ///
  /// ```
  /// use lwm2m::config::Registration;
  ///
  /// assert_eq!(Registration::default().update_margin, None);
  /// ```
  pub update_margin: Option<Millis>,
}

impl Default for Registration {
  fn default() -> Self {
    Registration { retry_strategy: Strategy::Exponential { init_min: Milliseconds(2_000),
                                                           init_max: Milliseconds(4_000) },
                   update_margin: None }
  }
}

impl Registration {
  /// The effective update margin for a given lifetime
  pub fn margin_for(&self, lifetime: Millis) -> Millis {
    match self.update_margin {
      | Some(margin) => margin,
      | None => Milliseconds((lifetime.0 / 10).clamp(2_000, 10_000)),
    }
  }
}

/// Client runtime config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
  /// The unique endpoint name sent as `ep=` at registration.
  /// Required; there is no default.
  pub name: String,

  /// URI prefix the object tree is anchored under, advertised in the
  /// registration payload as the `rt="oma.lwm2m"` root item.
  ///
  /// Defaults to none (objects live at the URI root).
  pub objects_path: Option<String>,

  /// MSISDN sent as `sms=` at registration. Informational only in
  /// this profile.
  pub sms: Option<String>,

  /// Seed mixed into generated message tokens, customizable to allow
  /// your application to generate tokens less guessably.
  ///
  /// ```
  /// use lwm2m::config::Client;
  ///
  /// assert_eq!(Client::new("dev").token_seed, 0);
  /// ```
  pub token_seed: u16,

  /// See [`Registration`]
  pub registration: Registration,
}

impl Client {
  /// Config for endpoint name `name`, everything else defaulted
  pub fn new(name: impl Into<String>) -> Self {
    Client { name: name.into(),
             objects_path: None,
             sms: None,
             token_seed: 0,
             registration: Registration::default() }
  }
}

/// Server runtime config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Server {
  /// UDP port the server transport should be bound to.
  ///
  /// ```
  /// use lwm2m::config::Server;
  ///
  /// assert_eq!(Server::default().port, 5683);
  /// ```
  pub port: u16,

  /// Seed mixed into generated tokens & location paths
  pub token_seed: u16,
}

impl Default for Server {
  fn default() -> Self {
    Server { port: 5683,
             token_seed: 0 }
  }
}
