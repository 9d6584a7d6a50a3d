use embedded_time::Instant;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std_alloc::vec::Vec;

use crate::config;
use crate::error::TickError;
use crate::msg::CodeKind;
use crate::net::Transport;
use crate::time::{millis_since_epoch, Clock};

mod directory;
mod mgmt;

pub use directory::{ClientInfo, Monitor, RegEvent};
pub use mgmt::{ObserveHandler, RequestError};

use mgmt::{ClientObservation, PendingExchange};

/// The management side of an LWM2M conversation.
///
/// A `Server` owns:
/// - the directory of every client currently registered with it
///   (inserted by `POST /rd`, refreshed by Update, removed by
///   Deregister or lifetime expiry),
/// - the registration-event [monitors](Monitor),
/// - the management-interface issuer: outbound
///   Read/Write/Execute/Create/Delete/Observe requests and the
///   token-keyed demultiplexer their replies come back through.
///
/// Drive it by calling [`Server::tick`] from your event loop with the
/// current instant. All callbacks run synchronously inside `tick` (or
/// inside the issuing call, when it fails fast).
#[allow(missing_debug_implementations)]
pub struct Server<S, Tr, C>
  where Tr: Transport,
        C: Clock
{
  cfg: config::Server,
  transport: Tr,
  state: S,
  clients: Vec<ClientInfo<C>>,
  monitors: Vec<Monitor<S, C>>,
  pending: Vec<PendingExchange<S>>,
  observations: Vec<ClientObservation<S>>,
  rng: Option<ChaCha8Rng>,
}

impl<S, Tr, C> Server<S, Tr, C>
  where Tr: Transport,
        C: Clock
{
  /// Assemble a server from its parts.
  ///
  /// The transport should already be bound (conventionally to UDP
  /// port [`config::Server::port`]).
  pub fn new(cfg: config::Server, transport: Tr, state: S) -> Self {
    Self { cfg,
           transport,
           state,
           clients: Vec::new(),
           monitors: Vec::new(),
           pending: Vec::new(),
           observations: Vec::new(),
           rng: None }
  }

  /// Borrow the user state
  pub fn state(&self) -> &S {
    &self.state
  }

  /// Mutably borrow the user state
  pub fn state_mut(&mut self) -> &mut S {
    &mut self.state
  }

  /// Every currently registered client
  pub fn clients(&self) -> impl Iterator<Item = &ClientInfo<C>> {
    self.clients.iter()
  }

  /// The registered client named `name`.
  ///
  /// The borrow this hands back is valid until the next call that
  /// can mutate the directory (any `&mut self` method); snapshot
  /// what you need from it before then.
  pub fn client(&self, name: &str) -> Option<&ClientInfo<C>> {
    self.clients.iter().find(|c| c.name() == name)
  }

  /// Let time pass: drain the transport (applying registration
  /// traffic and demultiplexing management replies) and evict
  /// clients whose lifetime ran out.
  pub fn tick(&mut self, now: Instant<C>) -> Result<(), TickError<Tr::Error>> {
    while let Some(incoming) = self.transport.poll().map_err(TickError::Transport)? {
      match incoming.data().code.kind() {
        | CodeKind::Request => self.handle_request(incoming, now)?,
        | CodeKind::Response => self.handle_reply(incoming),
        | CodeKind::Empty => (),
      }
    }

    self.evict_expired(now);
    Ok(())
  }

  /// The random stream behind tokens & locations, seeded on first
  /// use from the config seed and the first instant this server saw
  fn rng(&mut self, now: Instant<C>) -> &mut ChaCha8Rng {
    self.rng.get_or_insert_with(|| {
              let seed =
                ((self.cfg.token_seed as u64) << 48) ^ millis_since_epoch(now).0;
              ChaCha8Rng::seed_from_u64(seed)
            })
  }

  #[cfg(test)]
  pub(crate) fn transport_mut(&mut self) -> &mut Tr {
    &mut self.transport
  }
}
