use embedded_time::Instant;
use lwm2m_tlv::{encode_record, EncodeError, Id, Kind, Resource};
use no_std_net::SocketAddr;
use rand::Rng;
use std_alloc::boxed::Box;
use std_alloc::format;
use std_alloc::string::{String, ToString};
use std_alloc::vec::Vec;

use super::Server;
use crate::error::Error;
use crate::msg::{Code, ContentFormat, Msg, Token};
use crate::net::{Addrd, Transport};
use crate::path::{InstanceId, ObjectId, Path};
use crate::time::Clock;

/// Errors encounterable issuing a management request
#[derive(Debug)]
pub enum RequestError<E> {
  /// No client with that endpoint name is registered
  UnknownClient,
  /// The operation needs a deeper path (e.g. Execute wants `/O/I/R`)
  BadPath,
  /// No such observation to remove
  UnknownObservation,
  /// The TLV payload could not be serialized
  Encode(EncodeError),
  /// The transport refused the message
  Transport(E),
}

impl<E> RequestError<E> {
  /// The [`Error`] kind this maps to when surfaced uniformly
  pub fn kind(&self) -> Error {
    match self {
      | Self::UnknownClient | Self::UnknownObservation => Error::NotFound,
      | Self::BadPath => Error::BadRequest,
      | Self::Encode(_) => Error::Internal,
      | Self::Transport(_) => Error::Internal,
    }
  }
}

/// An observe callback: fired once per notification, for as long as
/// the watcher stays subscribed.
///
/// Arguments: user state, client name, observed path, response code,
/// content format, payload.
///
/// This is a plain `fn` so subscriptions have an identity -
/// [`Server::unobserve`] removes exactly the watcher that was added.
pub type ObserveHandler<S> =
  fn(&mut S, &str, &Path, Code, Option<ContentFormat>, &[u8]);

pub(crate) enum Reply<S> {
  /// Write/Create/Execute/Delete: one status, then forgotten
  Status(Box<dyn FnOnce(&mut S, Code)>),
  /// Read (and the final reply of an observe cancel): one payload,
  /// then forgotten
  Content(Box<dyn FnOnce(&mut S, Code, Option<ContentFormat>, &[u8])>),
}

/// One outbound request waiting for its reply, keyed by (peer,
/// token)
pub(crate) struct PendingExchange<S> {
  pub client: String,
  pub addr: SocketAddr,
  pub token: Token,
  pub reply: Reply<S>,
}

/// One standing observation of (client, path).
///
/// Many watchers share a single wire observation; Observe=1 goes out
/// only when the last one leaves.
pub(crate) struct ClientObservation<S> {
  pub client: String,
  pub addr: SocketAddr,
  pub path: Path,
  pub token: Token,
  pub last_seq: Option<u32>,
  pub watchers: Vec<ObserveHandler<S>>,
}

fn resources_tlv(resources: &[Resource]) -> Result<Vec<u8>, EncodeError> {
  let mut payload = Vec::new();
  for resource in resources {
    resource.extend_tlv(&mut payload)?;
  }
  Ok(payload)
}

impl<S, Tr, C> Server<S, Tr, C>
  where Tr: Transport,
        C: Clock,
        S: 'static
{
  /// Read the node at `path` on `client`; the handler fires once
  /// with the outcome.
  pub fn read(&mut self,
              now: Instant<C>,
              client: &str,
              path: Path,
              handler: impl FnOnce(&mut S, Code, Option<ContentFormat>, &[u8]) + 'static)
              -> Result<(), RequestError<Tr::Error>> {
    let (addr, token, uri) = self.prepare(client, now, &path)?;

    let msg = Msg::request(Code::GET, uri, token);
    self.send_pending(client, addr, token, msg, Reply::Content(Box::new(handler)))
  }

  /// Write `resources` at `path` (instance- or resource-level) on
  /// `client`; the handler fires once with the response code.
  pub fn write(&mut self,
               now: Instant<C>,
               client: &str,
               path: Path,
               resources: &[Resource],
               handler: impl FnOnce(&mut S, Code) + 'static)
               -> Result<(), RequestError<Tr::Error>> {
    if path.instance().is_none() {
      return Err(RequestError::BadPath);
    }

    let payload = resources_tlv(resources).map_err(RequestError::Encode)?;
    let (addr, token, uri) = self.prepare(client, now, &path)?;

    let mut msg = Msg::request(Code::PUT, uri, token);
    msg.content_format = Some(ContentFormat::Tlv);
    msg.payload = payload;

    self.send_pending(client, addr, token, msg, Reply::Status(Box::new(handler)))
  }

  /// Create an instance of `object` on `client`. Passing an
  /// instance id wraps the resources in an ObjectInstance record so
  /// the client uses that id; otherwise the client picks.
  pub fn create(&mut self,
                now: Instant<C>,
                client: &str,
                object: ObjectId,
                instance: Option<InstanceId>,
                resources: &[Resource],
                handler: impl FnOnce(&mut S, Code) + 'static)
                -> Result<(), RequestError<Tr::Error>> {
    let inner = resources_tlv(resources).map_err(RequestError::Encode)?;

    let payload = match instance {
      | Some(i) => {
        let mut wrapped = Vec::new();
        encode_record(Kind::ObjectInstance, Id(i.0), &inner, &mut wrapped)
          .map_err(RequestError::Encode)?;
        wrapped
      },
      | None => inner,
    };

    let path = Path::Object(object);
    let (addr, token, uri) = self.prepare(client, now, &path)?;

    let mut msg = Msg::request(Code::POST, uri, token);
    msg.content_format = Some(ContentFormat::Tlv);
    msg.payload = payload;

    self.send_pending(client, addr, token, msg, Reply::Status(Box::new(handler)))
  }

  /// Invoke the executable resource at `path` on `client`, with
  /// `args` as the (possibly empty) text arguments.
  pub fn execute(&mut self,
                 now: Instant<C>,
                 client: &str,
                 path: Path,
                 args: &str,
                 handler: impl FnOnce(&mut S, Code) + 'static)
                 -> Result<(), RequestError<Tr::Error>> {
    if path.resource().is_none() {
      return Err(RequestError::BadPath);
    }

    let (addr, token, uri) = self.prepare(client, now, &path)?;

    let mut msg = Msg::request(Code::POST, uri, token);
    if !args.is_empty() {
      msg.content_format = Some(ContentFormat::Text);
      msg.payload = args.as_bytes().to_vec();
    }

    self.send_pending(client, addr, token, msg, Reply::Status(Box::new(handler)))
  }

  /// Delete the instance at `path` on `client`.
  pub fn delete(&mut self,
                now: Instant<C>,
                client: &str,
                path: Path,
                handler: impl FnOnce(&mut S, Code) + 'static)
                -> Result<(), RequestError<Tr::Error>> {
    if path.instance().is_none() {
      return Err(RequestError::BadPath);
    }

    let (addr, token, uri) = self.prepare(client, now, &path)?;

    let msg = Msg::request(Code::DELETE, uri, token);
    self.send_pending(client, addr, token, msg, Reply::Status(Box::new(handler)))
  }

  /// Subscribe `handler` to changes of `path` on `client`.
  ///
  /// The first watcher on a (client, path) puts an observation on
  /// the wire (GET with Observe=0); later watchers ride along on it.
  pub fn observe(&mut self,
                 now: Instant<C>,
                 client: &str,
                 path: Path,
                 handler: ObserveHandler<S>)
                 -> Result<(), RequestError<Tr::Error>> {
    if let Some(obs) = self.observations
                           .iter_mut()
                           .find(|o| o.client == client && o.path == path)
    {
      if !obs.watchers.contains(&handler) {
        obs.watchers.push(handler);
      }
      return Ok(());
    }

    let (addr, token, uri) = self.prepare(client, now, &path)?;

    let mut msg = Msg::request(Code::GET, uri, token);
    msg.observe = Some(0);

    nb::block!(self.transport.send(Addrd(msg.clone(), addr))).map_err(RequestError::Transport)?;

    log::debug!("observing {} on client {:?}", path, client);
    self.observations.push(ClientObservation { client: client.to_string(),
                                               addr,
                                               path,
                                               token,
                                               last_seq: None,
                                               watchers: Vec::from([handler]) });
    Ok(())
  }

  /// Remove `handler`'s subscription on (client, path).
  ///
  /// Exactly one Observe=1 goes out - when the last watcher leaves;
  /// its final reply is delivered to that watcher.
  pub fn unobserve(&mut self,
                   client: &str,
                   path: Path,
                   handler: ObserveHandler<S>)
                   -> Result<(), RequestError<Tr::Error>> {
    let ix = self.observations
                 .iter()
                 .position(|o| o.client == client && o.path == path)
                 .ok_or(RequestError::UnknownObservation)?;

    {
      let obs = &mut self.observations[ix];
      let before = obs.watchers.len();
      obs.watchers.retain(|w| *w != handler);

      if obs.watchers.len() == before {
        return Err(RequestError::UnknownObservation);
      }
      if !obs.watchers.is_empty() {
        return Ok(());
      }
    }

    // last watcher is leaving: cancel on the wire, reusing the
    // observation's token, and route the final reply back to them
    let obs = self.observations.remove(ix);

    let mut msg = Msg::request(Code::GET, self.request_uri(client, &obs.path), obs.token);
    msg.observe = Some(1);

    nb::block!(self.transport.send(Addrd(msg.clone(), obs.addr))).map_err(RequestError::Transport)?;

    log::debug!("unobserving {} on client {:?}", obs.path, client);

    let (client_name, path) = (obs.client.clone(), obs.path);
    self.pending.push(PendingExchange {
      client: obs.client,
      addr: obs.addr,
      token: obs.token,
      reply: Reply::Content(Box::new(move |state, code, format, payload| {
               handler(state, &client_name, &path, code, format, payload)
             })),
    });

    Ok(())
  }

  /// Match a reply to the exchange or observation waiting on it;
  /// unmatched tokens are dropped.
  pub(crate) fn handle_reply(&mut self, reply: Addrd<Msg>) {
    let Addrd(msg, addr) = reply;

    if let Some(ix) = self.observations
                          .iter()
                          .position(|o| o.token == msg.token && o.addr == addr)
    {
      // the Observe sequence rejects stale reorderings
      let fresh = match (msg.observe, self.observations[ix].last_seq) {
        | (Some(seq), Some(last)) if seq <= last => false,
        | (Some(seq), _) => {
          self.observations[ix].last_seq = Some(seq);
          true
        },
        | (None, _) => true,
      };

      if !fresh {
        log::debug!("dropping out-of-order notification: {}",
                    crate::logging::msg_summary(&msg));
        return;
      }

      let (client, path, watchers) = {
        let obs = &self.observations[ix];
        (obs.client.clone(), obs.path, obs.watchers.clone())
      };

      for watcher in watchers {
        watcher(&mut self.state,
                &client,
                &path,
                msg.code,
                msg.content_format,
                &msg.payload);
      }

      // the observed endpoint ended the observation
      if !msg.code.is_success() {
        log::debug!("client {:?} ended observation of {}", client, path);
        self.observations.remove(ix);
      }

      return;
    }

    if let Some(ix) = self.pending
                          .iter()
                          .position(|p| p.token == msg.token && p.addr == addr)
    {
      let exchange = self.pending.remove(ix);

      match exchange.reply {
        | Reply::Status(f) => f(&mut self.state, msg.code),
        | Reply::Content(f) => {
          f(&mut self.state, msg.code, msg.content_format, &msg.payload)
        },
      }

      return;
    }

    log::debug!("dropping reply with unmatched token: {}",
                crate::logging::msg_summary(&msg));
  }

  /// Complete every pending exchange toward `name` with 5.03 and
  /// drop its observations; called when the client leaves the
  /// directory.
  pub(crate) fn cancel_exchanges_for(&mut self, name: &str) {
    let pending = core::mem::take(&mut self.pending);
    let mut kept = Vec::new();

    for exchange in pending {
      if exchange.client != name {
        kept.push(exchange);
        continue;
      }

      match exchange.reply {
        | Reply::Status(f) => f(&mut self.state, Code::SERVICE_UNAVAILABLE),
        | Reply::Content(f) => {
          f(&mut self.state, Code::SERVICE_UNAVAILABLE, None, &[])
        },
      }
    }

    self.pending = kept;
    self.observations.retain(|o| o.client != name);
  }

  /// The client's address, a fresh token unique among its in-flight
  /// exchanges, and the request URI for `path` under its objects
  /// prefix
  fn prepare(&mut self,
             client: &str,
             now: Instant<C>,
             path: &Path)
             -> Result<(SocketAddr, Token, String), RequestError<Tr::Error>> {
    let addr = self.client(client)
                   .map(|c| c.addr())
                   .ok_or(RequestError::UnknownClient)?;
    let uri = self.request_uri(client, path);
    let token = self.fresh_token(client, now);

    Ok((addr, token, uri))
  }

  fn request_uri(&self, client: &str, path: &Path) -> String {
    match self.client(client).and_then(|c| c.objects_path()) {
      | Some(prefix) => format!("/{}{}", prefix, path),
      | None => path.to_string(),
    }
  }

  fn fresh_token(&mut self, client: &str, now: Instant<C>) -> Token {
    loop {
      let token = Token::from_bytes(self.rng(now).gen());

      let taken =
        self.pending
            .iter()
            .any(|p| p.client == client && p.token == token)
        || self.observations
               .iter()
               .any(|o| o.client == client && o.token == token);

      if !taken {
        return token;
      }
    }
  }

  fn send_pending(&mut self,
                  client: &str,
                  addr: SocketAddr,
                  token: Token,
                  msg: Msg,
                  reply: Reply<S>)
                  -> Result<(), RequestError<Tr::Error>> {
    nb::block!(self.transport.send(Addrd(msg.clone(), addr))).map_err(RequestError::Transport)?;

    self.pending.push(PendingExchange { client: client.to_string(),
                                        addr,
                                        token,
                                        reply });
    Ok(())
  }
}
