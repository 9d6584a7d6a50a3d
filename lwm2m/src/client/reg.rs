use embedded_time::Instant;
use no_std_net::SocketAddr;
use std_alloc::format;
use std_alloc::string::String;
use std_alloc::vec::Vec;

use lwm2m_tlv::Value;

use super::Client;
use crate::binding::BindingMode;
use crate::error::{Error, TickError};
use crate::link::write_links;
use crate::msg::{Code, ContentFormat, Msg, Token};
use crate::net::{Addrd, Transport};
use crate::obj::Registry;
use crate::path::{InstanceId, ObjectId, ResourceId};
use crate::retry::{RetryTimer, Signal};
use embedded_time::duration::Milliseconds;
use crate::time::{since, Clock, Millis};

/// The Security object (id 0) & the resources read out of it
const SECURITY_OBJECT: ObjectId = ObjectId(0);
const SECURITY_URI: ResourceId = ResourceId(0);
const SECURITY_IS_BOOTSTRAP: ResourceId = ResourceId(1);
const SECURITY_SHORT_ID: ResourceId = ResourceId(10);

/// The Server object (id 1) & the resources read out of it
pub(crate) const SERVER_OBJECT: ObjectId = ObjectId(1);
const SERVER_SHORT_ID: ResourceId = ResourceId(0);
const SERVER_LIFETIME: ResourceId = ResourceId(1);
const SERVER_BINDING: ResourceId = ResourceId(7);

/// Registration lifetime when the Server object doesn't carry one
const DEFAULT_LIFETIME: Millis = Milliseconds(86_400_000);

/// How long a Deregister may stay unanswered before the server is
/// considered gone anyway
const DEREGISTER_TIMEOUT: Millis = Milliseconds(30_000);

/// Where a client currently stands with one of its servers
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum RegistrationState {
  /// No relationship (never registered, given up, or deregistered)
  Unregistered,
  /// Register sent, no 2.01 yet
  Registering,
  /// Registered; the location path is live
  Registered,
  /// Update sent, no 2.04 yet
  Updating,
  /// Deregister sent
  Deregistering,
}

/// Errors encounterable extracting servers & sending the first
/// Register
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartError<E> {
  /// Reading the Security/Server objects failed
  ServerObjects(Error),
  /// A Server URI resource was not `coap://<ip>[:port]`
  BadServerUri(String),
  /// A Security instance named a short server id with no Server
  /// object partner
  NoMatchingServer(u16),
  /// The Server object asked for a binding this profile can't do
  UnsupportedBinding(BindingMode),
  /// No non-bootstrap server accounts found
  NoServers,
  /// Sending the first Register failed
  Send(TickError<E>),
}

pub(crate) enum Phase<C: Clock> {
  Unregistered,
  Registering {
    token: Token,
    retry: RetryTimer<C>,
  },
  Registered {
    registered_at: Instant<C>,
  },
  Updating {
    token: Token,
    sent_at: Instant<C>,
  },
  Deregistering {
    token: Token,
    started: Instant<C>,
  },
}

pub(crate) struct KnownServer<C: Clock> {
  pub addr: SocketAddr,
  pub short_id: u16,
  pub lifetime: Millis,
  pub binding: BindingMode,
  pub location: Option<String>,
  pub phase: Phase<C>,
  /// The object set changed since the last successful
  /// Register/Update; the next Update re-lists it
  pub objects_dirty: bool,
  /// The lifetime changed; the next Update carries `lt=`
  pub lifetime_dirty: bool,
  /// An Update was asked for explicitly
  pub update_requested: bool,
  /// An Update was asked for *while one was in flight*; coalesced
  /// into exactly one follow-up
  pub update_again: bool,
}

impl<C: Clock> Phase<C> {
  fn kind(&self) -> RegistrationState {
    match self {
      | Phase::Unregistered => RegistrationState::Unregistered,
      | Phase::Registering { .. } => RegistrationState::Registering,
      | Phase::Registered { .. } => RegistrationState::Registered,
      | Phase::Updating { .. } => RegistrationState::Updating,
      | Phase::Deregistering { .. } => RegistrationState::Deregistering,
    }
  }
}

impl<C: Clock> KnownServer<C> {
  /// The token of the registration-interface exchange currently in
  /// flight, if any.
  ///
  /// At most one exists per server at any time.
  fn pending_token(&self) -> Option<Token> {
    match &self.phase {
      | Phase::Registering { token, .. }
      | Phase::Updating { token, .. }
      | Phase::Deregistering { token, .. } => Some(*token),
      | _ => None,
    }
  }
}

/// Read one scalar out of an object, treating an absent optional
/// resource as `None`
fn read_scalar<S>(registry: &mut Registry<S>,
                  state: &mut S,
                  object: ObjectId,
                  instance: InstanceId,
                  resource: ResourceId)
                  -> Result<Option<Value>, Error> {
  let obj = registry.object_mut(object).ok_or(Error::NotFound)?;

  match obj.read(state, instance, resource) {
    | Ok(res) => Ok(res.values().first().cloned()),
    | Err(Error::NotFound) => Ok(None),
    | Err(e) => Err(e),
  }
}

fn parse_coap_uri(uri: &str) -> Option<SocketAddr> {
  let rest = uri.strip_prefix("coap://")?;
  let rest = rest.split('/').next().unwrap_or(rest);

  rest.parse::<SocketAddr>()
      .ok()
      .or_else(|| {
        rest.parse::<no_std_net::IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, 5683))
      })
}

impl<S, Tr, C> Client<S, Tr, C>
  where Tr: Transport,
        C: Clock
{
  /// Walk the Security (0) and Server (1) objects, build the known-
  /// server table, and send a Register to every server found.
  ///
  /// Bootstrap-server Security instances are skipped (bootstrap is
  /// out of scope); a declared binding other than `U` is refused with
  /// [`StartError::UnsupportedBinding`].
  pub fn start(&mut self, now: Instant<C>) -> Result<(), StartError<Tr::Error>> {
    let security: Vec<InstanceId> = self.registry
                                        .instances_of(SECURITY_OBJECT)
                                        .map(|is| is.to_vec())
                                        .unwrap_or_default();
    let accounts: Vec<InstanceId> = self.registry
                                        .instances_of(SERVER_OBJECT)
                                        .map(|is| is.to_vec())
                                        .unwrap_or_default();

    for sec in security {
      let read = |registry: &mut Registry<S>, state: &mut S, r| {
        read_scalar(registry, state, SECURITY_OBJECT, sec, r)
      };

      if let Some(Value::Bool(true)) =
        read(&mut self.registry, &mut self.state, SECURITY_IS_BOOTSTRAP)
          .map_err(StartError::ServerObjects)?
      {
        continue;
      }

      let uri = match read(&mut self.registry, &mut self.state, SECURITY_URI)
        .map_err(StartError::ServerObjects)?
      {
        | Some(Value::String(uri)) => uri,
        | _ => return Err(StartError::BadServerUri(String::new())),
      };

      let short_id = match read(&mut self.registry, &mut self.state, SECURITY_SHORT_ID)
        .map_err(StartError::ServerObjects)?
      {
        | Some(Value::Int(n)) => n as u16,
        | _ => 0,
      };

      let (lifetime, binding) = self.server_account(&accounts, short_id)
                                    .map_err(|e| match e {
                                      | Error::NotFound => StartError::NoMatchingServer(short_id),
                                      | e => StartError::ServerObjects(e),
                                    })?;

      if binding != BindingMode::U {
        return Err(StartError::UnsupportedBinding(binding));
      }

      let addr =
        parse_coap_uri(&uri).ok_or_else(|| StartError::BadServerUri(uri.clone()))?;

      self.servers.push(KnownServer { addr,
                                      short_id,
                                      lifetime,
                                      binding,
                                      location: None,
                                      phase: Phase::Unregistered,
                                      objects_dirty: false,
                                      lifetime_dirty: false,
                                      update_requested: false,
                                      update_again: false });
    }

    if self.servers.is_empty() {
      return Err(StartError::NoServers);
    }

    for ix in 0..self.servers.len() {
      self.send_register(ix, now).map_err(StartError::Send)?;
    }

    Ok(())
  }

  /// The Server-object account (lifetime, binding) for `short_id`
  fn server_account(&mut self,
                    accounts: &[InstanceId],
                    short_id: u16)
                    -> Result<(Millis, BindingMode), Error> {
    for acct in accounts {
      match read_scalar(&mut self.registry,
                        &mut self.state,
                        SERVER_OBJECT,
                        *acct,
                        SERVER_SHORT_ID)?
      {
        | Some(Value::Int(n)) if n as u16 == short_id => {
          let lifetime = match read_scalar(&mut self.registry,
                                           &mut self.state,
                                           SERVER_OBJECT,
                                           *acct,
                                           SERVER_LIFETIME)?
          {
            | Some(Value::Int(secs)) if secs > 0 => Milliseconds(secs as u64 * 1_000),
            | _ => DEFAULT_LIFETIME,
          };

          let binding = match read_scalar(&mut self.registry,
                                          &mut self.state,
                                          SERVER_OBJECT,
                                          *acct,
                                          SERVER_BINDING)?
          {
            | Some(Value::String(b)) => BindingMode::parse(&b),
            | _ => BindingMode::U,
          };

          return Ok((lifetime, binding));
        },
        | _ => continue,
      }
    }

    Err(Error::NotFound)
  }

  /// Where the client stands with the server known as `short_id`
  pub fn registration_state(&self, short_id: u16) -> Option<RegistrationState> {
    self.servers
        .iter()
        .find(|s| s.short_id == short_id)
        .map(|s| s.phase.kind())
  }

  /// Ask every registered server for an immediate Update.
  ///
  /// Asked again while one is already in flight, the requests
  /// coalesce into a single follow-up Update.
  pub fn send_update(&mut self, now: Instant<C>) -> Result<(), TickError<Tr::Error>> {
    for srv in self.servers.iter_mut() {
      match srv.phase {
        | Phase::Updating { .. } => srv.update_again = true,
        | _ => srv.update_requested = true,
      }
    }

    self.step_registration(now)
  }

  /// Deregister from every server and drop all observations.
  pub fn stop(&mut self, now: Instant<C>) -> Result<(), TickError<Tr::Error>> {
    for ix in 0..self.servers.len() {
      let live = matches!(self.servers[ix].phase.kind(),
                          RegistrationState::Registered | RegistrationState::Updating);

      match (self.servers[ix].location.clone(), live) {
        | (Some(location), true) => {
          let token = self.next_token(now);
          let msg = Msg::request(Code::DELETE, location, token);
          let addr = self.servers[ix].addr;

          nb::block!(self.transport.send(Addrd(msg.clone(), addr))).map_err(TickError::Transport)?;

          log::debug!("deregistering from server {}", self.servers[ix].short_id);
          self.servers[ix].phase = Phase::Deregistering { token,
                                                          started: now };
        },
        | _ => self.servers[ix].phase = Phase::Unregistered,
      }
    }

    self.drop_all_observations();
    Ok(())
  }

  /// Advance every server's lifecycle: retry unanswered Registers,
  /// send Updates that have come due, reap Deregisters nobody
  /// answered.
  pub(crate) fn step_registration(&mut self,
                                  now: Instant<C>)
                                  -> Result<(), TickError<Tr::Error>> {
    enum Act {
      Nothing,
      Register,
      Update,
      GiveUp,
      Reap,
    }

    for ix in 0..self.servers.len() {
      let act = {
        let margin = self.cfg.registration.margin_for(self.servers[ix].lifetime);
        let srv = &mut self.servers[ix];

        match &mut srv.phase {
          | Phase::Unregistered => Act::Nothing,
          | Phase::Registering { retry, .. } => match retry.poll(now) {
            | Ok(Signal::Retry) => Act::Register,
            | Ok(Signal::Exhausted) => Act::GiveUp,
            | Err(nb::Error::WouldBlock) => Act::Nothing,
            | Err(nb::Error::Other(never)) => match never {},
          },
          | Phase::Registered { registered_at } => {
            let due =
              since(now, *registered_at).0 >= srv.lifetime.0.saturating_sub(margin.0);

            if due || srv.update_requested || srv.objects_dirty || srv.lifetime_dirty {
              Act::Update
            } else {
              Act::Nothing
            }
          },
          | Phase::Updating { sent_at, .. } => {
            // an Update lost for a whole lifetime means the
            // registration is gone; start over
            if since(now, *sent_at) >= srv.lifetime {
              Act::Register
            } else {
              Act::Nothing
            }
          },
          | Phase::Deregistering { started, .. } => {
            if since(now, *started) >= DEREGISTER_TIMEOUT {
              Act::Reap
            } else {
              Act::Nothing
            }
          },
        }
      };

      match act {
        | Act::Nothing => (),
        | Act::Register => self.send_register(ix, now)?,
        | Act::Update => self.send_update_for(ix, now)?,
        | Act::GiveUp => {
          log::warn!("server {} never answered Register; giving up",
                     self.servers[ix].short_id);
          self.servers[ix].phase = Phase::Unregistered;
        },
        | Act::Reap => self.servers[ix].phase = Phase::Unregistered,
      }
    }

    Ok(())
  }

  /// POST `/rd?ep=<name>&lt=<lifetime>&lwm2m=1.0&b=U` with a link
  /// payload listing every object instance
  fn send_register(&mut self,
                   ix: usize,
                   now: Instant<C>)
                   -> Result<(), TickError<Tr::Error>> {
    let token = self.next_token(now);

    // the Security object stays private to the client
    let mut links = String::new();
    write_links(&mut links,
                self.cfg.objects_path.as_deref(),
                self.registry
                    .instances()
                    .filter(|(o, _)| *o != SECURITY_OBJECT)
                    .map(|(o, i)| (o, Some(i))));

    let srv = &self.servers[ix];
    let mut msg = Msg::request(Code::POST, "rd", token);
    msg.queries.push(format!("ep={}", self.cfg.name));
    msg.queries.push(format!("lt={}", srv.lifetime.0 / 1_000));
    msg.queries.push(String::from("lwm2m=1.0"));
    msg.queries.push(format!("b={}", srv.binding.as_str()));
    if let Some(sms) = self.cfg.sms.as_ref() {
      msg.queries.push(format!("sms={}", sms));
    }
    msg.content_format = Some(ContentFormat::LinkFormat);
    msg.payload = links.into_bytes();

    let addr = srv.addr;
    nb::block!(self.transport.send(Addrd(msg.clone(), addr))).map_err(TickError::Transport)?;

    // a resend keeps its backoff schedule; a fresh registration
    // starts one bounded by the lifetime
    let retry = match &self.servers[ix].phase {
      | Phase::Registering { retry, .. } => *retry,
      | _ => RetryTimer::new(now,
                             self.cfg.registration.retry_strategy,
                             Some(self.servers[ix].lifetime)),
    };

    log::debug!("registering with server {}", self.servers[ix].short_id);
    self.servers[ix].phase = Phase::Registering { token, retry };
    Ok(())
  }

  /// POST the stored location; the object list rides along only when
  /// it changed, `lt=` only when the lifetime changed
  fn send_update_for(&mut self,
                     ix: usize,
                     now: Instant<C>)
                     -> Result<(), TickError<Tr::Error>> {
    let location = match self.servers[ix].location.clone() {
      | Some(location) => location,
      | None => return self.send_register(ix, now),
    };

    let token = self.next_token(now);
    let srv = &self.servers[ix];

    let mut msg = Msg::request(Code::POST, location, token);
    if srv.lifetime_dirty {
      msg.queries.push(format!("lt={}", srv.lifetime.0 / 1_000));
    }
    if srv.objects_dirty {
      let mut links = String::new();
      write_links(&mut links,
                  self.cfg.objects_path.as_deref(),
                  self.registry
                      .instances()
                      .filter(|(o, _)| *o != SECURITY_OBJECT)
                      .map(|(o, i)| (o, Some(i))));
      msg.content_format = Some(ContentFormat::LinkFormat);
      msg.payload = links.into_bytes();
    }

    let addr = srv.addr;
    nb::block!(self.transport.send(Addrd(msg.clone(), addr))).map_err(TickError::Transport)?;

    log::debug!("updating registration with server {}", self.servers[ix].short_id);
    let srv = &mut self.servers[ix];
    srv.objects_dirty = false;
    srv.lifetime_dirty = false;
    srv.update_requested = false;
    srv.phase = Phase::Updating { token, sent_at: now };
    Ok(())
  }

  /// Route a response from a server to the registration exchange
  /// waiting on it
  pub(crate) fn handle_registration_reply(&mut self,
                                          reply: Addrd<Msg>,
                                          now: Instant<C>)
                                          -> Result<(), TickError<Tr::Error>> {
    let Addrd(msg, addr) = reply;

    let ix = match self.servers
                      .iter()
                      .position(|s| s.addr == addr && s.pending_token() == Some(msg.token))
    {
      | Some(ix) => ix,
      | None => {
        log::debug!("dropping reply with unmatched token: {}",
                    crate::logging::msg_summary(&msg));
        return Ok(());
      },
    };

    match self.servers[ix].phase.kind() {
      | RegistrationState::Registering => {
        if msg.code == Code::CREATED && !msg.path.is_empty() {
          log::info!("registered with server {} at {}",
                     self.servers[ix].short_id,
                     msg.path);
          let srv = &mut self.servers[ix];
          srv.location = Some(msg.path);
          srv.objects_dirty = false;
          srv.lifetime_dirty = false;
          srv.phase = Phase::Registered { registered_at: now };
        } else {
          // stay put; the backoff timer drives the resend
          log::warn!("server {} refused Register: {}",
                     self.servers[ix].short_id,
                     crate::logging::msg_summary(&msg));
        }
      },
      | RegistrationState::Updating => match msg.code {
        | Code::CHANGED => {
          self.servers[ix].phase = Phase::Registered { registered_at: now };

          if self.servers[ix].update_again {
            self.servers[ix].update_again = false;
            self.send_update_for(ix, now)?;
          }
        },
        | code => {
          // 4.04: the location died with the server's state; anything
          // else is equally unrecoverable by updating again
          log::warn!("server {} answered Update with {}; re-registering",
                     self.servers[ix].short_id,
                     String::from_iter(code.to_human()));
          self.servers[ix].location = None;
          self.servers[ix].update_again = false;
          self.send_register(ix, now)?;
        },
      },
      | RegistrationState::Deregistering => {
        log::debug!("server {} confirmed Deregister", self.servers[ix].short_id);
        self.servers[ix].phase = Phase::Unregistered;
        self.servers[ix].location = None;
      },
      | RegistrationState::Unregistered | RegistrationState::Registered => (),
    }

    Ok(())
  }

  /// After a server wrote to the Server object, pick up settings the
  /// lifecycle cares about (the lifetime)
  pub(crate) fn refresh_server_account(&mut self, instance: InstanceId) {
    let short_id = match read_scalar(&mut self.registry,
                                     &mut self.state,
                                     SERVER_OBJECT,
                                     instance,
                                     SERVER_SHORT_ID)
    {
      | Ok(Some(Value::Int(n))) => n as u16,
      | _ => return,
    };

    let lifetime = match read_scalar(&mut self.registry,
                                     &mut self.state,
                                     SERVER_OBJECT,
                                     instance,
                                     SERVER_LIFETIME)
    {
      | Ok(Some(Value::Int(secs))) if secs > 0 => Milliseconds(secs as u64 * 1_000),
      | _ => return,
    };

    if let Some(srv) = self.servers.iter_mut().find(|s| s.short_id == short_id) {
      if srv.lifetime != lifetime {
        log::debug!("server {} lifetime is now {}s", short_id, lifetime.0 / 1_000);
        srv.lifetime = lifetime;
        srv.lifetime_dirty = true;
      }
    }
  }
}
