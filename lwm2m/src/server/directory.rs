use core::fmt;

use embedded_time::Instant;
use no_std_net::SocketAddr;
use rand::Rng;
use std_alloc::collections::BTreeMap;
use std_alloc::format;
use std_alloc::string::{String, ToString};
use std_alloc::vec::Vec;

use super::Server;
use crate::binding::BindingMode;
use crate::error::TickError;
use crate::link::parse_links;
use crate::msg::{Code, Msg};
use crate::net::{Addrd, Transport};
use crate::path::{InstanceId, ObjectId};
use embedded_time::duration::Milliseconds;
use crate::time::{since, Clock, Millis};

/// Registration lifetime when the client's `lt=` is absent
const DEFAULT_LIFETIME: Millis = Milliseconds(86_400_000);

/// A transition in a client's relationship with this server
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum RegEvent {
  /// The client registered (or re-registered under the same name)
  Register,
  /// The client refreshed or changed its registration
  Update,
  /// The client deregistered explicitly
  Unregister,
  /// The client's lifetime ran out without an Update
  Timeout,
}

/// A registration monitor: invoked synchronously after every
/// directory transition, before the CoAP response goes out.
///
/// Identical monitors deduplicate; one added during a notification
/// first fires on the next event.
pub type Monitor<S, C> = fn(&mut S, RegEvent, &ClientInfo<C>);

/// Everything this server knows about one registered client.
pub struct ClientInfo<C: Clock> {
  name: String,
  location: String,
  sms: Option<String>,
  objects_path: Option<String>,
  lifetime: Millis,
  binding: BindingMode,
  lwm2m_version: Option<String>,
  addr: SocketAddr,
  objects: BTreeMap<ObjectId, Vec<InstanceId>>,
  registered_at: Instant<C>,
}

impl<C: Clock> fmt::Debug for ClientInfo<C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ClientInfo")
     .field("name", &self.name)
     .field("location", &self.location)
     .field("addr", &self.addr)
     .field("lifetime_ms", &self.lifetime.0)
     .field("binding", &self.binding)
     .field("lwm2m_version", &self.lwm2m_version)
     .field("objects", &self.objects)
     .finish()
  }
}

impl<C: Clock> ClientInfo<C> {
  /// The endpoint name the client registered under
  pub fn name(&self) -> &str {
    &self.name
  }

  /// The short location path this server assigned at register time
  pub fn location(&self) -> &str {
    &self.location
  }

  /// The client's network address
  pub fn addr(&self) -> SocketAddr {
    self.addr
  }

  /// The MSISDN the client supplied, if any
  pub fn sms(&self) -> Option<&str> {
    self.sms.as_deref()
  }

  /// The URI prefix the client's tree is anchored under, if any
  pub fn objects_path(&self) -> Option<&str> {
    self.objects_path.as_deref()
  }

  /// The registration lifetime
  pub fn lifetime(&self) -> Millis {
    self.lifetime
  }

  /// The declared binding mode (stored; only `U` is operative)
  pub fn binding(&self) -> BindingMode {
    self.binding
  }

  /// The protocol version the client declared with `lwm2m=`, if any
  pub fn lwm2m_version(&self) -> Option<&str> {
    self.lwm2m_version.as_deref()
  }

  /// The object instances the client advertised
  pub fn objects(&self) -> &BTreeMap<ObjectId, Vec<InstanceId>> {
    &self.objects
  }

  /// When the registration was made or last refreshed
  pub fn registered_at(&self) -> Instant<C> {
    self.registered_at
  }

  /// Whether the registration has outlived its lifetime at `now`
  pub fn expired(&self, now: Instant<C>) -> bool {
    since(now, self.registered_at) >= self.lifetime
  }
}

fn objects_from_links(targets: &[(ObjectId, Option<InstanceId>)])
                      -> BTreeMap<ObjectId, Vec<InstanceId>> {
  let mut objects: BTreeMap<ObjectId, Vec<InstanceId>> = BTreeMap::new();

  for (object, instance) in targets {
    let instances = objects.entry(*object).or_default();
    if let Some(i) = instance {
      if !instances.contains(i) {
        instances.push(*i);
      }
    }
  }

  objects
}

impl<S, Tr, C> Server<S, Tr, C>
  where Tr: Transport,
        C: Clock
{
  /// Watch the directory. Identical monitors deduplicate.
  pub fn add_monitor(&mut self, monitor: Monitor<S, C>) {
    if !self.monitors.contains(&monitor) {
      self.monitors.push(monitor);
    }
  }

  /// Stop watching the directory
  pub fn remove_monitor(&mut self, monitor: Monitor<S, C>) {
    self.monitors.retain(|m| *m != monitor);
  }

  /// Route an inbound request: `POST /rd` registers, `POST
  /// /rd/<loc>` updates, `DELETE /rd/<loc>` deregisters. Anything
  /// else is 4.04.
  pub(crate) fn handle_request(&mut self,
                               req: Addrd<Msg>,
                               now: Instant<C>)
                               -> Result<(), TickError<Tr::Error>> {
    let Addrd(msg, addr) = req;

    let segments: Vec<&str> = msg.path
                                 .split('/')
                                 .filter(|s| !s.is_empty())
                                 .collect();

    let resp = match (msg.code, segments.as_slice()) {
      | (Code::POST, ["rd"]) => self.register(&msg, addr, now),
      | (Code::POST, ["rd", location]) => self.update(&msg, location, addr, now),
      | (Code::DELETE, ["rd", location]) => self.deregister(&msg, location),
      | (_, ["rd", ..]) => Msg::response(Code::METHOD_NOT_ALLOWED, msg.token),
      | _ => Msg::response(Code::NOT_FOUND, msg.token),
    };

    nb::block!(self.transport.send(Addrd(resp.clone(), addr))).map_err(TickError::Transport)
  }

  fn register(&mut self, msg: &Msg, addr: SocketAddr, now: Instant<C>) -> Msg {
    let name = match msg.query("ep") {
      | Some(ep) if !ep.is_empty() => ep.to_string(),
      | _ => return Msg::response(Code::BAD_REQUEST, msg.token),
    };

    let lifetime = match msg.query("lt").map(str::parse::<u64>) {
      | Some(Ok(secs)) if secs > 0 => Milliseconds(secs * 1_000),
      | Some(_) => return Msg::response(Code::BAD_REQUEST, msg.token),
      | None => DEFAULT_LIFETIME,
    };

    let binding = msg.query("b")
                     .map(BindingMode::parse)
                     .unwrap_or_default();

    let links = match core::str::from_utf8(&msg.payload).map(parse_links) {
      | Ok(Ok(links)) => links,
      | _ => return Msg::response(Code::BAD_REQUEST, msg.token),
    };

    // a re-register under a known name replaces the old record
    self.clients.retain(|c| c.name != name);

    let location = self.fresh_location(now);
    let info = ClientInfo { name,
                            location: location.clone(),
                            sms: msg.query("sms").map(Into::into),
                            objects_path: links.objects_path,
                            lifetime,
                            binding,
                            lwm2m_version: msg.query("lwm2m").map(Into::into),
                            addr,
                            objects: objects_from_links(&links.targets),
                            registered_at: now };

    log::info!("client {:?} registered at rd/{}", info.name, location);
    self.clients.push(info);
    self.fire_monitors_at(self.clients.len() - 1, RegEvent::Register);

    let mut resp = Msg::response(Code::CREATED, msg.token);
    resp.path = format!("rd/{}", location);
    resp
  }

  fn update(&mut self,
            msg: &Msg,
            location: &str,
            addr: SocketAddr,
            now: Instant<C>)
            -> Msg {
    let ix = match self.clients.iter().position(|c| c.location == location) {
      | Some(ix) => ix,
      | None => return Msg::response(Code::NOT_FOUND, msg.token),
    };

    {
      let info = &mut self.clients[ix];
      info.registered_at = now;
      info.addr = addr;

      if let Some(Ok(secs)) = msg.query("lt").map(str::parse::<u64>) {
        if secs > 0 {
          info.lifetime = Milliseconds(secs * 1_000);
        }
      }
      if let Some(b) = msg.query("b") {
        info.binding = BindingMode::parse(b);
      }
      if let Some(sms) = msg.query("sms") {
        info.sms = Some(sms.into());
      }
      if let Some(version) = msg.query("lwm2m") {
        info.lwm2m_version = Some(version.into());
      }
    }

    if !msg.payload.is_empty() {
      match core::str::from_utf8(&msg.payload).map(parse_links) {
        | Ok(Ok(links)) => {
          let info = &mut self.clients[ix];
          info.objects = objects_from_links(&links.targets);
          if links.objects_path.is_some() {
            info.objects_path = links.objects_path;
          }
        },
        | _ => return Msg::response(Code::BAD_REQUEST, msg.token),
      }
    }

    log::debug!("client {:?} refreshed its registration", self.clients[ix].name);
    self.fire_monitors_at(ix, RegEvent::Update);

    Msg::response(Code::CHANGED, msg.token)
  }

  fn deregister(&mut self, msg: &Msg, location: &str) -> Msg {
    let ix = match self.clients.iter().position(|c| c.location == location) {
      | Some(ix) => ix,
      | None => return Msg::response(Code::NOT_FOUND, msg.token),
    };

    let info = self.clients.remove(ix);
    log::info!("client {:?} deregistered", info.name);

    self.cancel_exchanges_for(&info.name);
    self.fire_monitors_on(RegEvent::Unregister, &info);

    Msg::response(Code::DELETED, msg.token)
  }

  /// Throw out every registration whose lifetime ran out, firing
  /// Timeout monitors and cancelling whatever was in flight toward
  /// the evicted client.
  pub(crate) fn evict_expired(&mut self, now: Instant<C>) {
    loop {
      let expired = self.clients.iter().position(|c| c.expired(now));

      match expired {
        | None => return,
        | Some(ix) => {
          let info = self.clients.remove(ix);
          log::info!("client {:?} expired without an Update", info.name);

          self.cancel_exchanges_for(&info.name);
          self.fire_monitors_on(RegEvent::Timeout, &info);
        },
      }
    }
  }

  /// Fire monitors about the (live, just-transitioned) client at
  /// `ix`.
  ///
  /// Monitors are snapshot first: one added while another runs sees
  /// only later events.
  fn fire_monitors_at(&mut self, ix: usize, event: RegEvent) {
    let monitors = self.monitors.clone();

    for monitor in monitors {
      monitor(&mut self.state, event, &self.clients[ix]);
    }
  }

  /// Fire monitors about a client already removed from the directory
  fn fire_monitors_on(&mut self, event: RegEvent, info: &ClientInfo<C>) {
    let monitors = self.monitors.clone();

    for monitor in monitors {
      monitor(&mut self.state, event, info);
    }
  }

  /// An 8-hex-char location not yet in use
  fn fresh_location(&mut self, now: Instant<C>) -> String {
    loop {
      let candidate = format!("{:08x}", self.rng(now).gen::<u32>());

      if !self.clients.iter().any(|c| c.location == candidate) {
        return candidate;
      }
    }
  }
}
