use embedded_time::Instant;
use std_alloc::vec::Vec;

use crate::config;
use crate::error::TickError;
use crate::msg::{CodeKind, Token};
use crate::net::Transport;
use crate::obj::{Registry, RegistryError};
use crate::path::{InstanceId, ObjectId};
use crate::time::{millis_since_epoch, Clock};

mod dispatch;
mod observe;
mod reg;

use observe::Observation;
pub use reg::{RegistrationState, StartError};
use reg::KnownServer;

/// The device side of an LWM2M conversation.
///
/// A `Client` owns:
/// - the [`Registry`] of user objects and their instances,
/// - one shared user state `S`, handed mutably to every object
///   operation,
/// - the registration lifecycle against every LWM2M server extracted
///   from the mandatory Security (0) / Server (1) objects,
/// - the table of nodes currently observed by servers.
///
/// Drive it by calling [`Client::tick`] from your event loop with the
/// current instant; inbound requests are dispatched and lifecycle
/// timers advanced synchronously inside that call.
///
/// Type parameters: `S` is your state, `Tr` the CoAP transport, `C`
/// the clock your instants come from.
#[allow(missing_debug_implementations)]
pub struct Client<S, Tr, C>
  where Tr: Transport,
        C: Clock
{
  cfg: config::Client,
  transport: Tr,
  registry: Registry<S>,
  state: S,
  servers: Vec<KnownServer<C>>,
  observations: Vec<Observation>,
  token_count: u16,
}

impl<S, Tr, C> Client<S, Tr, C>
  where Tr: Transport,
        C: Clock
{
  /// Assemble a client from its parts.
  ///
  /// The registry must already hold every object (and the boot-time
  /// instances of each); in particular the Security (0) and Server
  /// (1) objects, which [`Client::start`] reads to learn which
  /// servers to register with.
  pub fn new(cfg: config::Client, transport: Tr, registry: Registry<S>, state: S) -> Self {
    Self { cfg,
           transport,
           registry,
           state,
           servers: Vec::new(),
           observations: Vec::new(),
           token_count: 0 }
  }

  /// Borrow the user state
  pub fn state(&self) -> &S {
    &self.state
  }

  /// Mutably borrow the user state
  pub fn state_mut(&mut self) -> &mut S {
    &mut self.state
  }

  /// Borrow the object registry
  pub fn registry(&self) -> &Registry<S> {
    &self.registry
  }

  /// Bring a new instance of a registered object into existence.
  ///
  /// Registered servers learn of it with the next Update.
  pub fn add_instance(&mut self,
                      object: ObjectId,
                      instance: InstanceId)
                      -> Result<(), RegistryError> {
    self.registry.add_instance(object, instance)?;

    for srv in self.servers.iter_mut() {
      srv.objects_dirty = true;
    }

    Ok(())
  }

  /// Let time pass: drain the transport (dispatching requests &
  /// routing registration replies) and advance every server's
  /// registration lifecycle.
  pub fn tick(&mut self, now: Instant<C>) -> Result<(), TickError<Tr::Error>> {
    while let Some(incoming) = self.transport.poll().map_err(TickError::Transport)? {
      match incoming.data().code.kind() {
        | CodeKind::Request => self.dispatch(incoming)?,
        | CodeKind::Response => self.handle_registration_reply(incoming, now)?,
        | CodeKind::Empty => (),
      }
    }

    self.step_registration(now)
  }

  /// A token unique to this endpoint's in-flight requests: the
  /// configured seed, a rolling counter, and the low bytes of the
  /// current time.
  fn next_token(&mut self, now: Instant<C>) -> Token {
    self.token_count = self.token_count.wrapping_add(1);

    let bytes = {
      let ([a, b], [c, d], [.., e, f, g, h]) = (self.cfg.token_seed.to_be_bytes(),
                                                self.token_count.to_be_bytes(),
                                                millis_since_epoch(now).0.to_be_bytes());
      [a, b, c, d, e, f, g, h]
    };

    Token::from_bytes(bytes)
  }

  #[cfg(test)]
  pub(crate) fn transport_mut(&mut self) -> &mut Tr {
    &mut self.transport
  }
}

#[cfg(test)]
mod tests {
  use embedded_time::Instant;
  use lwm2m_tlv::{decode, Id, Kind, Resource, Value};
  use std_alloc::boxed::Box;
  use std_alloc::string::{String, ToString};
  use std_alloc::vec::Vec;

  use super::*;
  use crate::config;
  use crate::msg::{Code, ContentFormat, Msg, Token};
  use crate::net::Addrd;
  use crate::test::fixture::{device_registry, DeviceObject, DeviceState};
  use crate::test::{dummy_addr, dummy_addr_2, ClockMock, TubeTransport};

  fn at(n: u64) -> Instant<ClockMock> {
    ClockMock::instant(n)
  }

  fn token(n: u8) -> Token {
    Token::from_bytes([n; 8])
  }

  fn fixture() -> Client<DeviceState, TubeTransport, ClockMock> {
    Client::new(config::Client::new("dev"),
                TubeTransport::new(),
                device_registry(),
                DeviceState::boot())
  }

  fn registered_fixture() -> Client<DeviceState, TubeTransport, ClockMock> {
    let mut client = fixture();
    client.start(at(0)).unwrap();

    let sent = client.transport_mut().take_sent();
    let mut resp = Msg::response(Code::CREATED, sent[0].data().token);
    resp.path = "rd/4a3b".into();
    client.transport_mut().feed(Addrd(resp, dummy_addr()));
    client.tick(at(100)).unwrap();

    client
  }

  #[test]
  fn register_flow() {
    let mut client = fixture();
    client.start(at(0)).unwrap();

    let sent = client.transport_mut().take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].addr(), dummy_addr());

    let req = sent[0].data();
    assert_eq!(req.code, Code::POST);
    assert_eq!(req.path, "rd");
    assert!(req.queries.contains(&"ep=dev".to_string()));
    assert!(req.queries.contains(&"lt=60".to_string()));
    assert!(req.queries.contains(&"b=U".to_string()));

    let links = core::str::from_utf8(&req.payload).unwrap();
    assert!(links.contains("</1/0>"));
    assert!(links.contains("</3/0>"));
    // the Security object is never advertised
    assert!(!links.contains("</0/0>"));

    assert_eq!(client.registration_state(1),
               Some(RegistrationState::Registering));

    let mut resp = Msg::response(Code::CREATED, req.token);
    resp.path = "rd/4a3b".into();
    client.transport_mut().feed(Addrd(resp, dummy_addr()));
    client.tick(at(100)).unwrap();

    assert_eq!(client.registration_state(1),
               Some(RegistrationState::Registered));
  }

  #[test]
  fn register_retries_with_backoff_and_gives_up() {
    let mut client = fixture();
    client.start(at(0)).unwrap();
    client.transport_mut().take_sent();

    // default strategy starts between 2s and 4s
    client.tick(at(1_000)).unwrap();
    assert!(client.transport_mut().take_sent().is_empty());

    client.tick(at(4_000)).unwrap();
    assert_eq!(client.transport_mut().take_sent().len(), 1);
    assert_eq!(client.registration_state(1),
               Some(RegistrationState::Registering));

    // the budget is the 60s lifetime
    client.tick(at(61_000)).unwrap();
    assert_eq!(client.registration_state(1),
               Some(RegistrationState::Unregistered));
  }

  #[test]
  fn update_fires_before_lifetime_expires() {
    let mut client = registered_fixture();

    // lifetime 60s, margin 6s, registered at t=100ms
    client.tick(at(54_000)).unwrap();
    assert!(client.transport_mut().take_sent().is_empty());

    client.tick(at(54_100)).unwrap();
    let sent = client.transport_mut().take_sent();
    assert_eq!(sent.len(), 1);

    let update = sent[0].data();
    assert_eq!(update.code, Code::POST);
    assert_eq!(update.path, "rd/4a3b");
    // nothing changed: no lt, no payload
    assert!(update.queries.is_empty());
    assert!(update.payload.is_empty());
    assert_eq!(client.registration_state(1),
               Some(RegistrationState::Updating));

    client.transport_mut()
          .feed(Addrd(Msg::response(Code::CHANGED, update.token), dummy_addr()));
    client.tick(at(54_200)).unwrap();
    assert_eq!(client.registration_state(1),
               Some(RegistrationState::Registered));
  }

  #[test]
  fn update_not_found_falls_back_to_register() {
    let mut client = registered_fixture();
    client.send_update(at(1_000)).unwrap();

    let update = client.transport_mut().take_sent().remove(0);
    client.transport_mut()
          .feed(Addrd(Msg::response(Code::NOT_FOUND, update.data().token),
                      dummy_addr()));
    client.tick(at(1_200)).unwrap();

    let sent = client.transport_mut().take_sent();
    assert_eq!(sent[0].data().path, "rd");
    assert!(!sent[0].data().payload.is_empty());
    assert_eq!(client.registration_state(1),
               Some(RegistrationState::Registering));
  }

  #[test]
  fn reentrant_updates_coalesce_to_one() {
    let mut client = registered_fixture();

    client.send_update(at(1_000)).unwrap();
    let first = client.transport_mut().take_sent();
    assert_eq!(first.len(), 1);

    // asked twice more while one is in flight
    client.send_update(at(1_100)).unwrap();
    client.send_update(at(1_200)).unwrap();
    assert!(client.transport_mut().take_sent().is_empty());

    client.transport_mut()
          .feed(Addrd(Msg::response(Code::CHANGED, first[0].data().token),
                      dummy_addr()));
    client.tick(at(1_300)).unwrap();

    // exactly one follow-up
    let second = client.transport_mut().take_sent();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].data().code, Code::POST);

    client.transport_mut()
          .feed(Addrd(Msg::response(Code::CHANGED, second[0].data().token),
                      dummy_addr()));
    client.tick(at(1_400)).unwrap();
    assert!(client.transport_mut().take_sent().is_empty());
    assert_eq!(client.registration_state(1),
               Some(RegistrationState::Registered));
  }

  #[test]
  fn new_instances_ride_the_next_update() {
    let mut client = registered_fixture();

    client.add_instance(ObjectId(3), InstanceId(1)).unwrap();
    client.tick(at(1_000)).unwrap();

    let sent = client.transport_mut().take_sent();
    assert_eq!(sent.len(), 1);
    let links = core::str::from_utf8(&sent[0].data().payload).unwrap();
    assert!(links.contains("</3/0>"));
    assert!(links.contains("</3/1>"));
  }

  #[test]
  fn stop_deregisters() {
    let mut client = registered_fixture();
    client.stop(at(1_000)).unwrap();

    let sent = client.transport_mut().take_sent();
    assert_eq!(sent[0].data().code, Code::DELETE);
    assert_eq!(sent[0].data().path, "rd/4a3b");
    assert_eq!(client.registration_state(1),
               Some(RegistrationState::Deregistering));

    client.transport_mut()
          .feed(Addrd(Msg::response(Code::DELETED, sent[0].data().token),
                      dummy_addr()));
    client.tick(at(1_100)).unwrap();
    assert_eq!(client.registration_state(1),
               Some(RegistrationState::Unregistered));
  }

  #[test]
  fn read_instance_fans_out_as_tlv() {
    let mut client = fixture();

    client.transport_mut()
          .feed(Addrd(Msg::request(Code::GET, "3/0", token(1)), dummy_addr_2()));
    client.tick(at(0)).unwrap();

    let sent = client.transport_mut().take_sent();
    let resp = sent[0].data();
    assert_eq!(resp.code, Code::CONTENT);
    assert_eq!(resp.content_format, Some(ContentFormat::Tlv));

    let records = decode(&resp.payload).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, Id(13));
    assert_eq!(records[0].int().unwrap(), 80);
  }

  #[test]
  fn read_object_wraps_instances() {
    let mut client = fixture();

    client.transport_mut()
          .feed(Addrd(Msg::request(Code::GET, "3", token(1)), dummy_addr_2()));
    client.tick(at(0)).unwrap();

    let sent = client.transport_mut().take_sent();
    let records = decode(&sent[0].data().payload).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, Kind::ObjectInstance);
    assert_eq!(records[0].id, Id(0));
    assert_eq!(records[0].children().unwrap()[0].id, Id(13));
  }

  #[test]
  fn single_resource_reads_answer_in_kind() {
    let mut client = fixture();

    client.transport_mut()
          .feed(Addrd(Msg::request(Code::GET, "3/0/13", token(1)), dummy_addr_2()));
    client.tick(at(0)).unwrap();

    let sent = client.transport_mut().take_sent();
    assert_eq!(sent[0].data().content_format, Some(ContentFormat::Text));
    assert_eq!(sent[0].data().payload, b"80".to_vec());
  }

  #[test]
  fn unknown_nodes_answer_404() {
    let mut client = fixture();

    for path in ["9", "3/7", "3/0/99"] {
      client.transport_mut()
            .feed(Addrd(Msg::request(Code::GET, path, token(1)), dummy_addr_2()));
    }
    client.tick(at(0)).unwrap();

    for resp in client.transport_mut().take_sent() {
      assert_eq!(resp.data().code, Code::NOT_FOUND);
    }
  }

  #[test]
  fn malformed_paths_answer_400() {
    let mut client = fixture();

    client.transport_mut()
          .feed(Addrd(Msg::request(Code::GET, "not/a/path", token(1)),
                      dummy_addr_2()));
    client.tick(at(0)).unwrap();

    assert_eq!(client.transport_mut().take_sent()[0].data().code,
               Code::BAD_REQUEST);
  }

  #[test]
  fn json_writes_answer_415() {
    let mut client = fixture();

    let mut req = Msg::request(Code::PUT, "3/0/13", token(1));
    req.content_format = Some(ContentFormat::Json);
    req.payload = b"{}".to_vec();
    client.transport_mut().feed(Addrd(req, dummy_addr_2()));
    client.tick(at(0)).unwrap();

    assert_eq!(client.transport_mut().take_sent()[0].data().code,
               Code::UNSUPPORTED_CONTENT_FORMAT);
  }

  #[test]
  fn unsupported_operations_answer_405() {
    let mut client = fixture();

    // the Security object is read-only
    let mut req = Msg::request(Code::PUT, "0/0/0", token(1));
    req.content_format = Some(ContentFormat::Text);
    client.transport_mut().feed(Addrd(req, dummy_addr_2()));
    client.tick(at(0)).unwrap();

    assert_eq!(client.transport_mut().take_sent()[0].data().code,
               Code::METHOD_NOT_ALLOWED);
  }

  #[test]
  fn execute_passes_text_args() {
    let mut client = fixture();

    let mut req = Msg::request(Code::POST, "3/0/4", token(1));
    req.payload = b"soft".to_vec();
    client.transport_mut().feed(Addrd(req, dummy_addr_2()));
    client.tick(at(0)).unwrap();

    assert_eq!(client.transport_mut().take_sent()[0].data().code, Code::CHANGED);
    assert_eq!(client.state().executed, Vec::from([String::from("soft")]));
  }

  #[test]
  fn observe_notify_unobserve() {
    let mut client = fixture();

    // GET /3/0/13 with Observe: 0 installs
    let mut req = Msg::request(Code::GET, "3/0/13", token(7));
    req.observe = Some(0);
    client.transport_mut().feed(Addrd(req, dummy_addr_2()));
    client.tick(at(0)).unwrap();

    let sent = client.transport_mut().take_sent();
    assert_eq!(sent[0].data().observe, Some(0));
    assert_eq!(sent[0].data().payload, b"80".to_vec());
    assert_eq!(client.observation_count(), 1);

    let write = |value: &[u8], tok| {
      let mut req = Msg::request(Code::PUT, "3/0/13", tok);
      req.content_format = Some(ContentFormat::Text);
      req.payload = value.to_vec();
      req
    };

    // first write: 2.04 + notification seq 1
    client.transport_mut()
          .feed(Addrd(write(b"75", token(2)), dummy_addr_2()));
    client.tick(at(100)).unwrap();

    let sent = client.transport_mut().take_sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].data().code, Code::CHANGED);
    assert_eq!(sent[1].data().observe, Some(1));
    assert_eq!(sent[1].data().payload, b"75".to_vec());

    // second write: notification seq 2
    client.transport_mut()
          .feed(Addrd(write(b"70", token(3)), dummy_addr_2()));
    client.tick(at(200)).unwrap();

    let sent = client.transport_mut().take_sent();
    assert_eq!(sent[1].data().observe, Some(2));

    // Observe: 1 removes; a third write notifies nobody
    let mut req = Msg::request(Code::GET, "3/0/13", token(7));
    req.observe = Some(1);
    client.transport_mut().feed(Addrd(req, dummy_addr_2()));
    client.tick(at(300)).unwrap();
    client.transport_mut().take_sent();
    assert_eq!(client.observation_count(), 0);

    client.transport_mut()
          .feed(Addrd(write(b"65", token(4)), dummy_addr_2()));
    client.tick(at(400)).unwrap();

    let sent = client.transport_mut().take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data().code, Code::CHANGED);
  }

  #[test]
  fn json_accept_answers_415() {
    let mut client = fixture();

    let mut req = Msg::request(Code::GET, "3/0/13", token(1));
    req.accept = Some(ContentFormat::Json);
    client.transport_mut().feed(Addrd(req, dummy_addr_2()));
    client.tick(at(0)).unwrap();

    assert_eq!(client.transport_mut().take_sent()[0].data().code,
               Code::UNSUPPORTED_CONTENT_FORMAT);
  }

  #[test]
  fn notifications_keep_the_negotiated_format() {
    let mut client = fixture();

    // observe /3/0/13 asking for TLV instead of its native text
    let mut req = Msg::request(Code::GET, "3/0/13", token(7));
    req.observe = Some(0);
    req.accept = Some(ContentFormat::Tlv);
    client.transport_mut().feed(Addrd(req, dummy_addr_2()));
    client.tick(at(0)).unwrap();

    let sent = client.transport_mut().take_sent();
    assert_eq!(sent[0].data().content_format, Some(ContentFormat::Tlv));
    let records = decode(&sent[0].data().payload).unwrap();
    assert_eq!((records[0].id, records[0].int().unwrap()), (Id(13), 80));

    // the notification answers in TLV too
    let mut write = Msg::request(Code::PUT, "3/0/13", token(2));
    write.content_format = Some(ContentFormat::Text);
    write.payload = b"75".to_vec();
    client.transport_mut().feed(Addrd(write, dummy_addr_2()));
    client.tick(at(100)).unwrap();

    let sent = client.transport_mut().take_sent();
    let note = sent[1].data();
    assert_eq!(note.observe, Some(1));
    assert_eq!(note.content_format, Some(ContentFormat::Tlv));
    assert_eq!(decode(&note.payload).unwrap()[0].int().unwrap(), 75);
  }

  #[test]
  fn server_write_refreshes_the_lifetime() {
    let mut client = registered_fixture();

    // PUT /1/0 with TLV { resource 1 = 120 } per the management
    // interface
    let mut payload = Vec::new();
    Resource::single(Id(1), Value::Int(120)).extend_tlv(&mut payload)
                                            .unwrap();

    let mut req = Msg::request(Code::PUT, "1/0", token(5));
    req.content_format = Some(ContentFormat::Tlv);
    req.payload = payload;
    client.transport_mut().feed(Addrd(req, dummy_addr()));
    client.tick(at(1_000)).unwrap();

    // the 2.04, then the Update carrying the new lt=
    let sent = client.transport_mut().take_sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].data().code, Code::CHANGED);
    assert_eq!(client.state().lifetime, 120);
    assert_eq!(sent[1].data().code, Code::POST);
    assert!(sent[1].data().queries.contains(&"lt=120".to_string()));
  }

  #[test]
  fn create_and_delete_touch_the_object_set() {
    let mut client = registered_fixture();

    let mut req = Msg::request(Code::POST, "3", token(6));
    client.transport_mut().feed(Addrd(req.clone(), dummy_addr()));
    client.tick(at(1_000)).unwrap();

    let sent = client.transport_mut().take_sent();
    // 2.01 with the new location, then the Update re-listing objects
    assert_eq!(sent[0].data().code, Code::CREATED);
    assert_eq!(sent[0].data().path, "/3/1");
    assert!(client.registry().has_instance(ObjectId(3), InstanceId(1)));
    assert_eq!(sent[1].data().code, Code::POST);
    assert!(core::str::from_utf8(&sent[1].data().payload).unwrap()
                                                         .contains("</3/1>"));

    // duplicate create of the same instance is rejected
    let mut wrapped = Vec::new();
    lwm2m_tlv::encode_record(Kind::ObjectInstance, Id(1), &[], &mut wrapped).unwrap();
    req.token = token(8);
    req.content_format = Some(ContentFormat::Tlv);
    req.payload = wrapped;
    client.transport_mut().feed(Addrd(req, dummy_addr()));
    client.tick(at(1_100)).unwrap();
    let sent = client.transport_mut().take_sent();
    assert_eq!(sent[0].data().code, Code::BAD_REQUEST);

    let del = Msg::request(Code::DELETE, "3/1", token(9));
    client.transport_mut().feed(Addrd(del, dummy_addr()));
    client.tick(at(1_200)).unwrap();

    let sent = client.transport_mut().take_sent();
    assert_eq!(sent[0].data().code, Code::DELETED);
    assert!(!client.registry().has_instance(ObjectId(3), InstanceId(1)));
  }

  #[test]
  fn start_needs_server_objects() {
    let mut registry = Registry::new();
    registry.register(ObjectId(3), Box::new(DeviceObject)).unwrap();
    registry.add_instance(ObjectId(3), InstanceId(0)).unwrap();

    let mut client = Client::new(config::Client::new("dev"),
                                 TubeTransport::new(),
                                 registry,
                                 DeviceState::boot());

    assert_eq!(client.start(at(0)).unwrap_err(), StartError::NoServers);
  }
}

