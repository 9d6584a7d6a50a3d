//! A client and a server wired back-to-back through in-memory
//! transports, exercising the whole conversation: register, read,
//! write, observe, notify, deregister.

use embedded_time::Instant;
use lwm2m_tlv::{Id, Resource, Value};
use std_alloc::string::{String, ToString};
use std_alloc::vec::Vec;

use crate::client::Client;
use crate::config;
use crate::msg::{Code, ContentFormat};
use crate::net::Addrd;
use crate::path::Path;
use crate::server::{ClientInfo, RegEvent, Server};
use crate::test::fixture::{device_registry, DeviceState};
use crate::test::{dummy_addr, dummy_addr_2, ClockMock, TubeTransport};

#[derive(Default)]
struct Seen {
  events: Vec<(RegEvent, String)>,
  statuses: Vec<Code>,
  contents: Vec<(Code, Vec<u8>)>,
  notes: Vec<Vec<u8>>,
}

fn monitor(seen: &mut Seen, event: RegEvent, info: &ClientInfo<ClockMock>) {
  seen.events.push((event, info.name().to_string()));
}

fn on_note(seen: &mut Seen,
           _client: &str,
           _path: &Path,
           _code: Code,
           _format: Option<ContentFormat>,
           payload: &[u8]) {
  seen.notes.push(payload.to_vec());
}

type Dev = Client<DeviceState, TubeTransport, ClockMock>;
type Mgmt = Server<Seen, TubeTransport, ClockMock>;

/// Ferry messages both ways until the wire goes quiet.
///
/// The client lives at [`dummy_addr_2`], the server at
/// [`dummy_addr`].
fn pump(client: &mut Dev, server: &mut Mgmt, now: Instant<ClockMock>) {
  loop {
    let from_client = client.transport_mut().take_sent();
    let from_server = server.transport_mut().take_sent();

    if from_client.is_empty() && from_server.is_empty() {
      return;
    }

    for Addrd(msg, _) in from_client {
      server.transport_mut().feed(Addrd(msg, dummy_addr_2()));
    }
    for Addrd(msg, _) in from_server {
      client.transport_mut().feed(Addrd(msg, dummy_addr()));
    }

    client.tick(now).unwrap();
    server.tick(now).unwrap();
  }
}

fn at(n: u64) -> Instant<ClockMock> {
  ClockMock::instant(n)
}

#[test]
fn a_whole_conversation() {
  simple_logger::SimpleLogger::new().init().ok();

  let mut client = Client::new(config::Client::new("dev"),
                               TubeTransport::new(),
                               device_registry(),
                               DeviceState::boot());
  let mut server =
    Server::new(config::Server::default(), TubeTransport::new(), Seen::default());
  server.add_monitor(monitor);

  // register
  client.start(at(0)).unwrap();
  pump(&mut client, &mut server, at(0));

  assert_eq!(server.state().events,
             Vec::from([(RegEvent::Register, "dev".to_string())]));
  {
    let info = server.client("dev").expect("registered");
    assert_eq!(info.lifetime(), embedded_time::duration::Milliseconds(60_000));
    assert_eq!(info.lwm2m_version(), Some("1.0"));
    assert!(info.objects().contains_key(&crate::path::ObjectId(3)));
  }

  // read the battery
  server.read(at(1_000),
              "dev",
              Path::parse("/3/0/13", None).unwrap(),
              |seen: &mut Seen, code, _, payload| {
                seen.contents.push((code, payload.to_vec()))
              })
        .unwrap();
  pump(&mut client, &mut server, at(1_000));

  assert_eq!(server.state().contents,
             Vec::from([(Code::CONTENT, b"80".to_vec())]));

  // write the lifetime down to the device
  server.write(at(2_000),
               "dev",
               Path::parse("/1/0/1", None).unwrap(),
               &[Resource::single(Id(1), Value::Int(120))],
               |seen: &mut Seen, code| seen.statuses.push(code))
        .unwrap();
  pump(&mut client, &mut server, at(2_000));

  assert_eq!(server.state().statuses, Vec::from([Code::CHANGED]));
  assert_eq!(client.state().lifetime, 120);
  // the client folded the new lifetime into its registration
  assert_eq!(server.client("dev").unwrap().lifetime(),
             embedded_time::duration::Milliseconds(120_000));

  // observe the battery, then drain it a little
  server.observe(at(3_000),
                 "dev",
                 Path::parse("/3/0/13", None).unwrap(),
                 on_note)
        .unwrap();
  pump(&mut client, &mut server, at(3_000));

  // the initial notification answered the observe GET
  assert_eq!(server.state().notes, Vec::from([b"80".to_vec()]));

  client.state_mut().battery = 42;
  client.notify(&[Path::parse("/3/0/13", None).unwrap()]).unwrap();
  pump(&mut client, &mut server, at(4_000));

  assert_eq!(server.state().notes,
             Vec::from([b"80".to_vec(), b"42".to_vec()]));

  // goodbye
  client.stop(at(5_000)).unwrap();
  pump(&mut client, &mut server, at(5_000));

  assert!(server.client("dev").is_none());
  assert_eq!(server.state().events.last(),
             Some(&(RegEvent::Unregister, "dev".to_string())));
}
