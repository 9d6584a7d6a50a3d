use lwm2m_tlv::{decode, encode_record, Id, Kind, Resource, ResourceKind, Value};
use no_std_net::SocketAddr;
use std_alloc::format;
use std_alloc::string::ToString;
use std_alloc::vec::Vec;

use super::reg::SERVER_OBJECT;
use super::Client;
use crate::error::{Error, TickError};
use crate::msg::{Code, ContentFormat, Msg};
use crate::net::{Addrd, Transport};
use crate::obj::Ops;
use crate::path::{InstanceId, ObjectId, Path, ResourceId};
use crate::time::Clock;

impl<S, Tr, C> Client<S, Tr, C>
  where Tr: Transport,
        C: Clock
{
  /// Route one inbound request to the object operation it addresses,
  /// answer it, and fan out notifications for whatever it changed.
  pub(crate) fn dispatch(&mut self, req: Addrd<Msg>) -> Result<(), TickError<Tr::Error>> {
    let Addrd(msg, addr) = req;

    let (resp, changed) = match self.handle(&msg, addr) {
      | Ok(ok) => ok,
      | Err(e) => {
        log::debug!("{} -> {:?}", crate::logging::msg_summary(&msg), e);
        (Msg::response(e.code(), msg.token), Vec::new())
      },
    };

    nb::block!(self.transport.send(Addrd(resp.clone(), addr))).map_err(TickError::Transport)?;

    if !changed.is_empty() {
      self.notify_changed(&changed)?;
    }

    Ok(())
  }

  /// The method+path table. Anything that falls through answers
  /// 4.05.
  fn handle(&mut self, msg: &Msg, addr: SocketAddr) -> Result<(Msg, Vec<Path>), Error> {
    let path = Path::parse(&msg.path, self.cfg.objects_path.as_deref())?;

    match (msg.code, path) {
      | (Code::GET, path) => self.handle_get(msg, path, addr),
      | (Code::PUT, Path::Instance(o, i)) => self.handle_write_instance(msg, o, i),
      | (Code::PUT, Path::Resource(o, i, r)) => self.handle_write_resource(msg, o, i, r),
      | (Code::POST, Path::Object(o)) => self.handle_create(msg, o),
      | (Code::POST, Path::Resource(o, i, r)) => self.handle_execute(msg, o, i, r),
      | (Code::DELETE, Path::Instance(o, i)) => self.handle_delete(msg, o, i),
      | _ => Err(Error::MethodNotAllowed),
    }
  }

  fn handle_get(&mut self,
                msg: &Msg,
                path: Path,
                addr: SocketAddr)
                -> Result<(Msg, Vec<Path>), Error> {
    let (format, payload) = self.read_path(&path, msg.accept)?;

    let mut resp = Msg::response(Code::CONTENT, msg.token);
    resp.content_format = format;
    resp.payload = payload;

    match msg.observe {
      | Some(0) => {
        self.install_observation(path, msg.token, addr, msg.accept);
        resp.observe = Some(0);
      },
      | Some(1) => self.remove_observation(&path, msg.token),
      | _ => (),
    }

    Ok((resp, Vec::new()))
  }

  fn handle_write_instance(&mut self,
                           msg: &Msg,
                           o: ObjectId,
                           i: InstanceId)
                           -> Result<(Msg, Vec<Path>), Error> {
    self.check_ops(o, Ops::WRITE_RECORDS)?;
    if !self.registry.has_instance(o, i) {
      return Err(Error::NotFound);
    }

    match msg.content_format {
      | Some(ContentFormat::Tlv) => (),
      | _ => return Err(Error::UnsupportedContentFormat),
    }

    let records = decode(&msg.payload)?;

    // a write may arrive bare or wrapped in the instance's container
    let records = match records.as_slice() {
      | [rec] if rec.kind == Kind::ObjectInstance && rec.id == Id(i.0) => rec.children()?,
      | _ => records,
    };

    {
      let Client { registry, state, .. } = self;
      registry.object_mut(o)
              .ok_or(Error::NotFound)?
              .write_records(state, i, &records)?;
    }

    if o == SERVER_OBJECT {
      self.refresh_server_account(i);
    }

    Ok((Msg::response(Code::CHANGED, msg.token), Vec::from([Path::Instance(o, i)])))
  }

  fn handle_write_resource(&mut self,
                           msg: &Msg,
                           o: ObjectId,
                           i: InstanceId,
                           r: ResourceId)
                           -> Result<(Msg, Vec<Path>), Error> {
    if !self.registry.has_instance(o, i) {
      return Err(Error::NotFound);
    }

    let format = msg.content_format.unwrap_or(ContentFormat::Text);

    match format {
      | ContentFormat::Tlv => {
        self.check_ops(o, Ops::WRITE_RECORDS)?;
        let records = decode(&msg.payload)?;

        let Client { registry, state, .. } = self;
        registry.object_mut(o)
                .ok_or(Error::NotFound)?
                .write_records(state, i, &records)?;
      },
      | ContentFormat::Text | ContentFormat::Opaque => {
        self.check_ops(o, Ops::WRITE_RESOURCE)?;

        let Client { registry, state, .. } = self;
        registry.object_mut(o)
                .ok_or(Error::NotFound)?
                .write_resource(state, i, r, format, &msg.payload)?;
      },
      | _ => return Err(Error::UnsupportedContentFormat),
    }

    if o == SERVER_OBJECT {
      self.refresh_server_account(i);
    }

    Ok((Msg::response(Code::CHANGED, msg.token),
        Vec::from([Path::Resource(o, i, r)])))
  }

  fn handle_create(&mut self, msg: &Msg, o: ObjectId) -> Result<(Msg, Vec<Path>), Error> {
    self.check_ops(o, Ops::CREATE)?;

    if !msg.payload.is_empty() {
      match msg.content_format {
        | Some(ContentFormat::Tlv) => (),
        | _ => return Err(Error::UnsupportedContentFormat),
      }
    }

    let records = decode(&msg.payload)?;

    // the payload may name the new instance id with an enclosing
    // container; otherwise the lowest free id is taken
    let (instance, records) = match records.as_slice() {
      | [rec] if rec.kind == Kind::ObjectInstance => {
        (InstanceId(rec.id.0), rec.children()?)
      },
      | _ => (self.registry.vacant_instance(o), records),
    };

    if self.registry.has_instance(o, instance) {
      return Err(Error::BadRequest);
    }

    {
      let Client { registry, state, .. } = self;
      registry.object_mut(o)
              .ok_or(Error::NotFound)?
              .create(state, instance, &records)?;
    }

    self.registry
        .add_instance(o, instance)
        .map_err(|_| Error::Internal)?;

    for srv in self.servers.iter_mut() {
      srv.objects_dirty = true;
    }

    let mut resp = Msg::response(Code::CREATED, msg.token);
    resp.path = format!("/{}/{}", o.0, instance.0);

    Ok((resp, Vec::from([Path::Instance(o, instance)])))
  }

  fn handle_execute(&mut self,
                    msg: &Msg,
                    o: ObjectId,
                    i: InstanceId,
                    r: ResourceId)
                    -> Result<(Msg, Vec<Path>), Error> {
    self.check_ops(o, Ops::EXECUTE)?;
    if !self.registry.has_instance(o, i) {
      return Err(Error::NotFound);
    }

    match msg.content_format {
      | None | Some(ContentFormat::Text) => (),
      | _ => return Err(Error::UnsupportedContentFormat),
    }

    let args = core::str::from_utf8(&msg.payload).map_err(|_| Error::BadRequest)?;

    {
      let Client { registry, state, .. } = self;
      registry.object_mut(o)
              .ok_or(Error::NotFound)?
              .execute(state, i, r, args)?;
    }

    Ok((Msg::response(Code::CHANGED, msg.token), Vec::new()))
  }

  fn handle_delete(&mut self,
                   msg: &Msg,
                   o: ObjectId,
                   i: InstanceId)
                   -> Result<(Msg, Vec<Path>), Error> {
    self.check_ops(o, Ops::DELETE)?;
    if !self.registry.has_instance(o, i) {
      return Err(Error::NotFound);
    }

    {
      let Client { registry, state, .. } = self;
      registry.object_mut(o)
              .ok_or(Error::NotFound)?
              .delete(state, i)?;
    }

    self.registry
        .remove_instance(o, i)
        .map_err(|_| Error::Internal)?;

    self.drop_observations_under(&Path::Instance(o, i));

    for srv in self.servers.iter_mut() {
      srv.objects_dirty = true;
    }

    Ok((Msg::response(Code::DELETED, msg.token), Vec::from([Path::Instance(o, i)])))
  }

  /// 4.05 unless the object behind `o` declares the capability
  fn check_ops(&mut self, o: ObjectId, needed: Ops) -> Result<(), Error> {
    let object = self.registry.object_mut(o).ok_or(Error::NotFound)?;

    match object.ops().contains(needed) {
      | true => Ok(()),
      | false => Err(Error::MethodNotAllowed),
    }
  }

  fn read_resource(&mut self,
                   o: ObjectId,
                   i: InstanceId,
                   r: ResourceId)
                   -> Result<Resource, Error> {
    let Client { registry, state, .. } = self;
    registry.object_mut(o).ok_or(Error::NotFound)?.read(state, i, r)
  }

  /// Read one instance as a flat TLV stream of its resources.
  ///
  /// Resources the instance doesn't carry (NotFound) are elided;
  /// a resource whose read fails outright is elided too, without
  /// aborting the rest of the fan-out.
  fn read_instance_tlv(&mut self, o: ObjectId, i: InstanceId) -> Result<Vec<u8>, Error> {
    let count = self.registry
                    .object_mut(o)
                    .ok_or(Error::NotFound)?
                    .resource_count();

    let mut payload = Vec::new();

    for r in 0..count {
      match self.read_resource(o, i, ResourceId(r)) {
        | Ok(resource) => {
          resource.extend_tlv(&mut payload).map_err(|_| Error::Internal)?
        },
        | Err(Error::NotFound) => continue,
        | Err(e) => {
          log::debug!("read of /{}/{}/{} failed: {:?}", o.0, i.0, r, e);
          continue;
        },
      }
    }

    Ok(payload)
  }

  /// Read any node, yielding the response payload and its content
  /// format.
  ///
  /// `accept` is the requester's Accept option: object- and
  /// instance-level reads can only answer in TLV (asking for anything
  /// else is 4.15); a single-resource read answers in the resource's
  /// own shape unless TLV was asked for explicitly.
  pub(crate) fn read_path(&mut self,
                          path: &Path,
                          accept: Option<ContentFormat>)
                          -> Result<(Option<ContentFormat>, Vec<u8>), Error> {
    match accept {
      | None
      | Some(ContentFormat::Tlv)
      | Some(ContentFormat::Text)
      | Some(ContentFormat::Opaque) => (),
      | Some(_) => return Err(Error::UnsupportedContentFormat),
    }

    let tlv_only = matches!(accept, None | Some(ContentFormat::Tlv));

    match *path {
      | Path::Object(_) | Path::Instance(_, _) if !tlv_only => {
        Err(Error::UnsupportedContentFormat)
      },
      | Path::Root => Err(Error::NotFound),
      | Path::Object(o) => {
        self.check_ops(o, Ops::READ)?;
        let instances = self.registry
                            .instances_of(o)
                            .ok_or(Error::NotFound)?
                            .to_vec();

        let mut payload = Vec::new();
        for i in instances {
          let inner = self.read_instance_tlv(o, i)?;
          encode_record(Kind::ObjectInstance, Id(i.0), &inner, &mut payload)
            .map_err(|_| Error::Internal)?;
        }

        Ok((Some(ContentFormat::Tlv), payload))
      },
      | Path::Instance(o, i) => {
        self.check_ops(o, Ops::READ)?;
        if !self.registry.has_instance(o, i) {
          return Err(Error::NotFound);
        }

        Ok((Some(ContentFormat::Tlv), self.read_instance_tlv(o, i)?))
      },
      | Path::Resource(o, i, r) => {
        self.check_ops(o, Ops::READ)?;
        if !self.registry.has_instance(o, i) {
          return Err(Error::NotFound);
        }

        let resource = self.read_resource(o, i, r)?;
        match (resource.kind, accept) {
          | (ResourceKind::Multiple, _) if !tlv_only => {
            Err(Error::UnsupportedContentFormat)
          },
          | (ResourceKind::Multiple, _) | (ResourceKind::Single, Some(ContentFormat::Tlv)) => {
            let mut payload = Vec::new();
            resource.extend_tlv(&mut payload).map_err(|_| Error::Internal)?;
            Ok((Some(ContentFormat::Tlv), payload))
          },
          | (ResourceKind::Single, accept) => single_read_payload(&resource, accept),
        }
      },
    }
  }
}

/// A single-resource read answers in the resource's own shape:
/// numeric & boolean values as decimal text, object links as `O:I`,
/// strings as text, opaques as opaque bytes. An Accept that names a
/// different shape is honored only where the representations coincide
/// (a string served as opaque bytes); anything else is 4.15.
fn single_read_payload(resource: &Resource,
                       accept: Option<ContentFormat>)
                       -> Result<(Option<ContentFormat>, Vec<u8>), Error> {
  let (format, payload) = match resource.value() {
    | Some(Value::Int(n)) => (Some(ContentFormat::Text), n.to_string().into_bytes()),
    | Some(Value::Time(n)) => (Some(ContentFormat::Text), n.to_string().into_bytes()),
    | Some(Value::Float(x)) => (Some(ContentFormat::Text), x.to_string().into_bytes()),
    | Some(Value::Bool(b)) => {
      (Some(ContentFormat::Text), Vec::from(if *b { *b"1" } else { *b"0" }))
    },
    | Some(Value::ObjLink(o, i)) => {
      (Some(ContentFormat::Text), format!("{}:{}", o, i).into_bytes())
    },
    | Some(Value::String(s)) => (Some(ContentFormat::Text), s.clone().into_bytes()),
    | Some(Value::Opaque(bytes)) => (Some(ContentFormat::Opaque), bytes.clone()),
    | None => (None, Vec::new()),
  };

  match (accept, format) {
    | (None, format) => Ok((format, payload)),
    | (Some(want), Some(have)) if want == have => Ok((Some(have), payload)),
    | (Some(ContentFormat::Opaque), Some(ContentFormat::Text))
      if matches!(resource.value(), Some(Value::String(_))) =>
    {
      Ok((Some(ContentFormat::Opaque), payload))
    },
    | _ => Err(Error::UnsupportedContentFormat),
  }
}
