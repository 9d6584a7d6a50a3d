use core::fmt;

use lwm2m_tlv::{Record, Resource};
use std_alloc::boxed::Box;
use std_alloc::collections::BTreeMap;
use std_alloc::vec::Vec;

use crate::error::Error;
use crate::msg::ContentFormat;
use crate::path::{InstanceId, ObjectId, ResourceId};

/// The set of operations an [`Object`] supports.
///
/// The dispatcher consults this before invoking anything, so an absent
/// capability deterministically answers 4.05 Method Not Allowed
/// instead of reaching a default method body.
///
/// ```
/// use lwm2m::obj::Ops;
///
/// let ops = Ops::READ | Ops::EXECUTE;
/// assert!(ops.contains(Ops::READ));
/// assert!(!ops.contains(Ops::DELETE));
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Ops(u8);

impl Ops {
  /// No operations
  pub const NONE: Ops = Ops(0);
  /// [`Object::create`]
  pub const CREATE: Ops = Ops(1);
  /// [`Object::read`]
  pub const READ: Ops = Ops(1 << 1);
  /// [`Object::write_resource`]
  pub const WRITE_RESOURCE: Ops = Ops(1 << 2);
  /// [`Object::write_records`]
  pub const WRITE_RECORDS: Ops = Ops(1 << 3);
  /// [`Object::execute`]
  pub const EXECUTE: Ops = Ops(1 << 4);
  /// [`Object::delete`]
  pub const DELETE: Ops = Ops(1 << 5);

  /// Set union
  pub const fn union(self, other: Ops) -> Ops {
    Ops(self.0 | other.0)
  }

  /// Is every operation in `other` also in `self`?
  pub const fn contains(&self, other: Ops) -> bool {
    self.0 & other.0 == other.0
  }
}

impl core::ops::BitOr for Ops {
  type Output = Ops;

  fn bitor(self, other: Ops) -> Ops {
    self.union(other)
  }
}

/// One LWM2M object: a schema (how many resources, which operations)
/// plus the behavior behind those operations.
///
/// `S` is the endpoint-wide user state, handed mutably to every
/// operation; state that belongs to a single instance lives wherever
/// the implementor keeps it (commonly a map keyed by [`InstanceId`]
/// inside the implementing type).
///
/// Every operation defaults to `Err(Error::MethodNotAllowed)`, but the
/// dispatcher never calls an operation missing from [`Object::ops`] in
/// the first place.
pub trait Object<S> {
  /// Which operations this object supports
  fn ops(&self) -> Ops;

  /// Resource ids of this object are `0..resource_count()`
  fn resource_count(&self) -> u16;

  /// Produce the current value of one resource.
  ///
  /// `Err(NotFound)` means "this instance doesn't carry that optional
  /// resource" and elides it from multi-resource reads.
  fn read(&mut self,
          _state: &mut S,
          _instance: InstanceId,
          _resource: ResourceId)
          -> Result<Resource, Error> {
    Err(Error::MethodNotAllowed)
  }

  /// Replace one resource's value from a text or opaque payload
  fn write_resource(&mut self,
                    _state: &mut S,
                    _instance: InstanceId,
                    _resource: ResourceId,
                    _format: ContentFormat,
                    _value: &[u8])
                    -> Result<(), Error> {
    Err(Error::MethodNotAllowed)
  }

  /// Write resources from decoded TLV records.
  ///
  /// The records borrow from the inbound message and are leaf records
  /// ([`lwm2m_tlv::Kind::ResourceWithValue`] /
  /// [`lwm2m_tlv::Kind::MultipleResources`]) addressed at this
  /// instance.
  fn write_records(&mut self,
                   _state: &mut S,
                   _instance: InstanceId,
                   _records: &[Record<'_>])
                   -> Result<(), Error> {
    Err(Error::MethodNotAllowed)
  }

  /// Perform a resource's action; `args` is the request payload as
  /// text (possibly empty)
  fn execute(&mut self,
             _state: &mut S,
             _instance: InstanceId,
             _resource: ResourceId,
             _args: &str)
             -> Result<(), Error> {
    Err(Error::MethodNotAllowed)
  }

  /// Bring a new instance into existence from the given records
  fn create(&mut self,
            _state: &mut S,
            _instance: InstanceId,
            _records: &[Record<'_>])
            -> Result<(), Error> {
    Err(Error::MethodNotAllowed)
  }

  /// Release an instance and everything it owns
  fn delete(&mut self, _state: &mut S, _instance: InstanceId) -> Result<(), Error> {
    Err(Error::MethodNotAllowed)
  }
}

/// Errors encounterable registering objects & instances
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegistryError {
  /// An object with this id is already registered
  DuplicateObject(ObjectId),
  /// This instance already exists
  DuplicateInstance(ObjectId, InstanceId),
  /// No object with this id is registered
  UnknownObject(ObjectId),
  /// No such instance
  UnknownInstance(ObjectId, InstanceId),
}

struct Entry<S> {
  object: Box<dyn Object<S>>,
  instances: Vec<InstanceId>,
}

/// The table of objects a client exposes, indexed by object id.
///
/// Objects are registered once, before the client starts; instances
/// come and go at runtime (user-driven [`Registry::add_instance`],
/// server-driven Create/Delete).
pub struct Registry<S> {
  objects: BTreeMap<ObjectId, Entry<S>>,
}

impl<S> fmt::Debug for Registry<S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut map = f.debug_map();
    for (id, entry) in self.objects.iter() {
      map.entry(&id.0, &entry.instances);
    }
    map.finish()
  }
}

impl<S> Default for Registry<S> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S> Registry<S> {
  /// An empty registry
  pub fn new() -> Self {
    Self { objects: BTreeMap::new() }
  }

  /// Add an object (with no instances yet) to the table
  pub fn register(&mut self,
                  id: ObjectId,
                  object: Box<dyn Object<S>>)
                  -> Result<(), RegistryError> {
    match self.objects.contains_key(&id) {
      | true => Err(RegistryError::DuplicateObject(id)),
      | false => {
        self.objects.insert(id,
                            Entry { object,
                                    instances: Vec::new() });
        Ok(())
      },
    }
  }

  /// Record that instance `instance` of object `id` exists.
  ///
  /// The object's operations will be invoked with this instance id
  /// from now on.
  pub fn add_instance(&mut self,
                      id: ObjectId,
                      instance: InstanceId)
                      -> Result<(), RegistryError> {
    let entry = self.objects
                    .get_mut(&id)
                    .ok_or(RegistryError::UnknownObject(id))?;

    match entry.instances.contains(&instance) {
      | true => Err(RegistryError::DuplicateInstance(id, instance)),
      | false => {
        entry.instances.push(instance);
        entry.instances.sort_unstable();
        Ok(())
      },
    }
  }

  /// Forget an instance (after the object's `delete` agreed to it)
  pub(crate) fn remove_instance(&mut self,
                                id: ObjectId,
                                instance: InstanceId)
                                -> Result<(), RegistryError> {
    let entry = self.objects
                    .get_mut(&id)
                    .ok_or(RegistryError::UnknownObject(id))?;

    match entry.instances.iter().position(|i| *i == instance) {
      | None => Err(RegistryError::UnknownInstance(id, instance)),
      | Some(ix) => {
        entry.instances.remove(ix);
        Ok(())
      },
    }
  }

  /// Whether this exact instance exists
  pub fn has_instance(&self, id: ObjectId, instance: InstanceId) -> bool {
    self.objects
        .get(&id)
        .map(|e| e.instances.contains(&instance))
        .unwrap_or(false)
  }

  /// The instances of one object, ascending
  pub fn instances_of(&self, id: ObjectId) -> Option<&[InstanceId]> {
    self.objects.get(&id).map(|e| e.instances.as_slice())
  }

  /// Every `(object, instance)` pair, in object order
  pub fn instances(&self) -> impl Iterator<Item = (ObjectId, InstanceId)> + '_ {
    self.objects
        .iter()
        .flat_map(|(id, e)| e.instances.iter().map(|i| (*id, *i)))
  }

  /// The lowest instance id of `id` not yet in use
  pub(crate) fn vacant_instance(&self, id: ObjectId) -> InstanceId {
    let taken = self.instances_of(id).unwrap_or(&[]);
    InstanceId((0..).find(|n| !taken.contains(&InstanceId(*n)))
                    .unwrap_or(0))
  }

  /// The object behind `id`, for invoking operations on it
  pub(crate) fn object_mut(&mut self, id: ObjectId) -> Option<&mut (dyn Object<S> + '_)> {
    self.objects.get_mut(&id).map(|e| e.object.as_mut())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Nop;
  impl Object<()> for Nop {
    fn ops(&self) -> Ops {
      Ops::NONE
    }

    fn resource_count(&self) -> u16 {
      0
    }
  }

  #[test]
  fn instance_bookkeeping() {
    let mut reg = Registry::<()>::new();
    reg.register(ObjectId(3), Box::new(Nop)).unwrap();
    assert_eq!(reg.register(ObjectId(3), Box::new(Nop)).unwrap_err(),
               RegistryError::DuplicateObject(ObjectId(3)));

    reg.add_instance(ObjectId(3), InstanceId(0)).unwrap();
    reg.add_instance(ObjectId(3), InstanceId(2)).unwrap();
    assert_eq!(reg.add_instance(ObjectId(3), InstanceId(0)).unwrap_err(),
               RegistryError::DuplicateInstance(ObjectId(3), InstanceId(0)));
    assert_eq!(reg.add_instance(ObjectId(4), InstanceId(0)).unwrap_err(),
               RegistryError::UnknownObject(ObjectId(4)));

    assert_eq!(reg.vacant_instance(ObjectId(3)), InstanceId(1));
    assert_eq!(reg.instances().collect::<Vec<_>>(),
               vec![(ObjectId(3), InstanceId(0)), (ObjectId(3), InstanceId(2))]);

    reg.remove_instance(ObjectId(3), InstanceId(0)).unwrap();
    assert!(!reg.has_instance(ObjectId(3), InstanceId(0)));
    assert!(reg.has_instance(ObjectId(3), InstanceId(2)));
  }

  #[test]
  fn default_operations_are_not_allowed() {
    let mut nop = Nop;
    assert_eq!(nop.read(&mut (), InstanceId(0), crate::path::ResourceId(0))
                  .unwrap_err(),
               Error::MethodNotAllowed);
    assert_eq!(nop.delete(&mut (), InstanceId(0)).unwrap_err(),
               Error::MethodNotAllowed);
  }
}
