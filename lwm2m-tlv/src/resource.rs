use std_alloc::vec::Vec;

use crate::record::{encode_record, EncodeError, Id, Kind};
use crate::value::{DataType, Value};

/// Whether a resource holds one value or a positional collection of
/// them
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum ResourceKind {
  /// Exactly one scalar
  Single,
  /// N scalars, each with an implicit sub-id equal to its position
  Multiple,
}

/// Errors encounterable constructing a [`Resource`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceError {
  /// A multiple resource must hold at least one value
  Empty,
  /// All values of a resource share one data type
  MixedTypes,
}

/// An in-memory resource: an id plus one or more owned scalar values.
///
/// Constructed with [`Resource::single`] / [`Resource::multiple`]; the
/// values (including string/opaque bytes) are owned by the resource, so
/// the buffers they were built from need not outlive it.
///
/// ```
/// use lwm2m_tlv::{decode, Id, Resource, Value};
///
/// let lifetime = Resource::single(Id(1), Value::Int(120));
///
/// let mut tlv = vec![];
/// lifetime.extend_tlv(&mut tlv).unwrap();
///
/// let recs = decode(&tlv).unwrap();
/// assert_eq!(recs[0].id, Id(1));
/// assert_eq!(recs[0].int().unwrap(), 120);
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug)]
pub struct Resource {
  /// The resource id
  pub id: Id,
  /// see [`ResourceKind`]
  pub kind: ResourceKind,
  values: Vec<Value>,
}

impl Resource {
  /// A single-instance resource holding `value`
  pub fn single(id: Id, value: Value) -> Self {
    Self { id,
           kind: ResourceKind::Single,
           values: Vec::from([value]) }
  }

  /// A multiple-instance resource holding `values`, sub-ids assigned
  /// by position.
  ///
  /// Fails on an empty collection and on values of differing data
  /// types.
  pub fn multiple(id: Id, values: Vec<Value>) -> Result<Self, ResourceError> {
    match values.split_first() {
      | None => Err(ResourceError::Empty),
      | Some((first, rest)) if rest.iter().any(|v| v.data_type() != first.data_type()) => {
        Err(ResourceError::MixedTypes)
      },
      | _ => Ok(Self { id,
                       kind: ResourceKind::Multiple,
                       values }),
    }
  }

  /// The shared [`DataType`] of this resource's values
  pub fn data_type(&self) -> DataType {
    self.values
        .first()
        .map(Value::data_type)
        .unwrap_or(DataType::None)
  }

  /// All values, in sub-id order
  pub fn values(&self) -> &[Value] {
    &self.values
  }

  /// The value of a [`ResourceKind::Single`] resource
  pub fn value(&self) -> Option<&Value> {
    match self.kind {
      | ResourceKind::Single => self.values.first(),
      | ResourceKind::Multiple => None,
    }
  }

  /// Serialize this resource as TLV.
  ///
  /// A single resource becomes one [`Kind::ResourceWithValue`] record;
  /// a multiple resource becomes one [`Kind::MultipleResources`]
  /// container of [`Kind::ResourceInstance`] children with sub-ids
  /// `0..N-1`.
  pub fn extend_tlv(&self, bytes: &mut Vec<u8>) -> Result<(), EncodeError> {
    match self.kind {
      | ResourceKind::Single => {
        let mut value = Vec::new();
        if let Some(v) = self.values.first() {
          v.extend_bytes(&mut value);
        }
        encode_record(Kind::ResourceWithValue, self.id, &value, bytes)
      },
      | ResourceKind::Multiple => {
        let mut inner = Vec::new();
        for (sub_id, v) in self.values.iter().enumerate() {
          let mut value = Vec::new();
          v.extend_bytes(&mut value);
          encode_record(Kind::ResourceInstance, Id(sub_id as u16), &value, &mut inner)?;
        }
        encode_record(Kind::MultipleResources, self.id, &inner, bytes)
      },
    }
  }
}
