use core::fmt;

/// An object id (the first path segment of `/O/I/R`)
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct ObjectId(pub u16);

/// An object instance id (the second path segment of `/O/I/R`)
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct InstanceId(pub u16);

/// A resource id (the third path segment of `/O/I/R`)
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct ResourceId(pub u16);

/// Errors encounterable parsing a path
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathError {
  /// A segment was not a decimal integer in `[0, 65535]`
  BadSegment,
  /// More than 3 segments
  TooDeep,
}

/// A parsed node address in the object tree.
///
/// The sum type makes "nothing below a missing level is present"
/// structural: there is no way to hold a resource id without the
/// object and instance above it.
///
/// ```
/// use lwm2m::path::{InstanceId, ObjectId, Path, ResourceId};
///
/// let path = Path::parse("/3/0/13", None).unwrap();
/// assert_eq!(path,
///            Path::Resource(ObjectId(3), InstanceId(0), ResourceId(13)));
/// assert_eq!(path.to_string(), "/3/0/13");
///
/// assert_eq!(Path::parse("/3/0/13/1", None), Err(lwm2m::path::PathError::TooDeep));
/// assert_eq!(Path::parse("/99999", None),
///            Err(lwm2m::path::PathError::BadSegment));
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Path {
  /// The whole tree
  Root,
  /// `/O`
  Object(ObjectId),
  /// `/O/I`
  Instance(ObjectId, InstanceId),
  /// `/O/I/R`
  Resource(ObjectId, InstanceId, ResourceId),
}

impl Path {
  /// Parse `/objectId[/instanceId[/resourceId]]`.
  ///
  /// Leading & trailing slashes are ignored; when the endpoint
  /// advertised an objects-path prefix, passing it as `strip_prefix`
  /// removes it before the numeric segments are read.
  pub fn parse(s: &str, strip_prefix: Option<&str>) -> Result<Self, PathError> {
    let mut segments = s.split('/').filter(|seg| !seg.is_empty());

    if let Some(prefix) = strip_prefix {
      for expected in prefix.split('/').filter(|seg| !seg.is_empty()) {
        match segments.next() {
          | Some(seg) if seg == expected => continue,
          | _ => return Err(PathError::BadSegment),
        }
      }
    }

    let mut next_id = || -> Result<Option<u16>, PathError> {
      segments.next()
              .map(|seg| seg.parse::<u16>().map_err(|_| PathError::BadSegment))
              .transpose()
    };

    let path = match (next_id()?, next_id()?, next_id()?) {
      | (None, ..) => Self::Root,
      | (Some(o), None, _) => Self::Object(ObjectId(o)),
      | (Some(o), Some(i), None) => Self::Instance(ObjectId(o), InstanceId(i)),
      | (Some(o), Some(i), Some(r)) => {
        Self::Resource(ObjectId(o), InstanceId(i), ResourceId(r))
      },
    };

    match segments.next() {
      | Some(_) => Err(PathError::TooDeep),
      | None => Ok(path),
    }
  }

  /// The object level of this path, if addressed
  pub fn object(&self) -> Option<ObjectId> {
    match self {
      | Self::Root => None,
      | Self::Object(o) | Self::Instance(o, _) | Self::Resource(o, ..) => Some(*o),
    }
  }

  /// The instance level of this path, if addressed
  pub fn instance(&self) -> Option<InstanceId> {
    match self {
      | Self::Instance(_, i) | Self::Resource(_, i, _) => Some(*i),
      | _ => None,
    }
  }

  /// The resource level of this path, if addressed
  pub fn resource(&self) -> Option<ResourceId> {
    match self {
      | Self::Resource(.., r) => Some(*r),
      | _ => None,
    }
  }

  /// Whether `other` is this path or somewhere below it
  ///
  /// ```
  /// use lwm2m::path::Path;
  ///
  /// let instance = Path::parse("/3/0", None).unwrap();
  /// let resource = Path::parse("/3/0/13", None).unwrap();
  ///
  /// assert!(instance.contains(&resource));
  /// assert!(instance.contains(&instance));
  /// assert!(!resource.contains(&instance));
  /// ```
  pub fn contains(&self, other: &Path) -> bool {
    match self {
      | Self::Root => true,
      | Self::Object(o) => other.object() == Some(*o),
      | Self::Instance(o, i) => {
        other.object() == Some(*o) && other.instance() == Some(*i)
      },
      | Self::Resource(..) => self == other,
    }
  }

  /// Whether a change at `changed` is visible to an observer of this
  /// path: either one contains the other.
  pub fn touched_by(&self, changed: &Path) -> bool {
    self.contains(changed) || changed.contains(self)
  }
}

impl fmt::Display for Path {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      | Self::Root => write!(f, "/"),
      | Self::Object(o) => write!(f, "/{}", o.0),
      | Self::Instance(o, i) => write!(f, "/{}/{}", o.0, i.0),
      | Self::Resource(o, i, r) => write!(f, "/{}/{}/{}", o.0, i.0, r.0),
    }
  }
}
