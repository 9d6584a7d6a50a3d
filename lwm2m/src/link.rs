//! The slice of CoRE Link Format (RFC 6690) that registration
//! payloads use.
//!
//! A client lists every object instance it exposes as `</O/I>` items;
//! when it anchors its tree under a prefix, the first item names that
//! prefix with the `rt="oma.lwm2m"` attribute:
//!
//! ```text
//! </lwm2m>;rt="oma.lwm2m",</lwm2m/1/0>,</lwm2m/3/0>
//! ```

use core::fmt::Write;

use std_alloc::string::String;
use std_alloc::vec::Vec;

use crate::path::{InstanceId, ObjectId, Path};

/// The content of a registration payload
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Links {
  /// The prefix the tree is anchored under, when the client
  /// advertised one
  pub objects_path: Option<String>,
  /// Listed objects; `None` instance for an object listed without
  /// instances
  pub targets: Vec<(ObjectId, Option<InstanceId>)>,
}

/// Errors encounterable parsing a link-format payload
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkError {
  /// An item was not `<path>` optionally followed by attributes
  Malformed,
}

/// Render `</O/I>` items for every target, prefixed by the
/// `rt="oma.lwm2m"` root item when an objects path is advertised.
pub fn write_links(out: &mut String,
                   objects_path: Option<&str>,
                   targets: impl Iterator<Item = (ObjectId, Option<InstanceId>)>) {
  let prefix = objects_path.map(|p| p.trim_matches('/')).unwrap_or("");

  if !prefix.is_empty() {
    write!(out, "</{}>;rt=\"oma.lwm2m\"", prefix).ok();
  }

  for (object, instance) in targets {
    if !out.is_empty() {
      out.push(',');
    }

    match (prefix, instance) {
      | ("", Some(i)) => write!(out, "</{}/{}>", object.0, i.0),
      | ("", None) => write!(out, "</{}>", object.0),
      | (p, Some(i)) => write!(out, "</{}/{}/{}>", p, object.0, i.0),
      | (p, None) => write!(out, "</{}/{}>", p, object.0),
    }.ok();
  }
}

/// Parse a registration payload.
///
/// Attributes other than the `rt="oma.lwm2m"` root marker are
/// ignored.
pub fn parse_links(s: &str) -> Result<Links, LinkError> {
  let mut links = Links::default();

  for item in s.split(',') {
    let item = item.trim();
    if item.is_empty() {
      continue;
    }

    let mut parts = item.split(';');
    let target = parts.next()
                      .and_then(|t| t.trim().strip_prefix('<'))
                      .and_then(|t| t.strip_suffix('>'))
                      .ok_or(LinkError::Malformed)?;

    if parts.any(|attr| attr.trim() == "rt=\"oma.lwm2m\"") {
      links.objects_path = Some(target.trim_matches('/').into());
      continue;
    }

    let path =
      Path::parse(target, links.objects_path.as_deref()).map_err(|_| LinkError::Malformed)?;

    match path {
      | Path::Object(o) => links.targets.push((o, None)),
      | Path::Instance(o, i) => links.targets.push((o, Some(i))),
      | _ => return Err(LinkError::Malformed),
    }
  }

  Ok(links)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn renders_instances() {
    let mut out = String::new();
    write_links(&mut out,
                None,
                vec![(ObjectId(1), Some(InstanceId(0))),
                     (ObjectId(3), Some(InstanceId(0))),
                     (ObjectId(31024), None)].into_iter());
    assert_eq!(out, "</1/0>,</3/0>,</31024>");
  }

  #[test]
  fn renders_objects_path_root() {
    let mut out = String::new();
    write_links(&mut out,
                Some("/lwm2m"),
                vec![(ObjectId(3), Some(InstanceId(0)))].into_iter());
    assert_eq!(out, "</lwm2m>;rt=\"oma.lwm2m\",</lwm2m/3/0>");
  }

  #[test]
  fn parses_what_it_renders() {
    let mut out = String::new();
    let targets = vec![(ObjectId(1), Some(InstanceId(0))),
                       (ObjectId(3), Some(InstanceId(0)))];
    write_links(&mut out, Some("lw"), targets.clone().into_iter());

    let links = parse_links(&out).unwrap();
    assert_eq!(links.objects_path.as_deref(), Some("lw"));
    assert_eq!(links.targets, targets);
  }

  #[test]
  fn parses_plain_payload() {
    let links = parse_links("</1/0>, </3/0>,</5>").unwrap();
    assert_eq!(links.objects_path, None);
    assert_eq!(links.targets,
               vec![(ObjectId(1), Some(InstanceId(0))),
                    (ObjectId(3), Some(InstanceId(0))),
                    (ObjectId(5), None)]);
  }

  #[test]
  fn ignores_foreign_attributes() {
    let links = parse_links("</1/0>;ct=11542").unwrap();
    assert_eq!(links.targets, vec![(ObjectId(1), Some(InstanceId(0)))]);
  }

  #[test]
  fn rejects_garbage() {
    assert_eq!(parse_links("1/0").unwrap_err(), LinkError::Malformed);
    assert_eq!(parse_links("</a/b>").unwrap_err(), LinkError::Malformed);
    assert_eq!(parse_links("</1/0/9/9>").unwrap_err(), LinkError::Malformed);
  }
}
