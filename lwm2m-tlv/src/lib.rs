//! Low-level representation of the LWM2M TLV binary format.
//!
//! TLV is the self-describing serialization LWM2M endpoints use to move
//! object instances and resources over CoAP. Every record is a header
//! followed by a value, and the header describes how wide the id and
//! length fields are:
//!
//! ```text
//! Record kind (object instance, resource instance,
//! |            multiple resources, resource with value)
//! |
//! |  Identifier is 16 bits wide (otherwise 8)
//! |  |
//! |  |  Width of the length field
//! |  |  |  (00 means "value length is stored in the low 3 bits")
//! |  |  |
//! |  |  |  Value length, when the length field width is 00
//! |  |  |  |
//! vv v  vv vvv
//! 11 0  00 001
//! ```
//!
//! Container records ([`Kind::ObjectInstance`] and
//! [`Kind::MultipleResources`]) hold a nested TLV stream as their value;
//! leaf records hold raw bytes whose interpretation is fixed by a
//! [`DataType`] known out of band.
//!
//! ## Allocation
//! Decoding is zero-copy: a [`Record`] borrows its value from the buffer
//! it was parsed out of, and nothing is cloned until a value needs to
//! outlive the originating message (at which point [`Value::from_record`]
//! copies it into owned storage).
//!
//! ## Scope
//! This crate (`lwm2m-tlv`) explicitly does **not** know or care about how
//! TLV payloads are sent and received, and is **just** concerned with the
//! byte layout and the typed values inside it.
//!
//! For a runtime that uses this library, see the `lwm2m` crate.

// x-release-please-start-version
#![doc(html_root_url = "https://docs.rs/lwm2m-tlv/0.1.0")]
// x-release-please-end
#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(not(test), forbid(missing_debug_implementations, unreachable_pub))]
#![cfg_attr(not(test), deny(unsafe_code, missing_copy_implementations))]
#![cfg_attr(any(docsrs, feature = "docs"), feature(doc_cfg))]
#![deny(missing_docs)]

extern crate alloc as std_alloc;

/// TLV records & the streaming codec
pub mod record;

/// Typed reinterpretation of leaf record values
pub mod value;

/// The in-memory resource model
pub mod resource;

#[doc(inline)]
pub use record::*;
#[doc(inline)]
pub use resource::*;
#[doc(inline)]
pub use value::*;
