//! `lwm2m` is a Rust implementation of the LWM2M device-management
//! protocol that aims to be:
//! - Platform-independent
//! - Non-blocking
//! - Approachable
//!
//! ## LWM2M
//! LWM2M (Lightweight Machine-to-Machine) layers device management on
//! top of CoAP: an endpoint exposes a tree of *Objects* containing
//! *Object Instances* containing *Resources*, addressed as `/O/I/R`,
//! and a management server reads, writes, executes, creates, deletes
//! and observes nodes of that tree.
//!
//! This crate provides both halves of that conversation:
//! - [`client::Client`] - the device side: a registry of user-provided
//!   [objects](obj::Object), the registration lifecycle against every
//!   server it knows, inbound request dispatch, and observation
//!   fan-out.
//! - [`server::Server`] - the management side: the directory of
//!   registered clients, registration-event monitors, and the issuer
//!   for management requests.
//!
//! ## What this crate is not
//! The CoAP exchange layer itself (serialization, retransmission,
//! block-wise transfer, DTLS) is somebody else's job: both endpoints
//! talk to it through the [`net::Transport`] trait and deal purely in
//! structured [messages](msg::Msg). There is no bootstrap, no JSON
//! content format, and no access control here.
//!
//! ## Driving it
//! Everything runs on a single-threaded cooperative loop owned by you:
//! feed the endpoint time by calling `tick(now)`, and every callback
//! (object operations, registration monitors, management replies) runs
//! synchronously inside that call. No API blocks; "send" always means
//! "enqueue on the transport and return".

// docs
#![doc(html_root_url = "https://docs.rs/lwm2m/0.1.0")]
#![cfg_attr(any(docsrs, feature = "docs"), feature(doc_cfg))]
// -
// style
#![allow(clippy::unused_unit)]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]
// -
// features
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc as std_alloc;


#[cfg(test)]
mod e2e;

pub(crate) mod logging;

/// Client binding modes
pub mod binding;

/// LWM2M client: object registry, registration lifecycle, dispatch
pub mod client;

/// Endpoint configuration
pub mod config;

/// Error kinds & their CoAP response codes
pub mod error;

/// CoRE Link Format registration payloads
pub mod link;

/// The CoAP-facing message model
pub mod msg;

/// Network abstractions
pub mod net;

/// The `/O/I/R` path router
pub mod path;

/// Objects, object instances & the object registry
pub mod obj;

/// Customizable retrying of fallible operations
pub mod retry;

/// LWM2M server: client directory & management-interface issuer
pub mod server;

/// `std`-only helpers
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod std;

/// Time abstractions
pub mod time;

pub use error::Error;
