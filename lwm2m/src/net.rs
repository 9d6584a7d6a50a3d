use no_std_net::SocketAddr;

use crate::msg::Msg;

/// Data that came from (or is bound for) a network peer
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the address and get the data in this Addressed
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Copy the socket address for the data
  pub fn addr(&self) -> SocketAddr {
    self.1
  }
}

/// The boundary between the LWM2M core and the CoAP exchange layer.
///
/// Implementations own everything RFC 7252 (and the Observe extension's
/// wire mechanics): serialization to datagrams, message ids, acks,
/// retransmission of confirmable messages and block-wise transfers.
/// The core hands whole [`Msg`]s down and expects whole `Msg`s up.
///
/// Both methods are non-blocking:
/// - [`Transport::send`] enqueues and returns; `WouldBlock` means the
///   outbound queue is momentarily full and the send should be retried
///   on a later tick.
/// - [`Transport::poll`] yields at most one received message.
pub trait Transport {
  /// The error yielded by transport operations
  type Error: core::fmt::Debug;

  /// The local address this transport is bound to
  fn local_addr(&self) -> SocketAddr;

  /// Enqueue a message to a remote peer
  fn send(&mut self, msg: Addrd<Msg>) -> nb::Result<(), Self::Error>;

  /// Pull one received message, if any arrived
  fn poll(&mut self) -> Result<Option<Addrd<Msg>>, Self::Error>;
}
