use no_std_net::SocketAddr;

use super::Client;
use crate::error::TickError;
use crate::msg::{Code, ContentFormat, Msg, Token, Type};
use crate::net::{Addrd, Transport};
use crate::path::Path;
use crate::time::Clock;

/// A standing subscription some server holds on a node of this
/// client's tree.
///
/// Keyed by `(path, token)`: the token is what travels on the wire
/// and lets the server demultiplex notifications.
pub(crate) struct Observation {
  pub path: Path,
  pub token: Token,
  pub addr: SocketAddr,
  /// The Accept negotiated by the read that installed this
  /// observation; every notification answers in the same format
  pub accept: Option<ContentFormat>,
  /// Observe sequence number of the last notification sent
  pub seq: u32,
}

impl<S, Tr, C> Client<S, Tr, C>
  where Tr: Transport,
        C: Clock
{
  /// Tell observers that the values under `paths` changed.
  ///
  /// The dispatcher calls this on every write/create/delete it
  /// applies; call it yourself whenever your own state changes
  /// underneath a resource.
  ///
  /// An observation is notified when its path and a changed path
  /// overlap in either direction (observing `/3/0` sees a change to
  /// `/3/0/13`, and observing `/3/0/13` sees a whole-instance
  /// write to `/3/0`).
  pub fn notify(&mut self, paths: &[Path]) -> Result<(), TickError<Tr::Error>> {
    self.notify_changed(paths)
  }

  pub(crate) fn notify_changed(&mut self,
                               changed: &[Path])
                               -> Result<(), TickError<Tr::Error>> {
    let mut ix = 0;

    while ix < self.observations.len() {
      let hit = {
        let obs = &self.observations[ix];
        changed.iter().any(|p| obs.path.touched_by(p))
      };

      match hit {
        | true if self.send_notification(ix)? => ix += 1,
        | true => (), // the observation was dropped; don't advance
        | false => ix += 1,
      }
    }

    Ok(())
  }

  /// Push one notification; yields whether the observation is still
  /// alive afterwards.
  ///
  /// A read that fails (the observed node is gone) notifies with the
  /// error code and no Observe option, which terminates the
  /// observation on both ends.
  fn send_notification(&mut self, ix: usize) -> Result<bool, TickError<Tr::Error>> {
    let (path, token, addr, accept) = {
      let obs = &self.observations[ix];
      (obs.path, obs.token, obs.addr, obs.accept)
    };

    match self.read_path(&path, accept) {
      | Ok((format, payload)) => {
        self.observations[ix].seq += 1;

        let mut msg = Msg::response(Code::CONTENT, token);
        msg.ty = Type::Non;
        msg.observe = Some(self.observations[ix].seq);
        msg.content_format = format;
        msg.payload = payload;

        log::trace!("notifying observer of {} (seq {})",
                    path,
                    self.observations[ix].seq);
        nb::block!(self.transport.send(Addrd(msg.clone(), addr))).map_err(TickError::Transport)?;
        Ok(true)
      },
      | Err(e) => {
        let mut msg = Msg::response(e.code(), token);
        msg.ty = Type::Non;

        log::debug!("observation of {} ended: {:?}", path, e);
        nb::block!(self.transport.send(Addrd(msg.clone(), addr))).map_err(TickError::Transport)?;

        self.observations.remove(ix);
        Ok(false)
      },
    }
  }

  /// Install (or refresh) the observation `(path, token)`
  pub(crate) fn install_observation(&mut self,
                                    path: Path,
                                    token: Token,
                                    addr: SocketAddr,
                                    accept: Option<ContentFormat>) {
    match self.observations
              .iter_mut()
              .find(|o| o.path == path && o.token == token)
    {
      | Some(obs) => {
        obs.addr = addr;
        obs.accept = accept;
      },
      | None => {
        log::debug!("observation installed on {}", path);
        self.observations.push(Observation { path,
                                             token,
                                             addr,
                                             accept,
                                             seq: 0 });
      },
    }
  }

  /// Remove the observation `(path, token)`, if present
  pub(crate) fn remove_observation(&mut self, path: &Path, token: Token) {
    self.observations
        .retain(|o| !(o.path == *path && o.token == token));
  }

  /// Observations at or below `path` die with it
  pub(crate) fn drop_observations_under(&mut self, path: &Path) {
    self.observations.retain(|o| !path.contains(&o.path));
  }

  pub(crate) fn drop_all_observations(&mut self) {
    self.observations.clear();
  }

  /// How many observers this client currently serves
  pub fn observation_count(&self) -> usize {
    self.observations.len()
  }
}
