//! Client side of the recursive-call protocol.
//!
//! When `REMAKE_SOCKET` is present in the environment, a `remake`
//! invocation is a script asking the coordinator for sub-builds: it
//! connects, sends one request frame, waits for the one-byte reply, and
//! exits accordingly. Plain blocking sockets are enough here; the
//! client has nothing else to do.

use std::io::{Read, Write};

use thiserror::Error;
use tracing::debug;

use remake_platform::{PlatformError, SocketAddress, connect};

use crate::sched::{REPLY_OK, encode_request};

/// Errors while talking to the coordinator.
#[derive(Debug, Error)]
pub enum RequestError {
  #[error("invalid REMAKE_SOCKET: {0}")]
  BadAddress(#[from] PlatformError),

  #[error("failed to send targets to server: {0}")]
  Io(#[from] std::io::Error),
}

/// Request a build of `targets` from the coordinator at `socket`.
///
/// `job_id` identifies the calling script's job, −1 for an invocation
/// outside any script. Returns the server's verdict. An empty target
/// list succeeds without connecting.
pub fn request(socket: &str, job_id: i32, targets: &[String]) -> Result<bool, RequestError> {
  if targets.is_empty() {
    return Ok(true);
  }
  let addr = SocketAddress::from_env(socket)?;
  debug!(job_id, targets = targets.len(), "sending build request");
  let mut stream = connect(&addr)?;
  stream.write_all(&encode_request(job_id, targets))?;
  let mut reply = [0u8; 1];
  stream.read_exact(&mut reply)?;
  debug!(reply = reply[0], "server replied");
  Ok(reply[0] == REPLY_OK)
}
