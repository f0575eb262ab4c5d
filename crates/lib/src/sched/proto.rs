//! Wire framing of the recursive-call protocol.
//!
//! A request is 4 bytes of little-endian signed job id (−1 for a user
//! invocation outside any script), followed by NUL-terminated target
//! strings, terminated by an empty string: the request ends at two
//! consecutive NUL bytes. The reply is a single byte, 1 for success and
//! 0 for failure.

use std::io;

use remake_platform::Stream;

/// Reply byte for a successful build.
pub const REPLY_OK: u8 = 1;
/// Reply byte for a failed build.
pub const REPLY_FAILED: u8 = 0;

/// Encode a request frame.
pub fn encode_request(job_id: i32, targets: &[String]) -> Vec<u8> {
  let mut buf = Vec::with_capacity(4 + targets.iter().map(|t| t.len() + 1).sum::<usize>() + 1);
  buf.extend_from_slice(&job_id.to_le_bytes());
  for target in targets {
    buf.extend_from_slice(target.as_bytes());
    buf.push(0);
  }
  buf.push(0);
  if targets.is_empty() {
    // Keep the double-NUL terminator even without any target string.
    buf.push(0);
  }
  buf
}

/// Decode a complete request frame.
///
/// Returns `None` when the frame is too short, not double-NUL
/// terminated, or contains an unterminated target string.
pub fn decode_request(buf: &[u8]) -> Option<(i32, Vec<String>)> {
  if buf.len() < 6 || buf[buf.len() - 1] != 0 || buf[buf.len() - 2] != 0 {
    return None;
  }
  let job_id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
  let mut targets = Vec::new();
  let mut rest = &buf[4..buf.len() - 1];
  while !rest.is_empty() {
    let end = rest.iter().position(|&c| c == 0)?;
    if end == 0 {
      break;
    }
    targets.push(String::from_utf8_lossy(&rest[..end]).into_owned());
    rest = &rest[end + 1..];
  }
  Some((job_id, targets))
}

/// Read one request frame from an accepted connection.
///
/// Reads until two consecutive NUL bytes arrive, like the original
/// protocol: the client sends its whole request before waiting for the
/// reply, so the double NUL always terminates the stream's interesting
/// prefix.
pub async fn read_request(stream: &mut Stream) -> io::Result<(i32, Vec<String>)> {
  let mut buf = Vec::with_capacity(256);
  let mut chunk = [0u8; 1024];
  loop {
    if buf.len() >= 6 && buf[buf.len() - 1] == 0 && buf[buf.len() - 2] == 0 {
      break;
    }
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
      return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated build request"));
    }
    buf.extend_from_slice(&chunk[..n]);
  }
  decode_request(&buf).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "ill-formed build request"))
}
