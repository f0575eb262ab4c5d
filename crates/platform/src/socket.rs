//! Local socket abstraction for recursive build requests.
//!
//! The coordinator listens on a local socket whose address is exported
//! to every job script through the `REMAKE_SOCKET` environment variable.
//! On Unix-likes the address is a filesystem path in the temporary
//! directory; on Windows it is a loopback TCP port rendered as a decimal
//! string. The server side is async (it lives inside the coordinator's
//! event loop); the client side is a plain blocking stream, since a
//! client does nothing but send one request and wait for one byte.

use std::io::{self, Read, Write};
use std::path::PathBuf;

use crate::error::PlatformError;

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

#[cfg(windows)]
use tokio::net::{TcpListener, TcpStream};

/// Address of the coordinator's request socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
  /// A filesystem path to a UNIX socket.
  #[cfg(unix)]
  Path(PathBuf),

  /// A loopback TCP port.
  #[cfg(windows)]
  Port(u16),
}

impl SocketAddress {
  /// Render the address as the value of `REMAKE_SOCKET`.
  pub fn env_value(&self) -> String {
    match self {
      #[cfg(unix)]
      SocketAddress::Path(p) => p.to_string_lossy().into_owned(),
      #[cfg(windows)]
      SocketAddress::Port(p) => p.to_string(),
    }
  }

  /// Parse the value of `REMAKE_SOCKET` back into an address.
  pub fn from_env(value: &str) -> Result<Self, PlatformError> {
    #[cfg(unix)]
    {
      if value.is_empty() {
        return Err(PlatformError::BadAddress {
          value: value.to_string(),
          reason: "empty socket path",
        });
      }
      Ok(SocketAddress::Path(PathBuf::from(value)))
    }

    #[cfg(windows)]
    {
      value
        .parse::<u16>()
        .map(SocketAddress::Port)
        .map_err(|_| PlatformError::BadAddress {
          value: value.to_string(),
          reason: "expected a port number",
        })
    }
  }

  /// Remove the socket from the filesystem, if it lives there.
  ///
  /// Called by the coordinator on shutdown. Best effort.
  pub fn remove(&self) {
    match self {
      #[cfg(unix)]
      SocketAddress::Path(p) => {
        let _ = std::fs::remove_file(p);
      }
      #[cfg(windows)]
      SocketAddress::Port(_) => {}
    }
  }
}

/// The coordinator's listening socket.
pub struct Listener {
  #[cfg(unix)]
  inner: UnixListener,
  #[cfg(windows)]
  inner: TcpListener,
}

impl Listener {
  /// Create the request socket and return it with its address.
  ///
  /// On Unix the socket is named after the coordinator's pid inside the
  /// system temporary directory; a stale file of the same name is
  /// removed first. On Windows the port is picked by the system.
  pub async fn bind() -> Result<(Listener, SocketAddress), PlatformError> {
    #[cfg(unix)]
    {
      let path = std::env::temp_dir().join(format!("rmk-{}.sock", std::process::id()));
      if path.as_os_str().len() >= 104 {
        // sun_path is short on some platforms
        return Err(PlatformError::SocketPath(path.to_string_lossy().into_owned()));
      }
      let _ = std::fs::remove_file(&path);
      let inner = UnixListener::bind(&path).map_err(PlatformError::Bind)?;
      Ok((Listener { inner }, SocketAddress::Path(path)))
    }

    #[cfg(windows)]
    {
      let inner = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(PlatformError::Bind)?;
      let port = inner.local_addr().map_err(PlatformError::Bind)?.port();
      Ok((Listener { inner }, SocketAddress::Port(port)))
    }
  }

  /// Wait for the next client connection.
  pub async fn accept(&self) -> io::Result<Stream> {
    #[cfg(unix)]
    {
      let (stream, _) = self.inner.accept().await?;
      Ok(Stream { inner: stream })
    }

    #[cfg(windows)]
    {
      let (stream, _) = self.inner.accept().await?;
      Ok(Stream { inner: stream })
    }
  }
}

/// An accepted client connection, server side.
pub struct Stream {
  #[cfg(unix)]
  inner: UnixStream,
  #[cfg(windows)]
  inner: TcpStream,
}

impl Stream {
  /// Read some bytes, returning the number read (0 at end of stream).
  pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    use tokio::io::AsyncReadExt;
    self.inner.read(buf).await
  }

  /// Write all of `buf`.
  pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;
    self.inner.write_all(buf).await
  }
}

/// A blocking connection to the coordinator, client side.
pub struct BlockingStream {
  #[cfg(unix)]
  inner: std::os::unix::net::UnixStream,
  #[cfg(windows)]
  inner: std::net::TcpStream,
}

impl io::Read for BlockingStream {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    self.inner.read(buf)
  }
}

impl io::Write for BlockingStream {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.inner.write(buf)
  }

  fn flush(&mut self) -> io::Result<()> {
    self.inner.flush()
  }
}

/// Connect to the coordinator at `addr` (blocking).
pub fn connect(addr: &SocketAddress) -> io::Result<BlockingStream> {
  match addr {
    #[cfg(unix)]
    SocketAddress::Path(p) => {
      let inner = std::os::unix::net::UnixStream::connect(p)?;
      Ok(BlockingStream { inner })
    }
    #[cfg(windows)]
    SocketAddress::Port(p) => {
      let inner = std::net::TcpStream::connect(("127.0.0.1", *p))?;
      Ok(BlockingStream { inner })
    }
  }
}
