//! Error types for remake-platform.

use thiserror::Error;

/// Errors that can occur in platform operations.
#[derive(Debug, Error)]
pub enum PlatformError {
  #[error("failed to create server socket: {0}")]
  Bind(#[source] std::io::Error),

  #[error("socket path is not representable: {0}")]
  SocketPath(String),

  #[error("invalid socket address {value:?}: {reason}")]
  BadAddress { value: String, reason: &'static str },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}
