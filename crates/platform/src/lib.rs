//! Platform plumbing for remake.
//!
//! This crate provides the platform-specific pieces of the build
//! coordinator behind an abstract contract:
//! - the local socket used for recursive build requests (a filesystem
//!   UNIX socket on Unix-likes, a loopback TCP port on Windows), and
//! - the POSIX shell invocation used to run rule scripts.
//!
//! Everything else in remake is platform-agnostic and talks to these
//! types only.

mod error;
mod shell;
mod socket;

pub use error::PlatformError;
pub use shell::{shell_args, shell_program};
pub use socket::{BlockingStream, Listener, SocketAddress, Stream, connect};
