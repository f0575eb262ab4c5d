//! Shared test helpers for CLI integration tests.

use std::fs::File;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use assert_cmd::Command;
use tempfile::TempDir;

/// Isolated build directory with its own rule file.
///
/// Every test works in a temporary directory so `.remake`, the rule
/// file, and all targets are private to it. The directory containing
/// the `remake` binary is prepended to `PATH` so that rule scripts can
/// call `remake` recursively.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    TestEnv {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Create an environment with the given `Remakefile`.
  pub fn with_rules(rules: &str) -> Self {
    let env = Self::new();
    env.write("Remakefile", rules);
    env
  }

  pub fn path(&self, name: &str) -> PathBuf {
    self.temp.path().join(name)
  }

  pub fn write(&self, name: &str, content: &str) -> PathBuf {
    let path = self.path(name);
    std::fs::write(&path, content).unwrap();
    path
  }

  pub fn read(&self, name: &str) -> String {
    std::fs::read_to_string(self.path(name)).unwrap()
  }

  pub fn exists(&self, name: &str) -> bool {
    self.path(name).exists()
  }

  /// Backdate a file so mtime comparisons don't depend on sleeps.
  pub fn set_age(&self, name: &str, seconds_ago: u64) {
    let file = File::options().write(true).open(self.path(name)).unwrap();
    file
      .set_modified(SystemTime::now() - Duration::from_secs(seconds_ago))
      .unwrap();
  }

  /// A `remake` command running in this environment.
  ///
  /// `REMAKE_SOCKET`/`REMAKE_JOB_ID` are scrubbed so a test never
  /// accidentally runs in client mode against a leaked coordinator.
  pub fn remake(&self) -> Command {
    let mut cmd = Command::cargo_bin("remake").unwrap();
    cmd.current_dir(self.temp.path());
    cmd.env_remove("REMAKE_SOCKET");
    cmd.env_remove("REMAKE_JOB_ID");
    cmd.env("PATH", path_with_remake());
    cmd
  }
}

/// `PATH` with the freshly built `remake` binary in front.
fn path_with_remake() -> std::ffi::OsString {
  let bin = assert_cmd::cargo::cargo_bin("remake");
  let bin_dir = bin.parent().unwrap().to_path_buf();
  let mut parts = vec![bin_dir];
  if let Some(path) = std::env::var_os("PATH") {
    parts.extend(std::env::split_paths(&path));
  }
  std::env::join_paths(parts).unwrap()
}
