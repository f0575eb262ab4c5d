//! Shell invocation for rule scripts.
//!
//! Rule scripts are run by a single POSIX shell per job. The shell reads
//! the script from standard input (`-s`) and exits on the first failing
//! command (`-e`); the substituted target names are passed as positional
//! arguments so scripts can refer to `$1`, `$2`, ...

/// Path of the shell executable used to run rule scripts.
///
/// On Unix this is always `/bin/sh`; user shells may source profile
/// files and are not suitable for reproducible script execution.
pub fn shell_program() -> &'static str {
  #[cfg(unix)]
  {
    "/bin/sh"
  }

  #[cfg(windows)]
  {
    "sh.exe"
  }
}

/// Flags passed to the shell before the positional target names.
///
/// `-e` aborts on the first failing command, `-s` reads the script from
/// standard input, and `-v` (when `echo` is set) echoes script lines as
/// they are read.
pub fn shell_args(echo: bool) -> Vec<&'static str> {
  let mut args = vec!["-e", "-s"];
  if echo {
    args.push("-v");
  }
  args
}
