//! Target name normalization.
//!
//! Every target name entering the system (command-line arguments, parsed
//! rule targets and prerequisites, targets received over the socket) is
//! normalized so that `a`, `./a`, and `d/../a` hash identically. Paths
//! under the working directory are re-expressed relative to it; paths
//! resolving outside the working tree keep their absolute form. Symlinks
//! are never followed.

/// Normalization context: the coordinator's working directory.
///
/// remake expects to run in the directory containing the rule file, so
/// the context is captured once at startup and shared by every
/// normalization site.
#[derive(Debug, Clone)]
pub struct PathContext {
  cwd: String,
}

#[cfg(unix)]
fn is_separator(c: char) -> bool {
  c == '/'
}

#[cfg(windows)]
fn is_separator(c: char) -> bool {
  c == '/' || c == '\\'
}

impl PathContext {
  /// Capture the current working directory.
  pub fn current() -> std::io::Result<Self> {
    let cwd = std::env::current_dir()?;
    Ok(Self::with_root(cwd.to_string_lossy().into_owned()))
  }

  /// Build a context rooted at an explicit directory.
  pub fn with_root(root: impl Into<String>) -> Self {
    let mut cwd = root.into();
    while cwd.len() > 1 && cwd.ends_with(|c| is_separator(c)) {
      cwd.pop();
    }
    PathContext { cwd }
  }

  /// The captured working directory.
  pub fn root(&self) -> &str {
    &self.cwd
  }

  /// Normalize a target name.
  ///
  /// Collapses `.` and `..` segments without touching the filesystem. A
  /// relative path climbing above the working directory is resolved
  /// against it first; an absolute result under the working tree is
  /// re-expressed relative to it. Idempotent.
  pub fn normalize(&self, name: &str) -> String {
    if !name.contains(is_separator) {
      return name.to_string();
    }
    let absolute = name.starts_with(is_separator);
    let mut segments: Vec<&str> = Vec::new();
    for seg in name.split(is_separator) {
      match seg {
        "" | "." => {}
        ".." => {
          if segments.pop().is_none() && !absolute {
            // Climbed above the working directory: anchor and retry.
            return self.normalize(&format!("{}/{}", self.cwd, name));
          }
        }
        _ => segments.push(seg),
      }
    }
    if segments.is_empty() {
      return if absolute { "/".to_string() } else { ".".to_string() };
    }
    let joined = segments.join("/");
    if absolute {
      self.relativize(&format!("/{}", joined))
    } else {
      joined
    }
  }

  /// Re-express an absolute, already-collapsed path relative to the
  /// working directory. Paths outside the working tree are returned
  /// unchanged.
  fn relativize(&self, path: &str) -> String {
    if path == self.cwd {
      return ".".to_string();
    }
    match path.strip_prefix(&self.cwd) {
      Some(rest) if rest.starts_with(is_separator) => {
        let rest = &rest[1..];
        if rest.is_empty() {
          ".".to_string()
        } else {
          rest.to_string()
        }
      }
      _ => path.to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ctx() -> PathContext {
    PathContext::with_root("/work/project")
  }

  #[test]
  fn plain_names_pass_through() {
    assert_eq!(ctx().normalize("a"), "a");
    assert_eq!(ctx().normalize("foo.o"), "foo.o");
  }

  #[test]
  fn dot_segments_collapse() {
    assert_eq!(ctx().normalize("./a"), "a");
    assert_eq!(ctx().normalize("d/../a"), "a");
    assert_eq!(ctx().normalize("a/./b"), "a/b");
    assert_eq!(ctx().normalize("a//b"), "a/b");
  }

  #[test]
  fn absolute_inside_tree_becomes_relative() {
    assert_eq!(ctx().normalize("/work/project/sub/x"), "sub/x");
    assert_eq!(ctx().normalize("/work/project"), ".");
    assert_eq!(ctx().normalize("/work/project/"), ".");
  }

  #[test]
  fn absolute_outside_tree_stays_absolute() {
    assert_eq!(ctx().normalize("/etc/passwd"), "/etc/passwd");
    assert_eq!(ctx().normalize("/work/projectx/a"), "/work/projectx/a");
  }

  #[test]
  fn climbing_out_resolves_against_cwd() {
    assert_eq!(ctx().normalize("../project/a"), "a");
    assert_eq!(ctx().normalize("../other/a"), "/work/other/a");
  }

  #[test]
  fn trailing_separator_ignored() {
    assert_eq!(ctx().normalize("a/b/"), "a/b");
  }

  #[test]
  fn normalize_is_idempotent() {
    let c = ctx();
    for name in [
      "a",
      "./a",
      "d/../a",
      "/work/project/sub/x",
      "/etc/passwd",
      "../other/a",
      "a/b/",
      ".",
      "/",
    ] {
      let once = c.normalize(name);
      assert_eq!(c.normalize(&once), once, "normalize({name:?})");
    }
  }
}
