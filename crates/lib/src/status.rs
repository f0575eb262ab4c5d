//! The memoized obsolescence engine.
//!
//! `status()` decides whether a target needs work by comparing file
//! modification times against the dependency store. All targets sharing
//! a dependency record are entangled: they are stat'ed together and
//! conclude the same status. The comparison uses the *latest* sibling
//! mtime, not the earliest, so a rule may pair a stamp file the script
//! always touches with an output the underlying tool preserves when
//! unchanged, without the group staying obsolete forever.
//!
//! After a script succeeds, `update_after_run()` re-stats each declared
//! target: an unchanged mtime strictly older than the engine's startup
//! time means the script chose not to rewrite the file, and the target
//! is up-to-date rather than remade. `still_need_rebuild()` applies the
//! one permitted downgrade: a target that was obsolete only because a
//! prerequisite had to be re-evaluated becomes up-to-date again once
//! every prerequisite resolves unchanged.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::deps::DepStore;

/// Build status of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  /// Target is up-to-date.
  Uptodate,
  /// Target is missing or obsolete.
  Todo,
  /// Target has an obsolete prerequisite; needs re-evaluation once the
  /// prerequisite resolves.
  Recheck,
  /// Target is being rebuilt.
  Running,
  /// Target was successfully rebuilt.
  Remade,
  /// Build failed for target.
  Failed,
}

impl Status {
  /// Whether the target requires evaluation or rebuild.
  pub fn is_obsolete(self) -> bool {
    matches!(self, Status::Todo | Status::Recheck)
  }
}

/// Cached status and last-observed mtime of a target.
#[derive(Debug, Clone, Copy)]
pub struct TargetState {
  pub status: Status,
  pub last: SystemTime,
}

impl Default for TargetState {
  fn default() -> Self {
    TargetState {
      status: Status::Uptodate,
      last: UNIX_EPOCH,
    }
  }
}

fn mtime(target: &str) -> Option<SystemTime> {
  std::fs::metadata(target).and_then(|m| m.modified()).ok()
}

/// Memoized status map for one run.
#[derive(Debug)]
pub struct StatusMap {
  map: HashMap<String, TargetState>,
  started: SystemTime,
}

impl Default for StatusMap {
  fn default() -> Self {
    StatusMap {
      map: HashMap::new(),
      started: SystemTime::now(),
    }
  }
}

impl StatusMap {
  /// The cached state of a target, if it has been evaluated or marked.
  pub fn get(&self, target: &str) -> Option<TargetState> {
    self.map.get(target).copied()
  }

  /// Force a target's status, keeping its recorded mtime.
  pub fn set(&mut self, target: &str, status: Status) {
    self.map.entry(target.to_string()).or_default().status = status;
  }

  /// Compute and memoize the status of `target`.
  ///
  /// Without a dependency record the file speaks for itself: missing is
  /// Todo, present is Uptodate. With a record, every sibling is stat'ed
  /// (a missing one makes the whole group Todo), then prerequisites are
  /// evaluated recursively: one newer than the latest sibling means
  /// Todo, one not up-to-date means Recheck. The conclusion is assigned
  /// to every sibling.
  pub fn status(&mut self, deps: &DepStore, target: &str) -> TargetState {
    if let Some(state) = self.map.get(target) {
      return *state;
    }
    // Memoize before recursing so a cyclic record terminates.
    self.map.insert(target.to_string(), TargetState::default());

    let Some(rec) = deps.lookup(target) else {
      let state = match mtime(target) {
        Some(t) => TargetState {
          status: Status::Uptodate,
          last: t,
        },
        None => TargetState {
          status: Status::Todo,
          last: UNIX_EPOCH,
        },
      };
      debug!(target, status = ?state.status, "status (no record)");
      self.map.insert(target.to_string(), state);
      return state;
    };

    let mut concluded = Status::Uptodate;
    let mut latest = UNIX_EPOCH;
    for sibling in &rec.targets {
      let t = match mtime(sibling) {
        Some(t) => t,
        None => {
          concluded = Status::Todo;
          UNIX_EPOCH
        }
      };
      self.map.entry(sibling.clone()).or_default().last = t;
      if t > latest {
        latest = t;
      }
    }

    if concluded != Status::Todo {
      for dep in &rec.deps {
        let dep_state = self.status(deps, dep);
        if latest < dep_state.last {
          debug!(target, dep = %dep, "older than prerequisite");
          concluded = Status::Todo;
          break;
        }
        if dep_state.status != Status::Uptodate {
          debug!(target, dep = %dep, "obsolete prerequisite");
          concluded = Status::Recheck;
        }
      }
    }

    for sibling in &rec.targets {
      self.map.entry(sibling.clone()).or_default().status = concluded;
    }
    debug!(target, status = ?concluded, "status");
    self.map[target]
  }

  /// Re-evaluate a declared target after its script succeeded.
  ///
  /// An mtime different from the recorded one means the target was
  /// remade; an identical mtime strictly older than the engine's
  /// startup time means the script left it alone. A file stamped at or
  /// after startup is conservatively considered remade even when the
  /// mtime matches, since the clock cannot distinguish the two.
  pub fn update_after_run(&mut self, target: &str) {
    let state = self.map.entry(target.to_string()).or_default();
    state.status = Status::Remade;
    if state.last >= self.started {
      debug!(target, "possibly remade");
      return;
    }
    match mtime(target) {
      None => {
        debug!(target, "missing after script");
        state.last = UNIX_EPOCH;
      }
      Some(t) if t != state.last => {
        debug!(target, "remade");
        state.last = t;
      }
      Some(_) => {
        debug!(target, "unchanged");
        state.status = Status::Uptodate;
      }
    }
  }

  /// Decide whether a deferred script still has to run once its
  /// prerequisites resolved.
  ///
  /// `was_recheck` is the target's status when the dependency client
  /// was created. Only a Recheck whose entire prerequisite set ended up
  /// Uptodate is downgraded; the sibling group becomes Uptodate and the
  /// script is skipped.
  pub fn still_need_rebuild(&mut self, deps: &DepStore, target: &str, was_recheck: bool) -> bool {
    if !was_recheck {
      return true;
    }
    let Some(rec) = deps.lookup(target) else {
      return true;
    };
    for dep in &rec.deps {
      match self.map.get(dep) {
        Some(state) if state.status == Status::Uptodate => {}
        _ => return true,
      }
    }
    for sibling in &rec.targets {
      self.map.entry(sibling.clone()).or_default().status = Status::Uptodate;
    }
    debug!(target, "no longer obsolete");
    false
  }
}
