//! The persistent dependency store.
//!
//! A dependency record holds the accumulated prerequisite set for a
//! group of co-built targets. Every target of a multi-target scripted
//! rule shares one record by identity: records live in an arena and
//! targets map to arena ids, so superseding a record rebinds the
//! target→id mapping instead of mutating anything in place.
//!
//! Between runs the records are serialized to `.remake` as lines of the
//! form `<target>... : <prereq>...`, with the same escape conventions as
//! rule words. Each record is written exactly once regardless of how
//! many targets point to it.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::parse::lex::{Cursor, Token, escape_word};

/// Identity handle of a dependency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepId(usize);

/// Persistent edges for a group of co-built targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepRecord {
  /// Targets sharing this record, in declaration order.
  pub targets: Vec<String>,
  /// Unordered prerequisite set, static and dynamic alike.
  pub deps: BTreeSet<String>,
}

/// Errors reported while reading a dependency file.
#[derive(Debug, Error)]
pub enum DepsError {
  #[error("malformed dependency line {line}: {message}")]
  Malformed { line: usize, message: &'static str },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// The target → record mapping, persisted across runs.
#[derive(Debug, Default)]
pub struct DepStore {
  records: Vec<DepRecord>,
  by_target: HashMap<String, DepId>,
}

impl DepStore {
  /// The record id a target is bound to, if any.
  pub fn id_of(&self, target: &str) -> Option<DepId> {
    self.by_target.get(target).copied()
  }

  /// The record a target is bound to, if any.
  pub fn lookup(&self, target: &str) -> Option<&DepRecord> {
    self.id_of(target).map(|id| &self.records[id.0])
  }

  fn bind(&mut self, record: DepRecord) -> DepId {
    let id = DepId(self.records.len());
    for t in &record.targets {
      self.by_target.insert(t.clone(), id);
    }
    self.records.push(record);
    id
  }

  /// Bind a target to a fresh single-target record if it has none.
  pub fn ensure(&mut self, target: &str) -> DepId {
    if let Some(id) = self.id_of(target) {
      return id;
    }
    self.bind(DepRecord {
      targets: vec![target.to_string()],
      deps: BTreeSet::new(),
    })
  }

  /// Add prerequisites to a target's record, creating one if needed.
  pub fn add_prereqs(&mut self, target: &str, prereqs: &[String]) {
    let id = self.ensure(target);
    self.records[id.0].deps.extend(prereqs.iter().cloned());
  }

  /// Insert one prerequisite into a target's existing record.
  ///
  /// Used for dynamic edges contributed by sub-requests; the record is
  /// guaranteed to exist because the requesting job replaced it when
  /// its script started.
  pub fn add_dynamic(&mut self, target: &str, prereq: String) {
    let id = self.ensure(target);
    self.records[id.0].deps.insert(prereq);
  }

  /// Replace the shared record for a scripted rule's targets.
  ///
  /// The new record's prerequisites are the rule's static prerequisites
  /// plus everything previously recorded for any of the targets. The
  /// old records are superseded by rebinding, preserving the identity
  /// of anything else still pointing at them.
  pub fn replace_for_rule(&mut self, targets: &[String], static_deps: &[String]) {
    let mut deps: BTreeSet<String> = static_deps.iter().cloned().collect();
    for t in targets {
      if let Some(rec) = self.lookup(t) {
        deps.extend(rec.deps.iter().cloned());
      }
    }
    self.bind(DepRecord {
      targets: targets.to_vec(),
      deps,
    });
  }

  /// The record with the alphabetically first target, used for the
  /// implicit `-r` target.
  pub fn first_record(&self) -> Option<&DepRecord> {
    let first = self.by_target.keys().min()?;
    self.lookup(first)
  }

  /// Parse dependency lines (`targets : prereqs`) from a byte stream.
  pub fn load(&mut self, input: &[u8]) -> Result<(), DepsError> {
    let mut cur = Cursor::new(input);
    loop {
      let mut targets = Vec::new();
      while cur.next_token() == Token::Word {
        targets.push(cur.read_word());
      }
      if targets.is_empty() {
        match cur.next_token() {
          Token::Eof => return Ok(()),
          Token::Eol => {
            cur.skip_eol();
            continue;
          }
          _ => {
            return Err(DepsError::Malformed {
              line: cur.line(),
              message: "expected a target name",
            });
          }
        }
      }
      if cur.next_token() != Token::Colon {
        return Err(DepsError::Malformed {
          line: cur.line(),
          message: "expected ':' after targets",
        });
      }
      cur.skip(1);
      let mut deps = BTreeSet::new();
      while cur.next_token() == Token::Word {
        deps.insert(cur.read_word());
      }
      debug!(target = %targets[0], deps = deps.len(), "loaded dependency record");
      self.bind(DepRecord { targets, deps });
      cur.skip_eol();
    }
  }

  /// Load the store from a file; a missing file leaves the store empty.
  pub fn load_file(&mut self, path: &Path) -> Result<(), DepsError> {
    let input = match std::fs::read(path) {
      Ok(bytes) => bytes,
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no dependency file");
        return Ok(());
      }
      Err(err) => return Err(err.into()),
    };
    self.load(&input)
  }

  /// Serialize every live record exactly once.
  pub fn save(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
    let mut keys: Vec<&String> = self.by_target.keys().collect();
    keys.sort();
    let mut written: HashSet<DepId> = HashSet::new();
    for key in keys {
      let id = self.by_target[key];
      if !written.insert(id) {
        continue;
      }
      let rec = &self.records[id.0];
      let mut line = String::new();
      for t in &rec.targets {
        line.push_str(&escape_word(t));
        line.push(' ');
      }
      line.push(':');
      for d in &rec.deps {
        line.push(' ');
        line.push_str(&escape_word(d));
      }
      line.push('\n');
      out.write_all(line.as_bytes())?;
    }
    Ok(())
  }

  /// Write the store to a file.
  pub fn save_file(&self, path: &Path) -> std::io::Result<()> {
    let mut out = Vec::new();
    self.save(&mut out)?;
    std::fs::write(path, out)
  }
}
