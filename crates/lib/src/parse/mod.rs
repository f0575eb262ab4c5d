//! Rule file parsing.
//!
//! The rule file is a line-oriented byte stream. A logical line is
//! either a global variable assignment (`NAME = ...`, `NAME += ...`) or
//! a rule header (`targets : prerequisites`) optionally followed by a
//! script body (lines starting with a tab or space). Variables and
//! built-in functions are expanded as they are encountered.
//!
//! Parsing registers rules as it goes: generic rules accumulate in
//! declaration order, scripted specific rules bind a shared record to
//! each of their targets (and reset the shared dependency record to
//! static prerequisites plus anything previously recorded), transparent
//! rules accumulate prerequisites and local assignments per target.

pub mod expand;
pub mod lex;
mod rules;

use thiserror::Error;
use tracing::debug;

pub use expand::{LocalVars, Scope, Variables};
pub use rules::{Assign, Rule, RuleSet};

use std::rc::Rc;

use crate::deps::DepStore;
use crate::path::PathContext;

use expand::{expand_to_vec, parse_list};
use lex::{Cursor, Token};

/// Errors reported while loading a rule file.
///
/// All of these are configuration errors: they abort the run before any
/// script starts.
#[derive(Debug, Error)]
pub enum ParseError {
  #[error("syntax error at line {line}: {message}")]
  Syntax { line: usize, message: String },

  #[error("line {line}: unknown function '{name}'")]
  UnknownFunction { line: usize, name: String },

  #[error("{target} cannot be the target of several rules")]
  DuplicateRule { target: String },

  #[error("line {line}: every target of a generic rule must contain a single '%'")]
  Genericity { line: usize },

  #[error("line {line}: variable assignments are only allowed on specific rules without a script")]
  MisplacedAssignment { line: usize },
}

impl ParseError {
  pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
    ParseError::Syntax {
      line,
      message: message.into(),
    }
  }
}

/// Parse a rule file, updating `vars` and registering dependency
/// records for specific rules into `deps`.
pub fn load_rules(
  input: &[u8],
  paths: &PathContext,
  vars: &mut Variables,
  deps: &mut DepStore,
) -> Result<RuleSet, ParseError> {
  let mut cur = Cursor::new(input);
  let mut rules = RuleSet::default();

  loop {
    let indented = matches!(cur.peek(), Some(b' ') | Some(b'\t'));
    cur.skip_spaces();
    match cur.peek() {
      None => break,
      Some(b'#') => {
        cur.skip_line();
        cur.skip_eol();
        continue;
      }
      Some(b'\r') | Some(b'\n') => {
        cur.skip_eol();
        continue;
      }
      _ if indented => {
        return Err(ParseError::syntax(cur.line(), "script line outside a rule"));
      }
      _ => {}
    }

    match cur.next_token() {
      Token::Word => {
        let name = cur.read_word();
        match cur.next_token() {
          Token::Equal => {
            cur.skip(1);
            let words = expand_to_vec(&parse_list(&mut cur)?, Scope::global(vars))?;
            debug!(var = %name, count = words.len(), "variable assignment");
            vars.assign(&name, words);
            expect_line_end(&mut cur)?;
          }
          Token::PlusEqual => {
            cur.skip(2);
            let words = expand_to_vec(&parse_list(&mut cur)?, Scope::global(vars))?;
            debug!(var = %name, count = words.len(), "variable append");
            vars.append(&name, words);
            expect_line_end(&mut cur)?;
          }
          _ => load_rule(&mut cur, Some(name), paths, vars, deps, &mut rules)?,
        }
      }
      Token::DollarParen => load_rule(&mut cur, None, paths, vars, deps, &mut rules)?,
      Token::Eof => break,
      _ => {
        return Err(ParseError::syntax(cur.line(), "expected a rule or variable assignment"));
      }
    }
  }

  Ok(rules)
}

fn expect_line_end(cur: &mut Cursor<'_>) -> Result<(), ParseError> {
  match cur.next_token() {
    Token::Eol => {
      cur.skip_eol();
      Ok(())
    }
    Token::Eof => Ok(()),
    _ => Err(ParseError::syntax(cur.line(), "unexpected input at end of line")),
  }
}

/// Parse one rule, the first target possibly already read.
fn load_rule(
  cur: &mut Cursor<'_>,
  first: Option<String>,
  paths: &PathContext,
  vars: &Variables,
  deps: &mut DepStore,
  rules: &mut RuleSet,
) -> Result<(), ParseError> {
  let line = cur.line();

  // Targets and genericity.
  let mut targets = expand_to_vec(&parse_list(cur)?, Scope::global(vars))?;
  if let Some(first) = first {
    targets.insert(0, first);
  }
  if targets.is_empty() {
    return Err(ParseError::syntax(line, "rule without targets"));
  }
  for t in &mut targets {
    if t.is_empty() {
      return Err(ParseError::syntax(line, "empty target name"));
    }
    *t = paths.normalize(t);
  }
  let generic = targets[0].contains('%');
  for t in &targets {
    let wildcards = t.matches('%').count();
    if (generic && wildcards != 1) || (!generic && wildcards != 0) {
      return Err(ParseError::Genericity { line });
    }
  }

  match cur.next_token() {
    Token::Colon => cur.skip(1),
    _ => return Err(ParseError::syntax(cur.line(), "expected ':' after rule targets")),
  }

  // Prerequisites, or a single rule-local assignment.
  let mut prereqs = Vec::new();
  let mut assigns = Vec::new();
  match cur.next_token() {
    Token::Word => {
      let word = cur.read_word();
      match cur.next_token() {
        Token::Equal => {
          cur.skip(1);
          let words = expand_to_vec(&parse_list(cur)?, Scope::global(vars))?;
          assigns.push(Assign {
            name: word,
            append: false,
            words,
          });
        }
        Token::PlusEqual => {
          cur.skip(2);
          let words = expand_to_vec(&parse_list(cur)?, Scope::global(vars))?;
          assigns.push(Assign {
            name: word,
            append: true,
            words,
          });
        }
        _ => {
          prereqs.push(word);
          prereqs.extend(expand_to_vec(&parse_list(cur)?, Scope::global(vars))?);
        }
      }
    }
    _ => {
      prereqs = expand_to_vec(&parse_list(cur)?, Scope::global(vars))?;
    }
  }
  for p in &mut prereqs {
    *p = paths.normalize(p);
  }
  expect_line_end(cur)?;

  // Script body: the maximal run of lines starting with a tab or
  // space. The single leading tab/space is stripped; blank lines are
  // kept. A comment or column-zero line ends the body.
  let mut body: Vec<u8> = Vec::new();
  loop {
    match cur.peek() {
      Some(b' ') | Some(b'\t') => {
        cur.bump();
        while let Some(c) = cur.peek() {
          if c == b'\n' {
            break;
          }
          cur.bump();
          body.push(c);
        }
      }
      Some(c @ (b'\r' | b'\n')) => {
        cur.bump();
        body.push(c);
      }
      _ => break,
    }
  }
  let script = String::from_utf8_lossy(&body).into_owned();

  if !assigns.is_empty() && (generic || !script.is_empty()) {
    return Err(ParseError::MisplacedAssignment { line });
  }

  let rule = Rule {
    targets,
    prereqs,
    assigns,
    script,
  };

  if generic {
    debug!(target = %rule.targets[0], "generic rule");
    rules.generic.push(rule);
    return Ok(());
  }

  if rules.default_target.is_none() {
    rules.default_target = Some(rule.targets[0].clone());
  }

  if rule.is_scripted() {
    // All targets of a scripted rule share one dependency record; its
    // prerequisite set starts from the static prerequisites plus
    // whatever was recorded for each target before.
    debug!(target = %rule.targets[0], siblings = rule.targets.len(), "scripted rule");
    deps.replace_for_rule(&rule.targets, &rule.prereqs);
    let shared = Rc::new(rule);
    for t in &shared.targets {
      if rules.scripted.insert(t.clone(), Rc::clone(&shared)).is_some() {
        return Err(ParseError::DuplicateRule { target: t.clone() });
      }
    }
  } else {
    debug!(target = %rule.targets[0], "transparent rule");
    for t in &rule.targets {
      deps.add_prereqs(t, &rule.prereqs);
      let entry = rules.transparent.entry(t.clone()).or_insert_with(|| Rule {
        targets: vec![t.clone()],
        ..Rule::default()
      });
      entry.prereqs.extend(rule.prereqs.iter().cloned());
      entry.assigns.extend(rule.assigns.iter().cloned());
    }
  }

  Ok(())
}
