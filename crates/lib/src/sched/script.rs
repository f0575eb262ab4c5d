//! Script preparation.
//!
//! Before a rule body is piped to the shell, its automatic variables
//! are substituted: `$<` (first prerequisite), `$^` (all prerequisites,
//! space-joined), `$@` (first target), `$$` (a literal `$`), and
//! `$(...)` expansions against the rule-local and global variables.
//!
//! A `$(name)` whose name is neither a visible variable nor a built-in
//! function passes through verbatim, so shell command substitution
//! `$(cmd ...)` inside scripts keeps working. Other `$x` sequences are
//! left for the shell, which receives the substituted target names as
//! positional arguments.

use crate::parse::lex::{Cursor, Token};
use crate::parse::{expand, LocalVars, ParseError, Rule, Scope, Variables};

/// Build the rule-local variable layer from a rule's assignments.
pub fn local_vars(rule: &Rule) -> LocalVars {
  let mut locals = LocalVars::default();
  for assign in &rule.assigns {
    if assign.append {
      locals.append(&assign.name, assign.words.clone());
    } else {
      locals.assign(&assign.name, assign.words.clone());
    }
  }
  locals
}

/// Substitute automatic variables and `$(...)` expansions in a rule
/// body.
pub fn prepare(rule: &Rule, globals: &Variables) -> Result<String, ParseError> {
  let locals = local_vars(rule);
  let scope = Scope::with_locals(globals, &locals);
  let body = rule.script.as_bytes();
  let mut out: Vec<u8> = Vec::with_capacity(body.len());

  let mut pos = 0;
  while pos < body.len() {
    let c = body[pos];
    if c != b'$' {
      out.push(c);
      pos += 1;
      continue;
    }
    match body.get(pos + 1) {
      Some(b'$') => {
        out.push(b'$');
        pos += 2;
      }
      Some(b'<') => {
        if let Some(first) = rule.prereqs.first() {
          out.extend_from_slice(first.as_bytes());
        }
        pos += 2;
      }
      Some(b'^') => {
        out.extend_from_slice(rule.prereqs.join(" ").as_bytes());
        pos += 2;
      }
      Some(b'@') => {
        if let Some(first) = rule.targets.first() {
          out.extend_from_slice(first.as_bytes());
        }
        pos += 2;
      }
      Some(b'(') => match substitute_reference(&body[pos + 2..], scope)? {
        Some((text, consumed)) => {
          out.extend_from_slice(text.as_bytes());
          pos += 2 + consumed;
        }
        None => {
          // Not a variable or function; leave it to the shell.
          out.extend_from_slice(b"$(");
          pos += 2;
        }
      },
      _ => {
        out.push(b'$');
        pos += 1;
      }
    }
  }
  Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Try to expand the `$(...)` whose opening `$(` precedes `input`.
///
/// Returns the space-joined expansion and the number of bytes consumed
/// (through the closing parenthesis), or `None` when the name does not
/// resolve to a variable or built-in function.
fn substitute_reference(input: &[u8], scope: Scope<'_>) -> Result<Option<(String, usize)>, ParseError> {
  let mut cur = Cursor::new(input);
  cur.skip_spaces();
  let name = cur.read_word();
  if name.is_empty() {
    return Ok(None);
  }
  match cur.next_token() {
    Token::RightParen => {
      let Some(value) = scope.lookup(&name) else {
        return Ok(None);
      };
      cur.skip(1);
      Ok(Some((value.join(" "), cur.consumed())))
    }
    _ if matches!(name.as_str(), "addprefix" | "addsuffix") => {
      let item = expand::parse_call(&mut cur, &name)?;
      let words = expand::expand_to_vec(&expand::WordList(vec![item]), scope)?;
      Ok(Some((words.join(" "), cur.consumed())))
    }
    _ => Ok(None),
  }
}
