//! Variable and function expansion.
//!
//! A word list in a rule file is a sequence of items: literal words,
//! `$(NAME)` variable references, and `$(FN arg1, arg2)` built-in
//! function calls. Parsing builds a small item tree; expansion walks it
//! as a lazy word stream, so nested `$(...)` arguments compose without
//! materializing intermediate lists until the outer consumer drains
//! them.
//!
//! `$(NAME)` expands to the most recent overwrite assignment followed by
//! all later appends. Inside a rule, a local overwrite wins over the
//! global value and local appends extend whatever is visible.

use std::collections::HashMap;

use super::ParseError;
use super::lex::{Cursor, Token};

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
  /// `$(addprefix P, LIST)`: each item of LIST prefixed by P.
  AddPrefix,
  /// `$(addsuffix S, LIST)`: each item of LIST suffixed by S.
  AddSuffix,
}

impl Func {
  fn by_name(name: &str) -> Option<Func> {
    match name {
      "addprefix" => Some(Func::AddPrefix),
      "addsuffix" => Some(Func::AddSuffix),
      _ => None,
    }
  }
}

/// One syntactic item of a word list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordItem {
  Lit(String),
  Var(String),
  Call(Func, Vec<WordList>),
}

/// A parsed, unexpanded word list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordList(pub Vec<WordItem>);

/// Global variables: `NAME = ...` overwrites, `NAME += ...` appends.
#[derive(Debug, Default, Clone)]
pub struct Variables {
  map: HashMap<String, Vec<String>>,
}

impl Variables {
  pub fn assign(&mut self, name: &str, words: Vec<String>) {
    self.map.insert(name.to_string(), words);
  }

  pub fn append(&mut self, name: &str, words: Vec<String>) {
    self.map.entry(name.to_string()).or_default().extend(words);
  }

  pub fn get(&self, name: &str) -> Option<&[String]> {
    self.map.get(name).map(Vec::as_slice)
  }
}

/// Rule-local variables, layered over the globals during script
/// preparation.
#[derive(Debug, Default)]
pub struct LocalVars {
  map: HashMap<String, LocalVar>,
}

#[derive(Debug, Default)]
struct LocalVar {
  overwrite: Option<Vec<String>>,
  appends: Vec<String>,
}

impl LocalVars {
  pub fn assign(&mut self, name: &str, words: Vec<String>) {
    self.map.entry(name.to_string()).or_default().overwrite = Some(words);
  }

  pub fn append(&mut self, name: &str, words: Vec<String>) {
    self.map.entry(name.to_string()).or_default().appends.extend(words);
  }
}

/// Variable lookup scope: globals plus optional rule-local layer.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
  globals: &'a Variables,
  locals: Option<&'a LocalVars>,
}

impl<'a> Scope<'a> {
  pub fn global(globals: &'a Variables) -> Self {
    Scope { globals, locals: None }
  }

  pub fn with_locals(globals: &'a Variables, locals: &'a LocalVars) -> Self {
    Scope {
      globals,
      locals: Some(locals),
    }
  }

  /// The overwrite layer and append layer visible for `name`.
  fn parts(&self, name: &str) -> (Option<&'a [String]>, &'a [String]) {
    let local = self.locals.and_then(|l| l.map.get(name));
    let base = match local.and_then(|l| l.overwrite.as_deref()) {
      Some(over) => Some(over),
      None => self.globals.get(name),
    };
    let appends = local.map(|l| l.appends.as_slice()).unwrap_or(&[]);
    (base, appends)
  }

  /// The visible value of `name`, or `None` when unset in every layer.
  pub fn lookup(&self, name: &str) -> Option<Vec<String>> {
    let (base, appends) = self.parts(name);
    if base.is_none() && appends.is_empty() {
      return None;
    }
    let mut out = base.map(<[String]>::to_vec).unwrap_or_default();
    out.extend_from_slice(appends);
    Some(out)
  }
}

/// Parse a word list up to the first token that cannot continue it
/// (line end, `:`, `=`, `+=`, `,`, `)`). The terminating token is left
/// unconsumed.
pub fn parse_list(cur: &mut Cursor<'_>) -> Result<WordList, ParseError> {
  let mut items = Vec::new();
  loop {
    match cur.next_token() {
      Token::Word => items.push(WordItem::Lit(cur.read_word())),
      Token::DollarParen => {
        cur.skip(1);
        if cur.peek() != Some(b'(') {
          return Err(ParseError::syntax(cur.line(), "expected '(' after '$'"));
        }
        cur.skip(1);
        items.push(parse_reference(cur)?);
      }
      _ => return Ok(WordList(items)),
    }
  }
}

/// Parse the inside of a `$(...)`, the opening `$(` already consumed.
fn parse_reference(cur: &mut Cursor<'_>) -> Result<WordItem, ParseError> {
  cur.skip_spaces();
  let name = cur.read_word();
  if name.is_empty() {
    return Err(ParseError::syntax(cur.line(), "expected a name after '$('"));
  }
  match cur.next_token() {
    Token::RightParen => {
      cur.skip(1);
      Ok(WordItem::Var(name))
    }
    _ => parse_call(cur, &name),
  }
}

/// Parse a function call's arguments, cursor sitting after the name.
pub(crate) fn parse_call(cur: &mut Cursor<'_>, name: &str) -> Result<WordItem, ParseError> {
  let func = Func::by_name(name).ok_or_else(|| ParseError::UnknownFunction {
    line: cur.line(),
    name: name.to_string(),
  })?;
  let mut args = Vec::new();
  loop {
    args.push(parse_list(cur)?);
    match cur.next_token() {
      Token::Comma => cur.skip(1),
      Token::RightParen => {
        cur.skip(1);
        break;
      }
      _ => return Err(ParseError::syntax(cur.line(), "expected ',' or ')' in function call")),
    }
  }
  if args.len() != 2 {
    return Err(ParseError::syntax(cur.line(), "built-in functions take two arguments"));
  }
  Ok(WordItem::Call(func, args))
}

/// Expand a word list as a lazy stream of words.
pub fn expand<'a>(
  list: &'a WordList,
  scope: Scope<'a>,
) -> Box<dyn Iterator<Item = Result<String, ParseError>> + 'a> {
  Box::new(list.0.iter().flat_map(move |item| expand_item(item, scope)))
}

fn expand_item<'a>(
  item: &'a WordItem,
  scope: Scope<'a>,
) -> Box<dyn Iterator<Item = Result<String, ParseError>> + 'a> {
  match item {
    WordItem::Lit(word) => Box::new(std::iter::once(Ok(word.clone()))),
    WordItem::Var(name) => {
      let (base, appends) = scope.parts(name);
      Box::new(base.into_iter().flatten().chain(appends).map(|w| Ok(w.clone())))
    }
    WordItem::Call(func, args) => {
      // Arguments are streams themselves; only the affix argument is
      // forced, the list argument stays lazy.
      let affix = match expand(&args[0], scope).next() {
        Some(Ok(word)) => word,
        Some(Err(err)) => return Box::new(std::iter::once(Err(err))),
        None => String::new(),
      };
      let func = *func;
      Box::new(expand(&args[1], scope).map(move |word| {
        word.map(|w| match func {
          Func::AddPrefix => format!("{affix}{w}"),
          Func::AddSuffix => format!("{w}{affix}"),
        })
      }))
    }
  }
}

/// Expand a word list into an owned vector.
pub fn expand_to_vec(list: &WordList, scope: Scope<'_>) -> Result<Vec<String>, ParseError> {
  expand(list, scope).collect()
}
