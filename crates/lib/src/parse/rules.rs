//! Rule records produced by parsing.

use std::collections::HashMap;
use std::rc::Rc;

/// A rule-local variable assignment (`target: NAME = words`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assign {
  pub name: String,
  pub append: bool,
  pub words: Vec<String>,
}

/// One build directive.
///
/// Genericity is a property of the targets: a rule is generic iff its
/// targets contain `%`. Specific rules with an empty script are
/// *transparent*: they only contribute prerequisites and local
/// variables to whatever rule ends up building their target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rule {
  /// Files produced by this rule, in declaration order.
  pub targets: Vec<String>,
  /// Static prerequisites, in declaration order.
  pub prereqs: Vec<String>,
  /// Local variable assignments (transparent rules only).
  pub assigns: Vec<Assign>,
  /// Shell script building the targets; empty for transparent rules.
  pub script: String,
}

impl Rule {
  pub fn is_scripted(&self) -> bool {
    !self.script.is_empty()
  }
}

/// All rules loaded from a rule file.
///
/// Scripted specific rules share one record among all their targets, so
/// a multi-target rule resolves to the same `Rc` from each of them.
/// Transparent rules are kept per target, accumulating across multiple
/// declarations.
#[derive(Debug, Default)]
pub struct RuleSet {
  /// Generic rules in declaration order.
  pub generic: Vec<Rule>,
  /// Scripted specific rules, shared among their targets.
  pub scripted: HashMap<String, Rc<Rule>>,
  /// Transparent specific rules, one accumulated record per target.
  pub transparent: HashMap<String, Rule>,
  /// First target of the first specific rule, used when the command
  /// line names no target.
  pub default_target: Option<String>,
}
