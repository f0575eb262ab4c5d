//! Rule resolution.
//!
//! For a requested target, pick the rule to execute: a scripted
//! specific rule wins outright; otherwise the best-matching generic
//! rule is instantiated by `%` substitution and any transparent rules
//! on its targets contribute their prerequisites (and, for the
//! requested target, local variables). A generic rule whose co-produced
//! target is claimed by a scripted rule makes the rule set ill-formed.

use thiserror::Error;

use crate::parse::{Rule, RuleSet};

/// Why no executable rule could be produced for a target.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("no rule for building {0}")]
  NoRule(String),

  #[error("ill-formed rules for {target}: co-target {sibling} has a scripted rule")]
  IllFormed { target: String, sibling: String },
}

/// Substitute the stem for the single `%` of each pattern word.
/// Words without `%` pass through unchanged.
fn substitute(stem: &str, words: &[String]) -> Vec<String> {
  words
    .iter()
    .map(|w| match w.find('%') {
      Some(pos) => format!("{}{}{}", &w[..pos], stem, &w[pos + 1..]),
      None => w.clone(),
    })
    .collect()
}

/// Find the best generic rule for `target` and the matched stem.
///
/// A pattern `A%B` matches when the target carries prefix A and suffix
/// B; the rule minimizing the stem length wins, earliest declaration
/// breaking ties.
fn find_generic<'a>(rules: &'a RuleSet, target: &str) -> Option<(&'a Rule, String)> {
  let mut best: Option<(&Rule, String)> = None;
  let mut best_len = target.len() + 1;
  for rule in &rules.generic {
    for pattern in &rule.targets {
      let Some(pos) = pattern.find('%') else { continue };
      let (prefix, suffix) = (&pattern[..pos], &pattern[pos + 1..]);
      if prefix.len() + suffix.len() > target.len() {
        continue;
      }
      if !target.starts_with(prefix) || !target.ends_with(suffix) {
        continue;
      }
      let stem_len = target.len() - prefix.len() - suffix.len();
      if stem_len < best_len {
        best_len = stem_len;
        best = Some((rule, target[prefix.len()..prefix.len() + stem_len].to_string()));
      }
      break;
    }
  }
  best
}

/// Compose the effective rule for `target`.
pub fn find_rule(rules: &RuleSet, target: &str) -> Result<Rule, ResolveError> {
  if let Some(rule) = rules.scripted.get(target) {
    return Ok((**rule).clone());
  }

  let Some((generic, stem)) = find_generic(rules, target) else {
    return match rules.transparent.get(target) {
      Some(rule) => Ok(rule.clone()),
      None => Err(ResolveError::NoRule(target.to_string())),
    };
  };

  let mut effective = Rule {
    targets: substitute(&stem, &generic.targets),
    prereqs: substitute(&stem, &generic.prereqs),
    assigns: Vec::new(),
    script: generic.script.clone(),
  };

  if let Some(extra) = rules.transparent.get(target) {
    effective.prereqs.extend(extra.prereqs.iter().cloned());
    effective.assigns.extend(extra.assigns.iter().cloned());
  }
  let others: Vec<String> = effective.targets.iter().filter(|t| *t != target).cloned().collect();
  for other in others {
    if rules.scripted.contains_key(&other) {
      return Err(ResolveError::IllFormed {
        target: target.to_string(),
        sibling: other,
      });
    }
    if let Some(extra) = rules.transparent.get(&other) {
      effective.prereqs.extend(extra.prereqs.iter().cloned());
    }
  }

  Ok(effective)
}
