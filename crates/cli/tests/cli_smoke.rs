//! Smoke tests for the CLI surface.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn remake_in(dir: &TempDir) -> Command {
  let mut cmd = Command::cargo_bin("remake").unwrap();
  cmd.current_dir(dir.path());
  cmd.env_remove("REMAKE_SOCKET");
  cmd.env_remove("REMAKE_JOB_ID");
  cmd
}

#[test]
fn help_lists_options() {
  let dir = TempDir::new().unwrap();
  remake_in(&dir)
    .arg("--help")
    .assert()
    .success()
    .stdout(
      predicate::str::contains("--jobs")
        .and(predicate::str::contains("--keep-going"))
        .and(predicate::str::contains("--silent")),
    );
}

#[test]
fn missing_rule_file_is_an_error() {
  let dir = TempDir::new().unwrap();
  remake_in(&dir)
    .assert()
    .failure()
    .stderr(predicate::str::contains("no rule file"));
}

#[test]
fn syntax_error_aborts_before_any_script() {
  let dir = TempDir::new().unwrap();
  std::fs::write(dir.path().join("Remakefile"), "t: : bad\n\ttouch t\n").unwrap();
  remake_in(&dir)
    .arg("t")
    .assert()
    .failure()
    .stderr(predicate::str::contains("syntax error"));
  assert!(!dir.path().join("t").exists());
}

#[test]
fn duplicate_scripted_rule_is_an_error() {
  let dir = TempDir::new().unwrap();
  std::fs::write(dir.path().join("Remakefile"), "t:\n\ttouch t\nt:\n\ttouch t\n").unwrap();
  remake_in(&dir)
    .arg("t")
    .assert()
    .failure()
    .stderr(predicate::str::contains("cannot be the target of several rules"));
}

#[test]
fn alternate_rule_file_with_f() {
  let dir = TempDir::new().unwrap();
  std::fs::write(dir.path().join("rules.mk"), "t:\n\ttouch t\n").unwrap();
  remake_in(&dir).args(["-f", "rules.mk", "t"]).assert().success();
  assert!(dir.path().join("t").exists());
}

#[test]
fn no_targets_and_no_rules_is_a_noop() {
  let dir = TempDir::new().unwrap();
  std::fs::write(dir.path().join("Remakefile"), "V = 1\n").unwrap();
  remake_in(&dir).assert().success();
}
