//! Recursive invocations, dynamic dependencies, and `-r` expansion.

use predicates::prelude::*;

use crate::common::TestEnv;

#[test]
fn dynamic_edge_recorded_and_honored() {
  let env = TestEnv::with_rules(concat!(
    "a:\n",
    "\techo x > a\n",
    "\tremake b\n",
    "b:\n",
    "\techo y > b\n",
  ));

  // First run: both scripts execute, the dynamic edge persists.
  env
    .remake()
    .arg("a")
    .assert()
    .success()
    .stdout(predicate::str::contains("Building a").and(predicate::str::contains("Building b")));
  assert_eq!(env.read("a"), "x\n");
  assert_eq!(env.read("b"), "y\n");
  assert!(env.read(".remake").lines().any(|l| l == "a : b"), "dynamic edge not persisted");

  // Touch b: the recorded edge obsoletes a, but b itself stays
  // up-to-date, so exactly one script runs.
  env.set_age("a", 100);
  env.write("b", "y\n");
  env
    .remake()
    .arg("a")
    .assert()
    .success()
    .stdout(predicate::str::contains("Building a").and(predicate::str::contains("Building b").not()));
}

#[test]
fn failed_sub_request_fails_the_caller() {
  let env = TestEnv::with_rules(concat!(
    "a:\n",
    "\tremake missing\n",
    "\techo x > a\n",
  ));
  env
    .remake()
    .arg("a")
    .assert()
    .failure()
    .stderr(predicate::str::contains("no rule for building missing"));
  assert!(!env.exists("a"));
}

#[test]
fn sub_requests_share_the_job_budget() {
  // A waiting parent must not hold a slot: with -j1, the parent's
  // sub-request still gets to run its child script.
  let env = TestEnv::with_rules(concat!(
    "parent:\n",
    "\tremake child\n",
    "\ttouch parent\n",
    "child:\n",
    "\ttouch child\n",
  ));
  env.remake().args(["-j1", "parent"]).assert().success();
  assert!(env.exists("parent") && env.exists("child"));
}

#[test]
fn indirect_targets_from_stdin() {
  let env = TestEnv::with_rules(concat!(
    "p:\n\ttouch p\n",
    "q:\n\ttouch q\n",
  ));
  env
    .remake()
    .arg("-r")
    .arg("x")
    .write_stdin("x : p q\n")
    .assert()
    .success();
  assert!(env.exists("p") && env.exists("q"));
}

#[test]
fn indirect_without_targets_uses_first_record() {
  let env = TestEnv::with_rules("p:\n\ttouch p\n");
  env.remake().arg("-r").write_stdin("whatever : p\n").assert().success();
  assert!(env.exists("p"));
}

#[test]
fn client_mode_with_no_targets_succeeds_without_server() {
  let env = TestEnv::with_rules("t:\n\ttouch t\n");
  let mut cmd = env.remake();
  cmd.env("REMAKE_SOCKET", "/nonexistent/socket");
  cmd.assert().success();
  assert!(!env.exists("t"));
}

#[test]
fn client_mode_without_server_fails() {
  let env = TestEnv::with_rules("t:\n\ttouch t\n");
  let mut cmd = env.remake();
  cmd.env("REMAKE_SOCKET", "/nonexistent/socket");
  cmd.arg("t").assert().failure();
}

#[test]
fn cumulative_dynamic_edges_across_runs() {
  // Dependencies from several runs accumulate in the store.
  let env = TestEnv::with_rules(concat!(
    "a: static\n",
    "\techo x > a\n",
    "\tremake b\n",
    "b:\n\ttouch b\n",
  ));
  env.write("static", "s\n");
  env.set_age("static", 100);
  env.remake().arg("a").assert().success();

  let stored = env.read(".remake");
  let line = stored.lines().find(|l| l.starts_with("a :")).unwrap();
  assert!(line.contains('b') && line.contains("static"), "got {line:?}");
}
