//! Build scenarios exercising the status engine, resolver, and
//! scheduler end to end.

use std::time::{Duration, Instant};

use predicates::prelude::*;

use crate::common::TestEnv;

#[test]
fn fresh_build_then_nothing_to_do() {
  let env = TestEnv::with_rules("all: out.txt\nout.txt: in.txt\n\tcat in.txt > out.txt\n");
  env.write("in.txt", "payload\n");
  env.set_age("in.txt", 100);

  env
    .remake()
    .arg("all")
    .assert()
    .success()
    .stdout(predicate::str::contains("Building out.txt"));
  assert_eq!(env.read("out.txt"), "payload\n");

  // Nothing changed: the second run must not spawn the script again.
  env
    .remake()
    .arg("out.txt")
    .assert()
    .success()
    .stdout(predicate::str::contains("Building").not());
}

#[test]
fn default_target_used_without_arguments() {
  let env = TestEnv::with_rules("first:\n\techo hi > first\nsecond:\n\techo no > second\n");
  env.remake().assert().success();
  assert!(env.exists("first"));
  assert!(!env.exists("second"));
}

#[test]
fn pattern_rule_builds_and_records_stem_deps() {
  let env = TestEnv::with_rules("%.o: %.c\n\tcp $< $@\n");
  env.write("foo.c", "int main;\n");
  env.set_age("foo.c", 100);

  env.remake().arg("foo.o").assert().success();
  assert_eq!(env.read("foo.o"), "int main;\n");
  assert!(env.read(".remake").lines().any(|l| l == "foo.o : foo.c"));

  env
    .remake()
    .arg("foo.o")
    .assert()
    .success()
    .stdout(predicate::str::contains("Building").not());
}

#[test]
fn multi_target_siblings_rebuilt_together() {
  let env = TestEnv::with_rules("x y: src\n\ttouch x\n\ttouch y\n");
  env.write("src", "s\n");
  env.set_age("src", 100);

  env.remake().arg("x").assert().success();
  assert!(env.exists("x") && env.exists("y"));

  // Deleting one sibling obsoletes the whole group.
  std::fs::remove_file(env.path("y")).unwrap();
  env
    .remake()
    .arg("x")
    .assert()
    .success()
    .stdout(predicate::str::contains("Building x y"));
  assert!(env.exists("x") && env.exists("y"));
}

#[test]
fn variables_and_functions_expand_in_headers() {
  let env = TestEnv::with_rules(concat!(
    "NAMES = a b\n",
    "NAMES += c\n",
    "all: $(addsuffix .txt, $(NAMES))\n",
    "%.txt:\n",
    "\techo $@ > $@\n",
  ));
  env.remake().arg("all").assert().success();
  for name in ["a.txt", "b.txt", "c.txt"] {
    assert!(env.exists(name), "{name} missing");
  }
  assert_eq!(env.read("a.txt"), "a.txt\n");
}

#[test]
fn script_sees_variables_and_positional_targets() {
  let env = TestEnv::with_rules(concat!(
    "MSG = hello world\n",
    "out:\n",
    "\techo $(MSG) > $1\n",
  ));
  env.remake().arg("out").assert().success();
  assert_eq!(env.read("out"), "hello world\n");
}

#[test]
fn debug_flag_echoes_script_lines() {
  let env = TestEnv::with_rules("t:\n\ttouch t\n");
  // The shell runs with -v, so the script line lands on stderr.
  env
    .remake()
    .args(["-d", "t"])
    .assert()
    .success()
    .stderr(predicate::str::contains("touch t"));
}

#[test]
fn silent_suppresses_announcements() {
  let env = TestEnv::with_rules("t:\n\ttouch t\n");
  env
    .remake()
    .args(["-s", "t"])
    .assert()
    .success()
    .stdout(predicate::str::is_empty());
}

#[test]
fn failing_script_fails_build_and_removes_partial_output() {
  let env = TestEnv::with_rules("t:\n\techo partial > t\n\tfalse\n");
  env
    .remake()
    .arg("t")
    .assert()
    .failure()
    .stderr(predicate::str::contains("failed to build t"));
  assert!(!env.exists("t"), "partial output must be removed");
}

#[test]
fn keep_going_builds_remaining_targets() {
  let rules = "all: bad good\nbad:\n\tfalse\ngood:\n\ttouch good\n";

  // Without -k the first failure stops the request.
  let env = TestEnv::with_rules(rules);
  env.remake().arg("all").assert().failure();
  assert!(!env.exists("good"));

  // With -k the other target is still built, but the run fails.
  let env = TestEnv::with_rules(rules);
  env.remake().args(["-k", "all"]).assert().failure();
  assert!(env.exists("good"));
}

#[test]
fn missing_rule_is_reported() {
  let env = TestEnv::with_rules("known:\n\ttouch known\n");
  env
    .remake()
    .arg("unknown")
    .assert()
    .failure()
    .stderr(predicate::str::contains("no rule for building unknown"));
}

#[test]
fn recheck_downgrade_skips_unchanged_chain() {
  // e is obsolete only because of a stale recorded edge to f; its
  // script does not touch it. Once e resolves unchanged, d and c are
  // downgraded and their scripts are skipped.
  let env = TestEnv::with_rules(concat!(
    "c: d\n",
    "\tcp d c\n",
    "d: e\n",
    "\ttrue\n",
    "e:\n",
    "\ttrue\n",
  ));
  env.write(".remake", "e : f\n");
  env.write("f", "f\n");
  env.write("e", "e\n");
  env.write("d", "d\n");
  env.write("c", "c\n");
  env.set_age("e", 400);
  env.set_age("f", 300);
  env.set_age("d", 200);
  env.set_age("c", 100);

  env
    .remake()
    .arg("c")
    .assert()
    .success()
    .stdout(
      predicate::str::contains("Building e")
        .and(predicate::str::contains("Building d").not())
        .and(predicate::str::contains("Building c").not()),
    );
  assert_eq!(env.read("c"), "c\n");
}

#[test]
fn parallel_cap_limits_concurrency() {
  let env = TestEnv::with_rules(concat!(
    "all: t1 t2 t3 t4\n",
    "t1:\n\tsleep 1; touch t1\n",
    "t2:\n\tsleep 1; touch t2\n",
    "t3:\n\tsleep 1; touch t3\n",
    "t4:\n\tsleep 1; touch t4\n",
  ));
  let started = Instant::now();
  env.remake().args(["-j2", "all"]).assert().success();
  let elapsed = started.elapsed();
  assert!(elapsed >= Duration::from_millis(1900), "ran too parallel: {elapsed:?}");
  assert!(elapsed < Duration::from_millis(3900), "ran serially: {elapsed:?}");
}

#[test]
fn unbounded_jobs_run_all_at_once() {
  let env = TestEnv::with_rules(concat!(
    "all: t1 t2 t3 t4\n",
    "t1:\n\tsleep 1; touch t1\n",
    "t2:\n\tsleep 1; touch t2\n",
    "t3:\n\tsleep 1; touch t3\n",
    "t4:\n\tsleep 1; touch t4\n",
  ));
  let started = Instant::now();
  env.remake().args(["all", "-j"]).assert().success();
  let elapsed = started.elapsed();
  assert!(elapsed < Duration::from_millis(3900), "cap not lifted: {elapsed:?}");
}

#[test]
fn rule_file_regenerated_before_build() {
  let fresh_rules = concat!(
    "Remakefile: Remakefile.in\n",
    "\tcp Remakefile.in Remakefile\n",
    "hello:\n",
    "\techo new > hello\n",
  );
  let stale_rules = concat!(
    "Remakefile: Remakefile.in\n",
    "\tcp Remakefile.in Remakefile\n",
    "hello:\n",
    "\techo old > hello\n",
  );
  let env = TestEnv::with_rules(stale_rules);
  env.write("Remakefile.in", fresh_rules);
  env.set_age("Remakefile", 100);

  env.remake().arg("hello").assert().success();
  assert_eq!(env.read("Remakefile"), fresh_rules);
  assert_eq!(env.read("hello"), "new\n");
}

#[test]
fn transparent_rule_augments_pattern_rule() {
  let env = TestEnv::with_rules(concat!(
    "%.out: %.src\n",
    "\tcat $^ > $@\n",
    "a.out: extra\n",
  ));
  env.write("a.src", "src\n");
  env.write("extra", "extra\n");
  env.set_age("a.src", 100);
  env.set_age("extra", 100);

  env.remake().arg("a.out").assert().success();
  // $^ covers the substituted prerequisite plus the transparent one.
  assert_eq!(env.read("a.out"), "src\nextra\n");

  env
    .remake()
    .arg("a.out")
    .assert()
    .success()
    .stdout(predicate::str::contains("Building").not());
}
