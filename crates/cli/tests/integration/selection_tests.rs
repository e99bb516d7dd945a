//! Target selection: tags, the full-build default, and query flags.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn full_build_skips_opt_out_targets() {
  let env = TestEnv::from_fixture("tags.lua");

  env.bake().assert().success();
  assert!(env.exists("out/main.txt"));
  assert!(!env.exists("out/extra.txt"));
}

#[test]
fn explicit_tag_selects_disabled_targets() {
  let env = TestEnv::from_fixture("tags.lua");

  env.bake().arg("extras").assert().success();
  assert!(env.exists("out/extra.txt"));
  assert!(!env.exists("out/main.txt"));
}

#[test]
fn all_is_an_alias_for_full() {
  let env = TestEnv::from_fixture("tags.lua");

  env.bake().arg("all").assert().success();
  assert!(env.exists("out/main.txt"));
  assert!(!env.exists("out/extra.txt"));
}

#[test]
fn search_lists_matching_targets() {
  let env = TestEnv::from_fixture("tags.lua");

  env
    .bake()
    .args(["--search", "extra"])
    .assert()
    .success()
    .stdout(predicate::str::contains("out/extra.txt"))
    .stdout(predicate::str::contains("1 target(s)"));
  assert!(!env.exists("out/extra.txt"), "queries must not build");
}

#[test]
fn target_info_prints_details() {
  let env = TestEnv::from_fixture("tags.lua");

  env
    .bake()
    .args(["--target-info", "main"])
    .assert()
    .success()
    .stdout(predicate::str::contains("kind:     write-file"))
    .stdout(predicate::str::contains("tags:"));
}

#[test]
fn selecting_by_output_path_builds_one_target() {
  let env = TestEnv::from_fixture("tags.lua");

  env
    .bake()
    .arg("out/main.txt")
    .assert()
    .success()
    .stdout(predicate::str::contains("1 built"));
  assert!(!env.exists("out/extra.txt"));
}

#[test]
fn worker_env_bounds_are_respected() {
  let env = TestEnv::from_fixture("tags.lua");

  env
    .bake()
    .env("BAKELUA_WORKERS_PER_CPU", "2.0")
    .env("BAKELUA_MAX_WORKERS", "1")
    .assert()
    .success();
  assert!(env.exists("out/main.txt"));
}

#[test]
fn find_target_is_a_literal_substring_lookup() {
  let env = TestEnv::from_fixture("tags.lua");

  env
    .bake()
    .args(["--find-target", "main.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("out/main.txt"))
    .stdout(predicate::str::contains("1 target(s)"));

  // dots are plain characters here, not regex wildcards
  env
    .bake()
    .args(["--find-target", "ma.n.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No targets match"));
}

#[test]
fn search_accepts_anchored_regex() {
  let env = TestEnv::from_fixture("tags.lua");

  env
    .bake()
    .args(["--search", ".*/out/main\\.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("out/main.txt"))
    .stdout(predicate::str::contains("1 target(s)"));
}
