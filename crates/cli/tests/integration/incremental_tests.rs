//! Incremental behavior through the binary: no-op second runs, selective
//! rebuilds, --rebuild and --rebuild-ignore-deps.

use std::time::Duration;

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn second_run_executes_nothing() {
  let env = TestEnv::from_fixture("copy_basic.lua");
  env.write("a.txt", "hello");
  env.write("b.txt", "world");

  env
    .bake()
    .assert()
    .success()
    .stdout(predicate::str::contains("1 built"));

  env
    .bake()
    .assert()
    .success()
    .stdout(predicate::str::contains("0 built"))
    .stdout(predicate::str::contains("1 up to date"));
}

#[test]
fn modified_input_rebuilds_only_dependents() {
  let env = TestEnv::from_fixture("copy_basic.lua");
  env.write("a.txt", "hello");
  env.write("b.txt", "world");

  env.bake().assert().success();
  assert_eq!(env.read("out/dir/a.txt"), "hello");

  std::thread::sleep(Duration::from_millis(20));
  env.write("a.txt", "HELLO");

  env
    .bake()
    .assert()
    .success()
    .stdout(predicate::str::contains("1 built"));
  assert_eq!(env.read("out/dir/a.txt"), "HELLO");
  assert_eq!(env.read("out/dir/b.txt"), "world");
}

#[test]
fn deleted_output_rebuilds() {
  let env = TestEnv::from_fixture("copy_basic.lua");
  env.write("a.txt", "hello");
  env.write("b.txt", "world");

  env.bake().assert().success();
  std::fs::remove_dir_all(env.root().join("out/dir")).unwrap();

  env
    .bake()
    .assert()
    .success()
    .stdout(predicate::str::contains("1 built"));
  assert_eq!(env.read("out/dir/a.txt"), "hello");
}

#[test]
fn rebuild_forces_clean_and_build() {
  let env = TestEnv::from_fixture("copy_basic.lua");
  env.write("a.txt", "hello");
  env.write("b.txt", "world");

  env.bake().assert().success();
  env
    .bake()
    .arg("--rebuild")
    .assert()
    .success()
    .stdout(predicate::str::contains("1 built"));
}

#[test]
fn rebuild_ignore_deps_alias_works() {
  let env = TestEnv::from_fixture("copy_basic.lua");
  env.write("a.txt", "hello");
  env.write("b.txt", "world");

  env.bake().assert().success();
  env
    .bake()
    .args(["--rid", "out/dir/"])
    .assert()
    .success()
    .stdout(predicate::str::contains("1 built"));
}

#[test]
fn change_under_generated_dir_rebuilds_the_archive() {
  let env = TestEnv::from_fixture("generated_dir.lua");
  env.write("seed.txt", "one");

  env.bake().assert().success();

  std::thread::sleep(Duration::from_millis(20));
  env.write("seed.txt", "two");

  // the copy target rebuilds, which refreshes its stamp, which makes the
  // archive out of date
  env
    .bake()
    .assert()
    .success()
    .stdout(predicate::str::contains("2 built"));
}
