//! Build command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn copy_builds_declared_outputs() {
  let env = TestEnv::from_fixture("copy_basic.lua");
  env.write("a.txt", "hello");
  env.write("b.txt", "world");

  env
    .bake()
    .assert()
    .success()
    .stdout(predicate::str::contains("Build complete"));

  assert_eq!(env.read("out/dir/a.txt"), "hello");
  assert_eq!(env.read("out/dir/b.txt"), "world");
}

#[test]
fn cycle_fails_before_any_worker_starts() {
  let env = TestEnv::from_fixture("cycle.lua");

  env
    .bake()
    .assert()
    .failure()
    .code(2)
    .stderr(predicate::str::contains("cyclic dependency"));

  assert!(!env.exists("out/x.txt"));
  assert!(!env.exists("out/y.txt"));
}

#[test]
fn generated_directory_chains_through_its_producer() {
  let env = TestEnv::from_fixture("generated_dir.lua");
  env.write("seed.txt", "seed");

  env.bake().assert().success();
  assert!(env.exists("out/gen/seed.txt"));
  assert!(env.exists("out/bundle.tar"));
}

#[test]
fn properties_expand_into_target_names_and_content() {
  let env = TestEnv::from_fixture("properties.lua");

  env.bake().assert().success();
  assert!(env.read("out/demo-info.txt").contains("name=demo"));
}

#[test]
fn property_override_from_the_command_line() {
  let env = TestEnv::from_fixture("properties.lua");

  env.bake().arg("APP_NAME=other").assert().success();
  assert!(env.exists("out/other-info.txt"));
  assert!(!env.exists("out/demo-info.txt"));
}

#[test]
fn failing_target_exits_with_build_error_code() {
  let env = TestEnv::from_fixture("bad_copy.lua");
  env.write("a.txt", "a");
  env.write("b.txt", "b");

  env
    .bake()
    .assert()
    .failure()
    .code(1)
    .stdout(predicate::str::contains("Build FAILED"));
}

#[test]
fn dry_run_reports_without_writing() {
  let env = TestEnv::from_fixture("copy_basic.lua");
  env.write("a.txt", "hello");
  env.write("b.txt", "world");

  env
    .bake()
    .arg("--dry-run")
    .assert()
    .success()
    .stdout(predicate::str::contains("would build"));

  assert!(!env.exists("out/dir/a.txt"));
}

#[test]
fn json_format_emits_machine_readable_report() {
  let env = TestEnv::from_fixture("copy_basic.lua");
  env.write("a.txt", "hello");
  env.write("b.txt", "world");

  let output = env.bake().args(["-F", "json"]).assert().success();
  let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
  let json_start = stdout.find('{').expect("json object in output");
  let value: serde_json::Value = serde_json::from_str(stdout[json_start..].trim()).unwrap();
  assert_eq!(value["success"], serde_json::Value::Bool(true));
  assert_eq!(value["built"].as_array().unwrap().len(), 1);
}
