//! End-to-end tests running the minimake binary against real build files.
#![cfg(unix)]

use std::fs;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

fn minimake() -> Command {
    let mut command = Command::cargo_bin("minimake").unwrap();
    command.env_remove("MINIMAKE_FILE").env_remove("RUST_LOG");
    command
}

/// A scratch directory holding a `Makefile` with `contents`.
fn project(contents: &str) -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("Makefile"), contents).unwrap();
    tmp
}

#[test]
fn test_builds_prerequisites_first() {
    let tmp = project("A: B\n\techo hi\nB:\n\techo bye\n");

    minimake()
        .arg("A")
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout("echo bye\nbye\necho hi\nhi\n");
}

#[test]
fn test_default_goal_and_recipe_tokens() {
    let tmp = project("out.txt: in.txt\n\t@cp $< $@\n\nin.txt:\n\t@echo data > $@\n");

    minimake()
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout("");

    assert_eq!(fs::read_to_string(tmp.path().join("out.txt")).unwrap(), "data\n");
}

#[test]
fn test_dry_run() {
    let tmp = project("all:\n\ttouch built\n\t@touch hidden\n");

    minimake()
        .arg("-n")
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout("touch built\n");

    assert!(!tmp.path().join("built").exists());
    assert!(!tmp.path().join("hidden").exists());
}

#[test]
fn test_list_targets() {
    let tmp = project("b:\n\techo b\na c: b\n\techo $@\n");

    minimake()
        .arg("--targets")
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout("\nAvailable targets:\n    a\n    b\n    c\n");
}

#[test]
fn test_variables_and_shell() {
    let tmp = project("NAME = $(shell echo world)\nGREETING := hello $(NAME)\nall:\n\t@echo $(GREETING)\n");

    minimake()
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout("hello world\n");
}

#[test]
fn test_environment_overrides() {
    let tmp = project("WHO = file\nall:\n\t@echo $(WHO)\n");

    minimake()
        .env("WHO", "env")
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout("file\n");

    minimake()
        .arg("-e")
        .env("WHO", "env")
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout("env\n");
}

#[test]
fn test_failing_recipe_stops() {
    let tmp = project("all:\n\tfalse\n\techo after\n");

    minimake()
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stdout("false\n")
        .stderr(predicate::str::contains("`false` failed with exit status 1"));
}

#[test]
fn test_ignored_failures() {
    let tmp = project("all:\n\t-false\n\t@echo after\n");

    minimake()
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout("false\nafter\n");

    let tmp = project("all:\n\tfalse\n\t@echo after\n");

    minimake()
        .arg("-i")
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout("false\nafter\n");
}

#[test]
fn test_keep_going() {
    let tmp = project("bad:\n\t@false\ngood:\n\t@echo good\n");

    minimake()
        .args(["bad", "good"])
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stdout("");

    minimake()
        .args(["-k", "bad", "good"])
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stdout("good\n")
        .stderr(predicate::str::contains("1 of 2 goals failed"));
}

#[test]
fn test_unknown_target() {
    let tmp = project("all:\n\techo all\n");

    minimake()
        .arg("nope")
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown target \"nope\""));
}

#[test]
fn test_syntax_error() {
    let tmp = project("X = 1\n\techo stray\n");

    minimake()
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "unexpected indentation near \"\\techo stray\" (line 2)",
        ));
}

#[test]
fn test_build_file_option() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("build.mk"), "all:\n\t@echo from build.mk\n").unwrap();

    minimake()
        .args(["-f", "build.mk"])
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout("from build.mk\n");

    minimake()
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read Makefile"));
}
