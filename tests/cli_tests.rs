//! CLI regression tests: end-to-end runs through the binary, rendered
//! diagnostics, and exit codes.

use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;

#[test]
fn run_reports_pass_and_fail_and_exits_nonzero() {
    let mut cmd = Command::cargo_bin("understudy").unwrap();
    cmd.args(["run", "--root", "tests/fixtures/cli_root", "--no-cache"]);
    cmd.assert()
        .failure()
        .stdout(
            contains("PASS")
                .and(contains("FAIL"))
                .and(contains("Files: 2 total"))
                .and(contains("console: greeting the world")),
        );
}

#[test]
fn run_with_a_filter_only_executes_matching_files() {
    let mut cmd = Command::cargo_bin("understudy").unwrap();
    cmd.args([
        "run",
        "--root",
        "tests/fixtures/cli_root",
        "--no-cache",
        "pass",
    ]);
    cmd.assert()
        .success()
        .stdout(contains("Files: 1 total").and(contains("PASS")));
}

#[test]
fn index_lists_modules_and_substitutes() {
    let mut cmd = Command::cargo_bin("understudy").unwrap();
    cmd.args(["index", "--root", "tests/fixtures/root"]);
    cmd.assert().success().stdout(
        contains("RegularModule")
            .and(contains("ManuallyMocked"))
            .and(contains("[substitute]")),
    );
}

#[test]
fn duplicate_module_names_render_miette_diagnostics() {
    let mut cmd = Command::cargo_bin("understudy").unwrap();
    cmd.args(["index", "--root", "tests/fixtures/dup_root"]);
    cmd.assert()
        .failure()
        .stderr(contains("understudy::index::duplicate_name").or(contains("duplicate module name")));
}

#[test]
fn sequence_lists_candidates_with_hints() {
    let mut cmd = Command::cargo_bin("understudy").unwrap();
    cmd.args(["sequence", "--root", "tests/fixtures/cli_root"]);
    cmd.assert()
        .success()
        .stdout(contains("pass.test.yaml").and(contains("no prior data")));
}
