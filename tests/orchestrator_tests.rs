//! Orchestrator behavior: end-to-end file runs, setup scripts, execution
//! errors, coverage hand-off, and suite aggregation.

mod common;

use std::rc::Rc;

use common::*;
use understudy::collaborators::{EvaluatedModulesCollector, NullReporter, ScheduledFile};
use understudy::orchestrator::TestOrchestrator;

fn orchestrator(config: understudy::config::EngineConfig) -> TestOrchestrator {
    let (config, index) = engine(config);
    TestOrchestrator::new(config, index)
}

#[test]
fn the_root_file_passes_every_assertion() {
    let record = orchestrator(default_config()).run_file(&fixture_path("root.test.yaml"));

    assert!(
        record.exec_error.is_none(),
        "unexpected execution error: {:?}",
        record.exec_error
    );
    assert_eq!(record.num_failing, 0, "failures: {:?}", record.assertions);
    assert_eq!(record.num_passing, 8);
    assert!(record.perf_stats.end_ms >= record.perf_stats.start_ms);
    assert!(record
        .console_output
        .iter()
        .any(|line| line.contains("building the root module graph")));
}

#[test]
fn failing_assertions_are_recorded_without_failing_the_rest() {
    let record = orchestrator(default_config()).run_file(&fixture_path("failing.test.yaml"));

    assert!(record.exec_error.is_none());
    assert_eq!(record.num_passing, 1);
    assert_eq!(record.num_failing, 1);
    let failed = record
        .assertions
        .iter()
        .find(|a| a.failure_message.is_some())
        .unwrap();
    assert!(failed.failure_message.as_ref().unwrap().contains("value mismatch"));
}

#[test]
fn an_unresolvable_dependency_is_an_execution_error_not_an_assertion() {
    let record = orchestrator(default_config()).run_file(&fixture_path("execerror.test.yaml"));

    let error = record.exec_error.as_ref().expect("expected an exec error");
    assert_eq!(error.code, "understudy::resolve::not_found");
    assert!(error.message.contains("DefinitelyMissingModule"));
    assert!(record.assertions.is_empty());
    assert!(record.failed());
}

#[test]
fn name_mapped_requires_run_through_the_same_pipeline() {
    let record = orchestrator(mapping_config()).run_file(&fixture_path("mapping.test.yaml"));
    assert!(record.exec_error.is_none(), "{:?}", record.exec_error);
    assert_eq!(record.num_failing, 0, "failures: {:?}", record.assertions);
    assert_eq!(record.num_passing, 3);
}

#[test]
fn automock_can_be_disabled_for_a_whole_file() {
    let record = orchestrator(default_config()).run_file(&fixture_path("automock-off.test.yaml"));
    assert!(record.exec_error.is_none(), "{:?}", record.exec_error);
    assert_eq!(record.num_failing, 0, "failures: {:?}", record.assertions);
    assert_eq!(record.num_passing, 3);
}

#[test]
fn failing_getters_degrade_during_mock_collection() {
    let record = orchestrator(default_config()).run_file(&fixture_path("getter.test.yaml"));
    assert!(record.exec_error.is_none(), "{:?}", record.exec_error);
    assert_eq!(record.num_failing, 0, "failures: {:?}", record.assertions);
    assert_eq!(record.num_passing, 2);
}

#[test]
fn the_setup_script_runs_through_the_registry_before_the_file() {
    let mut config = default_config();
    config.setup_script = Some("SetupEnv".to_string());

    let record = orchestrator(config).run_file(&fixture_path("setup.test.yaml"));
    assert!(record.exec_error.is_none(), "{:?}", record.exec_error);
    assert_eq!(record.num_passing, 1);
    assert!(record
        .console_output
        .iter()
        .any(|line| line.contains("setup environment loaded")));
}

#[test]
fn a_failing_setup_script_fails_the_file_immediately() {
    let mut config = default_config();
    config.setup_script = Some("NoSuchSetup".to_string());

    let record = orchestrator(config).run_file(&fixture_path("root.test.yaml"));
    let error = record.exec_error.as_ref().expect("expected a setup error");
    assert_eq!(error.code, "understudy::orchestrator::setup");
    assert!(error.message.contains("NoSuchSetup"));
    assert!(record.assertions.is_empty());
}

#[test]
fn coverage_payload_rides_on_the_result_record() {
    let record = orchestrator(default_config())
        .with_coverage(Rc::new(EvaluatedModulesCollector::new()))
        .run_file(&fixture_path("root.test.yaml"));

    let payload = record.coverage.as_ref().expect("expected coverage");
    let object = payload.as_object().unwrap();
    assert!(object
        .keys()
        .any(|key| key.ends_with("RegularModule.module.yaml")));
}

#[test]
fn heap_sampling_is_taken_after_disposal_when_enabled() {
    let mut config = default_config();
    config.log_heap_usage = true;

    let record = orchestrator(config).run_file(&fixture_path("root.test.yaml"));
    if cfg!(target_os = "linux") {
        assert!(record.memory_usage.is_some());
    }
}

struct StateProbe {
    seen: Rc<std::cell::RefCell<Option<understudy::sandbox::SandboxState>>>,
}

impl understudy::runner::TestRunner for StateProbe {
    fn run(
        &self,
        ctx: &mut understudy::runner::RunnerContext<'_>,
    ) -> Result<Vec<understudy::results::AssertionRecord>, understudy::EngineError> {
        *self.seen.borrow_mut() = Some(ctx.sandbox.state());
        Ok(Vec::new())
    }
}

#[test]
fn the_sandbox_is_executing_while_the_runner_runs() {
    let seen = Rc::new(std::cell::RefCell::new(None));
    let probe = StateProbe {
        seen: Rc::clone(&seen),
    };
    let record = orchestrator(default_config())
        .with_runner(Rc::new(probe))
        .run_file(&fixture_path("root.test.yaml"));

    assert!(record.exec_error.is_none());
    assert_eq!(
        *seen.borrow(),
        Some(understudy::sandbox::SandboxState::Executing)
    );
}

struct ExplodingRunner;

impl understudy::runner::TestRunner for ExplodingRunner {
    fn run(
        &self,
        _ctx: &mut understudy::runner::RunnerContext<'_>,
    ) -> Result<Vec<understudy::results::AssertionRecord>, understudy::EngineError> {
        Err(understudy::EngineError::evaluation("runner", "collection blew up"))
    }
}

#[test]
fn a_runner_failure_still_produces_a_result_record() {
    // The guaranteed-cleanup path runs on the failure branch too; the
    // error is captured on the record instead of escaping.
    let record = orchestrator(default_config())
        .with_runner(Rc::new(ExplodingRunner))
        .run_file(&fixture_path("root.test.yaml"));

    let error = record.exec_error.as_ref().unwrap();
    assert!(error.message.contains("collection blew up"));
    assert!(record.assertions.is_empty());
}

#[test]
fn run_suite_streams_records_and_aggregates() {
    let schedule = vec![
        ScheduledFile {
            path: fixture_path("root.test.yaml"),
            duration_hint: None,
        },
        ScheduledFile {
            path: fixture_path("failing.test.yaml"),
            duration_hint: None,
        },
    ];

    let mut reporter = NullReporter;
    let (records, summary) =
        orchestrator(default_config()).run_suite(&schedule, &mut reporter);

    assert_eq!(records.len(), 2);
    assert_eq!(summary.num_total_files, 2);
    assert_eq!(summary.num_passed_files, 1);
    assert_eq!(summary.num_failed_files, 1);
    assert_eq!(summary.num_exec_error_files, 0);
    assert!(!summary.success);
}
