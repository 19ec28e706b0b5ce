//! The per-file driver: sandbox + registry composed for one test file.
//!
//! `run_file` walks the `Created → Executing → Disposed` lifecycle: it
//! allocates a fresh sandbox and registry, optionally loads the configured
//! setup script through the registry, hands control to the test-runner
//! collaborator, and brackets the executing phase with timestamps. The
//! result record is built after disposal has run; disposal executes on
//! both the success and the failure path, exactly once per file, and a
//! captured execution error never skips it.
//!
//! Memory sampling is an optional diagnostic taken after disposal; a
//! failed sample degrades to `None` and never fails the run.

use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::collaborators::{CoverageCollector, Reporter, ScheduledFile};
use crate::config::EngineConfig;
use crate::diagnostics::EngineError;
use crate::evaluate::{ModuleEvaluator, YamlEvaluator};
use crate::index::ResourceIndex;
use crate::registry::ModuleRegistry;
use crate::results::{
    AggregateSummary, AssertionRecord, AssertionStatus, ExecError, PerfStats, TestResultRecord,
};
use crate::runner::{DeclarativeRunner, RunnerContext, TestRunner};
use crate::sandbox::SandboxEnvironment;
use crate::value::Value;

/// Drives test files end-to-end, one isolated environment per file.
pub struct TestOrchestrator {
    config: Arc<EngineConfig>,
    index: Arc<ResourceIndex>,
    evaluator: Rc<dyn ModuleEvaluator>,
    runner: Rc<dyn TestRunner>,
    coverage: Option<Rc<dyn CoverageCollector>>,
}

impl TestOrchestrator {
    pub fn new(config: Arc<EngineConfig>, index: Arc<ResourceIndex>) -> Self {
        Self {
            config,
            index,
            evaluator: Rc::new(YamlEvaluator::new()),
            runner: Rc::new(DeclarativeRunner::new()),
            coverage: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Rc<dyn ModuleEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_runner(mut self, runner: Rc<dyn TestRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_coverage(mut self, coverage: Rc<dyn CoverageCollector>) -> Self {
        self.coverage = Some(coverage);
        self
    }

    /// Runs one test file to completion and produces its result record.
    pub fn run_file(&self, path: &Path) -> TestResultRecord {
        let path = crate::index::canonical(path);
        let mut sandbox = SandboxEnvironment::new();
        sandbox.set_global(
            "testFilePath",
            Value::String(path.display().to_string()),
        );

        let registry = ModuleRegistry::new(
            Arc::clone(&self.index),
            Arc::clone(&self.config),
            Rc::clone(&self.evaluator),
        );
        let mut registry = match registry {
            Ok(registry) => match &self.coverage {
                Some(coverage) => registry.with_coverage(Rc::clone(coverage)),
                None => registry,
            },
            Err(err) => {
                sandbox.dispose();
                return self.error_record(&path, PerfStats::default(), Vec::new(), err);
            }
        };

        let start_ms = now_millis();
        let outcome = self.execute(&mut sandbox, &mut registry, &path);
        let perf_stats = PerfStats {
            start_ms,
            end_ms: now_millis(),
        };

        // Guaranteed-cleanup path: console capture is taken, then the
        // environment and registry are torn down whatever the outcome was.
        let console_output = sandbox.console_lines().to_vec();
        sandbox.dispose();
        registry.clear();

        let memory_usage = if self.config.log_heap_usage {
            sample_resident_memory()
        } else {
            None
        };
        let coverage = self.coverage.as_ref().and_then(|c| c.take_payload());

        match outcome {
            Ok(assertions) => {
                let num_passing = assertions
                    .iter()
                    .filter(|a| a.status == AssertionStatus::Passed)
                    .count();
                let num_failing = assertions.len() - num_passing;
                TestResultRecord {
                    test_file_path: path,
                    assertions,
                    num_passing,
                    num_failing,
                    perf_stats,
                    console_output,
                    memory_usage,
                    coverage,
                    exec_error: None,
                }
            }
            Err(err) => {
                let mut record = self.error_record(&path, perf_stats, console_output, err);
                record.memory_usage = memory_usage;
                record.coverage = coverage;
                record
            }
        }
    }

    fn execute(
        &self,
        sandbox: &mut SandboxEnvironment,
        registry: &mut ModuleRegistry,
        path: &Path,
    ) -> Result<Vec<AssertionRecord>, EngineError> {
        sandbox.begin_execution()?;
        if let Some(setup) = &self.config.setup_script {
            registry
                .require_module(sandbox, path, setup)
                .map_err(|e| EngineError::setup(e))?;
        }
        let mut ctx = RunnerContext {
            registry,
            sandbox,
            path,
        };
        self.runner.run(&mut ctx)
    }

    fn error_record(
        &self,
        path: &Path,
        perf_stats: PerfStats,
        console_output: Vec<String>,
        err: EngineError,
    ) -> TestResultRecord {
        TestResultRecord {
            test_file_path: path.to_path_buf(),
            assertions: Vec::new(),
            num_passing: 0,
            num_failing: 0,
            perf_stats,
            console_output,
            memory_usage: None,
            coverage: None,
            exec_error: Some(ExecError {
                message: err.to_string(),
                code: err.error_code().to_string(),
            }),
        }
    }

    /// Runs a pre-sequenced schedule, streaming each record to the
    /// reporter and returning all records plus the run summary.
    pub fn run_suite(
        &self,
        schedule: &[ScheduledFile],
        reporter: &mut dyn Reporter,
    ) -> (Vec<TestResultRecord>, AggregateSummary) {
        let start_time_ms = now_millis();
        let mut records = Vec::with_capacity(schedule.len());
        for scheduled in schedule {
            let record = self.run_file(&scheduled.path);
            reporter.on_result(&record);
            records.push(record);
        }
        let summary = AggregateSummary::collect(&records, start_time_ms);
        reporter.on_complete(&summary);
        (records, summary)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// Resident-set sample from /proc; anything unexpected degrades to None.
#[cfg(target_os = "linux")]
fn sample_resident_memory() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn sample_resident_memory() -> Option<u64> {
    None
}
