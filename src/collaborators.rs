//! Collaborator seams around the core engine.
//!
//! The engine consumes four external collaborators: a sequencer (candidate
//! files in, ordered schedule out), a result cache (per-file status and
//! duration persisted between runs), a reporter (a pure sink for result
//! records), and a coverage collector (notified per real-module
//! evaluation; its payload rides on the result record). Each is a trait
//! with a built-in default so the CLI works out of the box.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::results::{AggregateSummary, TestResultRecord};

// ============================================================================
// SEQUENCING
// ============================================================================

/// One entry of the run schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledFile {
    pub path: PathBuf,
    /// Duration of the last recorded run, when known.
    pub duration_hint: Option<u64>,
}

/// Orders candidate test files; consulted once per run, before any file
/// enters its sandbox.
pub trait TestSequencer {
    fn order(&self, candidates: Vec<PathBuf>) -> Vec<ScheduledFile>;
}

/// Prior outcome of one file, persisted between runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriorRun {
    pub failed: bool,
    pub duration_ms: u64,
}

/// Flat path-to-metadata map: the persisted shape of the timing cache.
pub type TimingData = HashMap<PathBuf, PriorRun>;

/// Default sequencer: previously failed files first, then files with no
/// timing data, then slowest-known first, then largest-file first. Files
/// with no prior data and equal rank keep their input order (stable sort).
pub struct CacheSequencer {
    timings: TimingData,
}

impl CacheSequencer {
    pub fn new(timings: TimingData) -> Self {
        Self { timings }
    }
}

impl TestSequencer for CacheSequencer {
    fn order(&self, mut candidates: Vec<PathBuf>) -> Vec<ScheduledFile> {
        let sizes: HashMap<PathBuf, u64> = candidates
            .iter()
            .map(|p| (p.clone(), file_size(p)))
            .collect();
        let failed = |p: &PathBuf| self.timings.get(p).map(|r| r.failed).unwrap_or(false);
        let time = |p: &PathBuf| self.timings.get(p).map(|r| r.duration_ms);

        candidates.sort_by(|a, b| {
            use std::cmp::Ordering;
            match (failed(a), failed(b)) {
                (true, false) => return Ordering::Less,
                (false, true) => return Ordering::Greater,
                _ => {}
            }
            match (time(a), time(b)) {
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (Some(ta), Some(tb)) => tb.cmp(&ta),
                (None, None) => {
                    let (sa, sb) = (sizes.get(a), sizes.get(b));
                    sb.cmp(&sa)
                }
            }
        });

        candidates
            .into_iter()
            .map(|path| {
                let duration_hint = time(&path);
                ScheduledFile {
                    path,
                    duration_hint,
                }
            })
            .collect()
    }
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

// ============================================================================
// RESULT CACHE
// ============================================================================

/// Persists per-file (status, duration) pairs for future sequencing.
pub trait ResultCache {
    fn load(&self) -> TimingData;
    /// Best-effort; returns false when nothing could be written.
    fn persist(&self, records: &[TestResultRecord]) -> bool;
}

/// JSON-file cache keyed externally by the run fingerprint. Corruption or
/// absence degrades to an empty map, never to an error.
pub struct JsonResultCache {
    path: Option<PathBuf>,
}

impl JsonResultCache {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ResultCache for JsonResultCache {
    fn load(&self) -> TimingData {
        let Some(path) = self.path.as_deref() else {
            return TimingData::new();
        };
        std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    fn persist(&self, records: &[TestResultRecord]) -> bool {
        let Some(path) = self.path.as_deref() else {
            return false;
        };
        let mut data = self.load();
        for record in records {
            data.insert(
                record.test_file_path.clone(),
                PriorRun {
                    failed: record.failed(),
                    duration_ms: record.perf_stats.duration_ms(),
                },
            );
        }
        if let Some(dir) = path.parent() {
            if std::fs::create_dir_all(dir).is_err() {
                return false;
            }
        }
        match serde_json::to_string(&data) {
            Ok(text) => std::fs::write(path, text).is_ok(),
            Err(_) => false,
        }
    }
}

// ============================================================================
// REPORTING
// ============================================================================

/// A pure sink for result records; the core consumes no return value.
pub trait Reporter {
    fn on_result(&mut self, record: &TestResultRecord);
    fn on_complete(&mut self, summary: &AggregateSummary);
}

/// Reporter that keeps nothing and prints nothing; useful as a default in
/// embedding scenarios and tests.
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn on_result(&mut self, _record: &TestResultRecord) {}
    fn on_complete(&mut self, _summary: &AggregateSummary) {}
}

// ============================================================================
// COVERAGE
// ============================================================================

/// Consulted by the registry as real modules finish evaluating. The
/// engine's only obligation is to attach whatever payload the collector
/// produces to the file's result record.
pub trait CoverageCollector {
    fn on_module_evaluated(&self, path: &Path, source: &str);
    fn take_payload(&self) -> Option<serde_json::Value>;
}

/// Default collector: records which module files were evaluated during
/// the run, with their source line counts.
#[derive(Debug, Default)]
pub struct EvaluatedModulesCollector {
    evaluated: RefCell<Vec<(PathBuf, usize)>>,
}

impl EvaluatedModulesCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CoverageCollector for EvaluatedModulesCollector {
    fn on_module_evaluated(&self, path: &Path, source: &str) {
        self.evaluated
            .borrow_mut()
            .push((path.to_path_buf(), source.lines().count()));
    }

    fn take_payload(&self) -> Option<serde_json::Value> {
        let evaluated = std::mem::take(&mut *self.evaluated.borrow_mut());
        if evaluated.is_empty() {
            return None;
        }
        let files: serde_json::Map<String, serde_json::Value> = evaluated
            .into_iter()
            .map(|(path, lines)| {
                (
                    path.to_string_lossy().to_string(),
                    serde_json::json!({ "lines": lines }),
                )
            })
            .collect();
        Some(serde_json::Value::Object(files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings(entries: &[(&str, bool, u64)]) -> TimingData {
        entries
            .iter()
            .map(|(p, failed, d)| {
                (
                    PathBuf::from(p),
                    PriorRun {
                        failed: *failed,
                        duration_ms: *d,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn failed_files_sort_first() {
        let sequencer = CacheSequencer::new(timings(&[
            ("/r/slow.test.yaml", false, 900),
            ("/r/broken.test.yaml", true, 5),
        ]));
        let order = sequencer.order(vec![
            PathBuf::from("/r/slow.test.yaml"),
            PathBuf::from("/r/broken.test.yaml"),
        ]);
        assert_eq!(order[0].path, PathBuf::from("/r/broken.test.yaml"));
        assert_eq!(order[0].duration_hint, Some(5));
    }

    #[test]
    fn untimed_files_run_before_timed_ones() {
        let sequencer = CacheSequencer::new(timings(&[("/r/known.test.yaml", false, 100)]));
        let order = sequencer.order(vec![
            PathBuf::from("/r/known.test.yaml"),
            PathBuf::from("/r/new.test.yaml"),
        ]);
        assert_eq!(order[0].path, PathBuf::from("/r/new.test.yaml"));
        assert_eq!(order[0].duration_hint, None);
    }

    #[test]
    fn slowest_known_files_run_first() {
        let sequencer = CacheSequencer::new(timings(&[
            ("/r/fast.test.yaml", false, 10),
            ("/r/slow.test.yaml", false, 500),
        ]));
        let order = sequencer.order(vec![
            PathBuf::from("/r/fast.test.yaml"),
            PathBuf::from("/r/slow.test.yaml"),
        ]);
        assert_eq!(order[0].path, PathBuf::from("/r/slow.test.yaml"));
    }

    #[test]
    fn no_prior_data_preserves_input_order() {
        // Nonexistent paths have equal (zero) size, so the comparator
        // returns Equal and the stable sort keeps the input order.
        let sequencer = CacheSequencer::new(TimingData::new());
        let order = sequencer.order(vec![
            PathBuf::from("/r/first.test.yaml"),
            PathBuf::from("/r/second.test.yaml"),
        ]);
        assert_eq!(order[0].path, PathBuf::from("/r/first.test.yaml"));
        assert_eq!(order[1].path, PathBuf::from("/r/second.test.yaml"));
    }

    #[test]
    fn missing_result_cache_loads_empty() {
        let cache = JsonResultCache::new(Some(PathBuf::from("/nonexistent/dir/cache.json")));
        assert!(cache.load().is_empty());
    }

    #[test]
    fn coverage_payload_lists_evaluated_modules() {
        let collector = EvaluatedModulesCollector::new();
        collector.on_module_evaluated(Path::new("/r/A.module.yaml"), "a: 1\nb: 2\n");
        let payload = collector.take_payload().unwrap();
        assert!(payload.get("/r/A.module.yaml").is_some());
        // Payload is drained on hand-off.
        assert!(collector.take_payload().is_none());
    }
}
