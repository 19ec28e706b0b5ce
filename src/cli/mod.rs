//! The Understudy command-line interface.
//!
//! This module is the main entry point for all CLI commands and
//! orchestrates the core library: config loading, index construction,
//! test discovery, sequencing, execution, and result persistence.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use miette::Report;

use crate::cli::args::{Command, UnderstudyArgs};
use crate::cli::output::TerminalReporter;
use crate::collaborators::{
    CacheSequencer, EvaluatedModulesCollector, JsonResultCache, ResultCache, TestSequencer,
};
use crate::config::EngineConfig;
use crate::diagnostics::EngineError;
use crate::orchestrator::TestOrchestrator;

pub mod args;
pub mod output;

/// The main entry point for the CLI.
pub fn run() {
    let args = UnderstudyArgs::parse();

    let result = match args.command {
        Command::Run {
            config,
            root,
            filter,
            no_cache,
            heap,
        } => handle_run(config, root, filter, no_cache, heap),
        Command::Index { config, root } => handle_index(config, root),
        Command::Sequence { config, root } => handle_sequence(config, root),
    };

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(err) => {
            eprintln!("{:?}", Report::new(err));
            process::exit(1);
        }
    }
}

// Loads configuration from a file or falls back to defaults, applying CLI
// overrides on top.
fn load_config(
    config_path: Option<PathBuf>,
    root: Option<PathBuf>,
) -> Result<EngineConfig, EngineError> {
    let mut config = match config_path {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };
    if let Some(root) = root {
        config.root_dir = root;
    }
    Ok(config)
}

/// Handles the `run` subcommand.
fn handle_run(
    config_path: Option<PathBuf>,
    root: Option<PathBuf>,
    filter: Option<String>,
    no_cache: bool,
    heap: bool,
) -> Result<i32, EngineError> {
    let mut config = load_config(config_path, root)?;
    if no_cache {
        config.use_cache = false;
    }
    if heap {
        config.log_heap_usage = true;
    }

    let index = crate::index::shared(&config)?;
    let mut candidates = config.discover_test_files()?;
    if let Some(filter) = &filter {
        candidates.retain(|p| p.to_string_lossy().contains(filter.as_str()));
    }
    if candidates.is_empty() {
        println!("No test files found under {}", config.root_dir.display());
        return Ok(0);
    }

    let result_cache = JsonResultCache::new(config.cache_file("timings"));
    let sequencer = CacheSequencer::new(result_cache.load());
    let schedule = sequencer.order(candidates);

    let config = Arc::new(config);
    let orchestrator = TestOrchestrator::new(Arc::clone(&config), index)
        .with_coverage(std::rc::Rc::new(EvaluatedModulesCollector::new()));

    let mut reporter = TerminalReporter::new();
    let (records, summary) = orchestrator.run_suite(&schedule, &mut reporter);

    result_cache.persist(&records);
    Ok(if summary.success { 0 } else { 1 })
}

/// Handles the `index` subcommand.
fn handle_index(config_path: Option<PathBuf>, root: Option<PathBuf>) -> Result<i32, EngineError> {
    let config = load_config(config_path, root)?;
    let index = crate::index::shared(&config)?;

    println!(
        "{} modules, {} manual substitutes (fingerprint {})",
        index.module_count(),
        index.substitute_count(),
        index.fingerprint()
    );
    for (name, path, is_substitute) in index.entries() {
        let marker = if is_substitute { " [substitute]" } else { "" };
        println!("  {}{} -> {}", name, marker, path.display());
    }
    Ok(0)
}

/// Handles the `sequence` subcommand.
fn handle_sequence(
    config_path: Option<PathBuf>,
    root: Option<PathBuf>,
) -> Result<i32, EngineError> {
    let config = load_config(config_path, root)?;
    let candidates = config.discover_test_files()?;

    let result_cache = JsonResultCache::new(config.cache_file("timings"));
    let sequencer = CacheSequencer::new(result_cache.load());
    for scheduled in sequencer.order(candidates) {
        match scheduled.duration_hint {
            Some(ms) => println!("{} ({}ms last run)", scheduled.path.display(), ms),
            None => println!("{} (no prior data)", scheduled.path.display()),
        }
    }
    Ok(0)
}
