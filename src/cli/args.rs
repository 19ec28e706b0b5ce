//! Defines the command-line arguments and subcommands for the Understudy
//! CLI.
//!
//! This module uses the `clap` crate with its "derive" feature to create a
//! declarative and type-safe argument parsing structure.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// The main CLI argument structure.
#[derive(Debug, Parser)]
#[command(
    name = "understudy",
    version,
    about = "A test-execution engine with isolated module graphs and automatic mock substitution."
)]
pub struct UnderstudyArgs {
    #[command(subcommand)]
    pub command: Command,
}

/// An enumeration of all available CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover, sequence, and execute all test files under the root.
    Run {
        /// The path to a config file specifying how to find and execute
        /// tests. Without one, the current directory is the root.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Overrides the configured root directory.
        #[arg(long)]
        root: Option<PathBuf>,
        /// Only run test files whose path contains this substring.
        filter: Option<String>,
        /// Ignore on-disk caches for this run.
        #[arg(long)]
        no_cache: bool,
        /// Sample process memory after each file's disposal.
        #[arg(long)]
        heap: bool,
    },
    /// Build the resource index and list every registered module.
    Index {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Show the order test files would execute in, with duration hints.
    Sequence {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        root: Option<PathBuf>,
    },
}
