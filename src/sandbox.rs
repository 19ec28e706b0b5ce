//! The per-file sandbox: isolated globals, console capture, and timers.
//!
//! One sandbox hosts exactly one test file's execution. Its lifecycle is a
//! three-state machine, `Created → Executing → Disposed`; disposal releases
//! everything the sandbox holds so the registry and loaded modules become
//! collectible, runs on both success and failure paths, and is idempotent.
//!
//! Output from executing code goes through the injectable [`OutputSink`]
//! seam rather than straight to stdio, so captured console lines can be
//! attached to the file's result record.

use std::fmt;

use crate::diagnostics::EngineError;
use crate::value::Value;

// ============================================================================
// OUTPUT SINKS
// ============================================================================

// Output seam for code under test; keeps I/O testable and injectable.
pub trait OutputSink {
    fn emit(&mut self, text: &str);
}

/// Collects emitted lines for attachment to the result record.
#[derive(Debug, Default)]
pub struct ConsoleCapture {
    lines: Vec<String>,
}

impl ConsoleCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn take_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }
}

impl OutputSink for ConsoleCapture {
    fn emit(&mut self, text: &str) {
        self.lines.push(text.to_string());
    }
}

/// Pass-through sink for embedders that want live output.
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit(&mut self, text: &str) {
        println!("{}", text);
    }
}

// ============================================================================
// TIMERS
// ============================================================================

/// A timer registered by executing code. Timers never fire on their own;
/// they exist so scheduled work is observable and disposable per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTimer {
    pub id: u64,
    pub delay_ms: u64,
}

/// Per-sandbox timer table, fully isolated between files.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    next_id: u64,
    pending: Vec<ScheduledTimer>,
}

impl TimerRegistry {
    pub fn schedule(&mut self, delay_ms: u64) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.pending.push(ScheduledTimer { id, delay_ms });
        id
    }

    pub fn clear(&mut self, id: u64) -> bool {
        let before = self.pending.len();
        self.pending.retain(|t| t.id != id);
        self.pending.len() != before
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn clear_all(&mut self) {
        self.pending.clear();
    }
}

// ============================================================================
// SANDBOX
// ============================================================================

/// Lifecycle states of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Created,
    Executing,
    Disposed,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SandboxState::Created => "created",
            SandboxState::Executing => "executing",
            SandboxState::Disposed => "disposed",
        };
        write!(f, "{}", name)
    }
}

/// The isolated global execution context for one test file.
pub struct SandboxEnvironment {
    state: SandboxState,
    globals: Value,
    console: ConsoleCapture,
    timers: TimerRegistry,
}

impl Default for SandboxEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxEnvironment {
    pub fn new() -> Self {
        Self {
            state: SandboxState::Created,
            globals: Value::new_mapping(),
            console: ConsoleCapture::new(),
            timers: TimerRegistry::default(),
        }
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn is_disposed(&self) -> bool {
        self.state == SandboxState::Disposed
    }

    /// Enters the `Executing` phase. Re-entering a disposed sandbox is an
    /// invariant violation.
    pub fn begin_execution(&mut self) -> Result<(), EngineError> {
        if self.state == SandboxState::Disposed {
            return Err(EngineError::internal(
                "cannot execute in a disposed sandbox",
            ));
        }
        self.state = SandboxState::Executing;
        Ok(())
    }

    /// The global mapping observed by executing code as top-level scope.
    pub fn globals(&self) -> &Value {
        &self.globals
    }

    pub fn set_global(&self, key: &str, value: Value) {
        if let Some(map) = self.globals.as_mapping() {
            map.insert(key, value);
        }
    }

    pub fn global(&self, key: &str) -> Option<Value> {
        self.globals
            .as_mapping()
            .and_then(|map| map.get(key))
            .and_then(|member| member.ok())
    }

    pub fn console(&mut self) -> &mut ConsoleCapture {
        &mut self.console
    }

    pub fn console_lines(&self) -> &[String] {
        self.console.lines()
    }

    pub fn timers(&mut self) -> &mut TimerRegistry {
        &mut self.timers
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending_count()
    }

    /// Releases everything the sandbox holds. Returns true the first time
    /// it runs; repeat calls are no-ops.
    pub fn dispose(&mut self) -> bool {
        if self.state == SandboxState::Disposed {
            return false;
        }
        self.state = SandboxState::Disposed;
        self.globals = Value::Nil;
        self.timers.clear_all();
        self.console.take_lines();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_runs_created_executing_disposed() {
        let mut sandbox = SandboxEnvironment::new();
        assert_eq!(sandbox.state(), SandboxState::Created);
        sandbox.begin_execution().unwrap();
        assert_eq!(sandbox.state(), SandboxState::Executing);
        assert!(sandbox.dispose());
        assert_eq!(sandbox.state(), SandboxState::Disposed);
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut sandbox = SandboxEnvironment::new();
        assert!(sandbox.dispose());
        assert!(!sandbox.dispose());
        assert!(sandbox.begin_execution().is_err());
    }

    #[test]
    fn globals_are_isolated_per_sandbox() {
        let a = SandboxEnvironment::new();
        let b = SandboxEnvironment::new();
        a.set_global("testFilePath", Value::String("/r/a.test.yaml".into()));
        assert!(a.global("testFilePath").is_some());
        assert!(b.global("testFilePath").is_none());
    }

    #[test]
    fn disposal_releases_globals_and_timers() {
        let mut sandbox = SandboxEnvironment::new();
        sandbox.set_global("flag", Value::Bool(true));
        sandbox.timers().schedule(100);
        assert_eq!(sandbox.pending_timers(), 1);
        sandbox.dispose();
        assert_eq!(sandbox.pending_timers(), 0);
        assert!(sandbox.global("flag").is_none());
    }

    #[test]
    fn timers_clear_individually() {
        let mut registry = TimerRegistry::default();
        let a = registry.schedule(10);
        let b = registry.schedule(20);
        assert!(registry.clear(a));
        assert!(!registry.clear(a));
        assert_eq!(registry.pending_count(), 1);
        assert!(registry.clear(b));
    }
}
