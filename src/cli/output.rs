//! Handles all user-facing output for the CLI.
//!
//! This module is responsible for rendering result records, colorizing
//! status labels, printing value diffs for mismatched assertions, and
//! producing the final summary. Centralizing output logic here keeps the
//! engine itself free of terminal concerns.

use std::io::Write;

use difference::{Changeset, Difference};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::collaborators::Reporter;
use crate::results::{AggregateSummary, AssertionStatus, TestResultRecord};

/// Streams result records to the terminal as they complete.
pub struct TerminalReporter {
    choice: ColorChoice,
}

impl TerminalReporter {
    pub fn new() -> Self {
        let choice = if atty::is(atty::Stream::Stdout) {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        };
        Self { choice }
    }

    pub fn plain() -> Self {
        Self {
            choice: ColorChoice::Never,
        }
    }

    fn stdout(&self) -> StandardStream {
        StandardStream::stdout(self.choice)
    }

    fn print_label(&self, out: &mut StandardStream, label: &str, color: Color) {
        let _ = out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true));
        let _ = write!(out, "{}", label);
        let _ = out.reset();
    }
}

impl Default for TerminalReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for TerminalReporter {
    fn on_result(&mut self, record: &TestResultRecord) {
        let mut out = self.stdout();
        let path = record.test_file_path.display();
        let duration = record.perf_stats.duration_ms();

        if let Some(error) = &record.exec_error {
            // Execution errors are distinguishable from assertion
            // failures: the file never produced assertion results.
            self.print_label(&mut out, "ERROR", Color::Red);
            let _ = writeln!(out, ": {} ({})", path, error.code);
            let _ = writeln!(out, "  {}", error.message);
        } else if record.num_failing > 0 {
            self.print_label(&mut out, "FAIL", Color::Red);
            let _ = writeln!(
                out,
                ": {} ({} failed, {} passed, {}ms)",
                path, record.num_failing, record.num_passing, duration
            );
            for assertion in &record.assertions {
                if assertion.status == AssertionStatus::Failed {
                    let _ = writeln!(out, "  - {}", assertion.title);
                    if let Some(message) = &assertion.failure_message {
                        print_failure_message(&mut out, message);
                    }
                }
            }
        } else {
            self.print_label(&mut out, "PASS", Color::Green);
            let _ = writeln!(
                out,
                ": {} ({} assertions, {}ms)",
                path, record.num_passing, duration
            );
        }

        for line in &record.console_output {
            let _ = writeln!(out, "    console: {}", line);
        }
        if let Some(bytes) = record.memory_usage {
            let _ = writeln!(out, "    heap: {} bytes", bytes);
        }
    }

    fn on_complete(&mut self, summary: &AggregateSummary) {
        let mut out = self.stdout();
        let _ = writeln!(out);
        let _ = write!(
            out,
            "Files: {} total, ",
            summary.num_total_files
        );
        self.print_label(&mut out, &format!("{} passed", summary.num_passed_files), Color::Green);
        let _ = write!(out, ", ");
        self.print_label(&mut out, &format!("{} failed", summary.num_failed_files), Color::Red);
        if summary.num_exec_error_files > 0 {
            let _ = write!(
                out,
                " ({} with execution errors)",
                summary.num_exec_error_files
            );
        }
        let _ = writeln!(
            out,
            "\nAssertions: {} passed, {} failed",
            summary.num_passed_asserts, summary.num_failed_asserts
        );
    }
}

// Prints an assertion failure, expanding value mismatches into a diff.
fn print_failure_message(out: &mut StandardStream, message: &str) {
    if let Some((expected, actual)) = parse_mismatch(message) {
        let changeset = Changeset::new(&expected, &actual, "\n");
        print_diff(out, &changeset.diffs);
        return;
    }
    for line in message.lines() {
        let _ = writeln!(out, "    {}", line);
    }
}

// Recovers the expected/actual pair from a runner mismatch message.
fn parse_mismatch(message: &str) -> Option<(String, String)> {
    if !message.starts_with("value mismatch") {
        return None;
    }
    let mut expected = None;
    let mut actual = None;
    for line in message.lines() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix("expected:") {
            expected = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("actual:") {
            actual = Some(rest.trim().to_string());
        }
    }
    Some((expected?, actual?))
}

fn print_diff(out: &mut StandardStream, diffs: &[Difference]) {
    for diff in diffs {
        match diff {
            Difference::Same(x) => {
                let _ = out.reset();
                let _ = writeln!(out, "      {}", x);
            }
            Difference::Add(x) => {
                let _ = out.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
                let _ = writeln!(out, "    + {}", x);
                let _ = out.reset();
            }
            Difference::Rem(x) => {
                let _ = out.set_color(ColorSpec::new().set_fg(Some(Color::Green)));
                let _ = writeln!(out, "    - {}", x);
                let _ = out.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_messages_are_parsed_into_expected_and_actual() {
        let message = "value mismatch\n  expected: 1\n  actual:   2";
        let (expected, actual) = parse_mismatch(message).unwrap();
        assert_eq!(expected, "1");
        assert_eq!(actual, "2");
        assert!(parse_mismatch("call raised: boom").is_none());
    }
}
