//! Console output.
//!
//! Commands write through the [`Output`] trait so they can be tested with a
//! recording implementation instead of a terminal.

use console::{style, Term};

/// Where command handlers send user-facing text.
pub trait Output {
    /// A heading framed by rules.
    fn section(&self, title: &str);
    /// Progress line.
    fn step(&self, message: &str);
    fn success(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    /// Error line, written to stderr.
    fn error(&self, message: &str);
}

/// Styled terminal output.
pub struct ConsoleOutput {
    out: Term,
    err: Term,
}

impl ConsoleOutput {
    pub fn new() -> Self {
        Self {
            out: Term::stdout(),
            err: Term::stderr(),
        }
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for ConsoleOutput {
    fn section(&self, title: &str) {
        let rule = "━".repeat(40);
        let _ = self.out.write_line(&format!(
            "{}\n{}\n{}",
            style(&rule).dim(),
            style(title).bold(),
            style(&rule).dim()
        ));
    }

    fn step(&self, message: &str) {
        let _ = self
            .out
            .write_line(&format!("{} {}", style("→").bold(), message));
    }

    fn success(&self, message: &str) {
        let _ = self
            .out
            .write_line(&format!("{} {}", style("✔").green().bold(), message));
    }

    fn info(&self, message: &str) {
        let _ = self
            .out
            .write_line(&format!("{} {}", style("i").cyan().bold(), message));
    }

    fn warn(&self, message: &str) {
        let _ = self
            .out
            .write_line(&format!("{} {}", style("!").yellow().bold(), message));
    }

    fn error(&self, message: &str) {
        let _ = self
            .err
            .write_line(&format!("{} {}", style("x").red().bold(), message));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use super::Output;

    /// Captures lines as `level: message`.
    #[derive(Default)]
    pub struct RecordingOutput {
        pub lines: RefCell<Vec<String>>,
    }

    impl RecordingOutput {
        fn push(&self, level: &str, message: &str) {
            self.lines.borrow_mut().push(format!("{}: {}", level, message));
        }

        pub fn contains(&self, needle: &str) -> bool {
            self.lines.borrow().iter().any(|l| l.contains(needle))
        }
    }

    impl Output for RecordingOutput {
        fn section(&self, title: &str) {
            self.push("section", title);
        }
        fn step(&self, message: &str) {
            self.push("step", message);
        }
        fn success(&self, message: &str) {
            self.push("success", message);
        }
        fn info(&self, message: &str) {
            self.push("info", message);
        }
        fn warn(&self, message: &str) {
            self.push("warn", message);
        }
        fn error(&self, message: &str) {
            self.push("error", message);
        }
    }
}
