//! Live console view of a running build
//!
//! Prints job headers, phase markers and command results as events arrive.
//! While a command runs a spinner shows it; its output lines are printed
//! above the spinner as they stream in.

use crate::cli::output::{create_command_spinner, format_event, style};
use crate::execution::ExecutionEvent;
use indicatif::ProgressBar;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Event handler that renders a build to the terminal
#[derive(Debug)]
pub struct TerminalOutput {
    show_output: bool,
    total_jobs: AtomicUsize,
    spinner: Mutex<Option<ProgressBar>>,
}

impl TerminalOutput {
    pub fn new(show_output: bool) -> Self {
        Self {
            show_output,
            total_jobs: AtomicUsize::new(0),
            spinner: Mutex::new(None),
        }
    }

    /// Handle one execution event
    pub fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::BuildStarted { jobs, .. } => {
                self.total_jobs.store(*jobs, Ordering::SeqCst);
            }
            ExecutionEvent::JobStarted { job, label } => {
                self.print_separator();
                self.print_job_header(job, label);
                return;
            }
            ExecutionEvent::CommandStarted { command, .. } => {
                self.set_spinner(Some(create_command_spinner(command)));
                return;
            }
            ExecutionEvent::CommandOutput { line, .. } => {
                if self.show_output {
                    self.println(&format!("  {}", style(line).dim()));
                }
                return;
            }
            ExecutionEvent::CommandFinished { .. } => self.set_spinner(None),
            _ => {}
        }

        if let Some(line) = format_event(event) {
            self.println(&line);
        }
    }

    fn print_job_header(&self, job: &str, label: &str) {
        let total = self.total_jobs.load(Ordering::SeqCst);
        println!(
            "[{} / {}] {}",
            style(job).cyan(),
            style(total).dim(),
            style(label).bold()
        );
    }

    fn print_separator(&self) {
        let width = term_size::dimensions_stdout()
            .map(|(w, _)| w)
            .unwrap_or(80);
        println!("{}", separator(width));
    }

    fn set_spinner(&self, next: Option<ProgressBar>) {
        let mut spinner = match self.spinner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = spinner.take() {
            previous.finish_and_clear();
        }
        *spinner = next;
    }

    fn println(&self, line: &str) {
        let spinner = match self.spinner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match spinner.as_ref() {
            Some(bar) if !bar.is_hidden() => bar.println(line),
            _ => println!("{}", line),
        }
    }
}

fn separator(width: usize) -> String {
    "─".repeat(width.min(120))
}
