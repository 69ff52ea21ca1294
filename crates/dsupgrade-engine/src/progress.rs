use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::outcome::RunOutcome;
use crate::step::ProgressStep;

/// Cooperative cancellation flag shared between the caller and the worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Step(ProgressStep),
    /// Completion of the current step in `0.0..=1.0`, for steps that can tell.
    Ratio(f64),
    Notice(String),
    Finished(RunOutcome),
}

/// Caller-side view of a run, folded from the events the worker sends.
#[derive(Debug, Clone)]
pub struct RunMonitor {
    step: ProgressStep,
    ratio: f64,
    log: Vec<String>,
    outcome: Option<RunOutcome>,
}

impl Default for RunMonitor {
    fn default() -> Self {
        Self {
            step: ProgressStep::NotStarted,
            ratio: 0.0,
            log: Vec::new(),
            outcome: None,
        }
    }
}

impl RunMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Step(step) => {
                self.step = *step;
                self.ratio = 0.0;
                self.log.push(step.info().log.to_string());
            }
            ProgressEvent::Ratio(ratio) => self.ratio = ratio.clamp(0.0, 1.0),
            ProgressEvent::Notice(message) => self.log.push(message.clone()),
            ProgressEvent::Finished(outcome) => self.outcome = Some(outcome.clone()),
        }
    }

    pub fn current_step(&self) -> ProgressStep {
        self.step
    }

    /// Overall completion in `0..=100`.
    pub fn progress_ratio(&self) -> u8 {
        let start = f64::from(self.step.info().percent);
        let end = f64::from(self.step.completion_percent());
        let percent = start + (end - start) * self.ratio;
        percent.round().clamp(0.0, 100.0) as u8
    }

    pub fn summary_message(&self) -> &'static str {
        self.step.info().summary
    }

    /// The whole log when `verbose`, otherwise only the latest line.
    pub fn log_message(&self, verbose: bool) -> String {
        if verbose {
            self.log.join("\n")
        } else {
            self.log.last().cloned().unwrap_or_default()
        }
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }
}
