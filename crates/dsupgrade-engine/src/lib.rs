mod check;
mod config;
mod orchestrator;
mod outcome;
mod progress;
mod step;
mod worker;

pub use check::{check_compatibility, CompatibilityReport};
pub use config::{PackageSource, RunConfig};
pub use orchestrator::{Collaborators, Orchestrator};
pub use outcome::{RunOutcome, RunReport};
pub use progress::{CancelToken, ProgressEvent, RunMonitor};
pub use step::{forward_sequence, next_forward_step, ProgressStep, StepInfo, StepPlan};
pub use worker::{spawn_run, RunHandle};
