use std::path::PathBuf;

use dsupgrade_core::ErrorKind;

use crate::step::ProgressStep;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    SuccessWithWarnings(String),
    Failure { kind: ErrorKind, message: String },
    Canceled,
}

impl RunOutcome {
    pub fn terminal_step(&self) -> ProgressStep {
        match self {
            Self::Success => ProgressStep::Finished,
            Self::SuccessWithWarnings(_) => ProgressStep::FinishedWithWarnings,
            Self::Failure { .. } => ProgressStep::FinishedWithErrors,
            Self::Canceled => ProgressStep::FinishedCanceled,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure { .. } => 1,
            Self::SuccessWithWarnings(_) => 2,
            Self::Canceled => 3,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::SuccessWithWarnings(_))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failure { kind, .. } => Some(*kind),
            Self::Canceled => Some(ErrorKind::Canceled),
            _ => None,
        }
    }
}

/// What the caller gets back once the worker is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub operation_id: String,
    pub outcome: RunOutcome,
    pub final_step: ProgressStep,
    pub warnings: Vec<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub history_log: PathBuf,
    pub backup_root: Option<PathBuf>,
}

impl RunReport {
    pub fn run_error(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Failure { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn run_warning(&self) -> Option<String> {
        if self.warnings.is_empty() {
            None
        } else {
            Some(self.warnings.join("\n"))
        }
    }
}
