use thiserror::Error;

/// Classified failures raised by the upgrade components.
///
/// Leaf code wraps these in `anyhow::Error` with additional context; the orchestrator
/// recovers the classification with [`UpgradeError::find_in`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpgradeError {
    #[error("invalid package: {0}")]
    InvalidPackage(String),
    #[error("file system access error: {0}")]
    FileSystemAccess(String),
    #[error("{message} (exit code {exit_code})")]
    Tool { exit_code: i32, message: String },
    #[error("failed calculating customizations: {0}")]
    MigrationCalculation(String),
    #[error("migration canceled: {0}")]
    MigrationCanceled(String),
    #[error("{0}")]
    Application(String),
    #[error("unsupported transition: {0}")]
    UnsupportedTransition(String),
    #[error("confirmation required but no interactive session is available: {0}")]
    NoninteractiveConfirmationRequired(String),
    #[error("operation canceled by user")]
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidPackage,
    FileSystemAccess,
    Tool,
    MigrationCalculation,
    MigrationCanceled,
    Application,
    UnsupportedTransition,
    NoninteractiveConfirmationRequired,
    Canceled,
}

impl UpgradeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPackage(_) => ErrorKind::InvalidPackage,
            Self::FileSystemAccess(_) => ErrorKind::FileSystemAccess,
            Self::Tool { .. } => ErrorKind::Tool,
            Self::MigrationCalculation(_) => ErrorKind::MigrationCalculation,
            Self::MigrationCanceled(_) => ErrorKind::MigrationCanceled,
            Self::Application(_) => ErrorKind::Application,
            Self::UnsupportedTransition(_) => ErrorKind::UnsupportedTransition,
            Self::NoninteractiveConfirmationRequired(_) => {
                ErrorKind::NoninteractiveConfirmationRequired
            }
            Self::Canceled => ErrorKind::Canceled,
        }
    }

    /// Classified error attached to `err`, either as a context layer or somewhere in
    /// its source chain.
    pub fn find_in(err: &anyhow::Error) -> Option<&UpgradeError> {
        err.downcast_ref::<UpgradeError>()
            .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<UpgradeError>()))
    }

    /// Classification of an arbitrary error; untagged errors are application errors.
    pub fn kind_of(err: &anyhow::Error) -> ErrorKind {
        Self::find_in(err)
            .map(UpgradeError::kind)
            .unwrap_or(ErrorKind::Application)
    }

    pub fn is_cancellation(err: &anyhow::Error) -> bool {
        matches!(
            Self::kind_of(err),
            ErrorKind::Canceled | ErrorKind::MigrationCanceled
        )
    }
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPackage => "invalid_package",
            Self::FileSystemAccess => "file_system_access",
            Self::Tool => "tool_error",
            Self::MigrationCalculation => "migration_calculation",
            Self::MigrationCanceled => "migration_canceled",
            Self::Application => "application_error",
            Self::UnsupportedTransition => "unsupported_transition",
            Self::NoninteractiveConfirmationRequired => "noninteractive_confirmation_required",
            Self::Canceled => "canceled",
        }
    }
}
