#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOption {
    Continue,
    Retry,
    Cancel,
}

impl ConfirmOption {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Retry => "retry",
            Self::Cancel => "cancel",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "continue" | "c" | "yes" | "y" => Some(Self::Continue),
            "retry" | "r" => Some(Self::Retry),
            "cancel" | "x" | "no" | "n" => Some(Self::Cancel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub title: String,
    pub summary: String,
    pub details: String,
    pub severity: PromptSeverity,
    pub options: Vec<ConfirmOption>,
    pub default: ConfirmOption,
}

impl ConfirmPrompt {
    /// Resolves an answer to one of the offered options, falling back to the default.
    pub fn resolve(&self, answer: Option<ConfirmOption>) -> ConfirmOption {
        match answer {
            Some(option) if self.options.contains(&option) => option,
            _ => self.default,
        }
    }
}

/// Synchronous call-out to whoever is driving the run (console, GUI, test double).
pub trait UserInteraction: Send {
    fn confirm(&self, prompt: &ConfirmPrompt) -> ConfirmOption;
}
