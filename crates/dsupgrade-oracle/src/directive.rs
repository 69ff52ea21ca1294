use std::collections::BTreeSet;

use dsupgrade_core::BuildIdentifier;

use crate::rules::Effect;

/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    ActionRequired,
    Unsupported,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::ActionRequired => "ACTION_REQUIRED",
            Self::Unsupported => "UNSUPPORTED",
        }
    }

    pub fn from_effects(effects: &BTreeSet<Effect>) -> Self {
        if effects.contains(&Effect::TransitionNotPossible) {
            Self::Unsupported
        } else if effects.contains(&Effect::ManualActionRequired)
            || effects.contains(&Effect::DataExportReimportRequired)
        {
            Self::ActionRequired
        } else if effects.contains(&Effect::ShowWarning) {
            Self::Warning
        } else {
            Self::Info
        }
    }

    pub fn needs_confirmation(self) -> bool {
        matches!(self, Self::Warning | Self::ActionRequired)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityDirective {
    pub cause: BuildIdentifier,
    pub severity: Severity,
    pub message: String,
    pub effects: BTreeSet<Effect>,
    pub automatable_remedy: bool,
}

impl CompatibilityDirective {
    pub fn new(
        cause: BuildIdentifier,
        message: impl Into<String>,
        effects: BTreeSet<Effect>,
        automatable_remedy: bool,
    ) -> Self {
        Self {
            severity: Severity::from_effects(&effects),
            cause,
            message: message.into(),
            effects,
            automatable_remedy,
        }
    }

    pub fn has_effect(&self, effect: Effect) -> bool {
        self.effects.contains(&effect)
    }

    pub fn requires_manual_step(&self) -> bool {
        self.has_effect(Effect::ManualActionRequired) && !self.automatable_remedy
    }
}
