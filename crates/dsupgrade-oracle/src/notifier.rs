use anyhow::Result;
use dsupgrade_core::{
    BuildIdentifier, ConfirmOption, ConfirmPrompt, PromptSeverity, UpgradeError, UserInteraction,
};
use tracing::{info, warn};

use crate::directive::{CompatibilityDirective, Severity};
use crate::oracle::{classify, is_supported, suppresses_server_start, Transition};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Informational directive messages, surfaced without confirmation.
    pub notices: Vec<String>,
    pub suppress_server_start: bool,
}

/// Walks the directives most severe first and decides whether the run may go ahead.
///
/// An unsupported directive vetoes the transition outright. Warnings and required
/// actions each need an explicit "continue"; without an interaction collaborator the
/// run fails closed.
pub fn present_directives(
    current: &BuildIdentifier,
    target: &BuildIdentifier,
    directives: &[CompatibilityDirective],
    interaction: Option<&dyn UserInteraction>,
) -> Result<NotifyReport> {
    let transition = classify(current, target);

    if !is_supported(directives) {
        let reasons = directives
            .iter()
            .filter(|directive| directive.severity == Severity::Unsupported)
            .map(|directive| directive.message.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let message = format!(
            "cannot {} from {} to {}: {}",
            transition.verb(),
            current,
            target,
            reasons
        );
        warn!(%current, %target, "transition vetoed by compatibility rules");
        return Err(UpgradeError::UnsupportedTransition(message).into());
    }

    let mut ordered: Vec<&CompatibilityDirective> = directives.iter().collect();
    ordered.sort_by(|a, b| b.severity.cmp(&a.severity));

    if interaction.is_none() {
        if let Some(first) = ordered
            .iter()
            .find(|directive| directive.severity.needs_confirmation())
        {
            return Err(UpgradeError::NoninteractiveConfirmationRequired(format!(
                "{}: {}",
                first.severity.as_str(),
                first.message
            ))
            .into());
        }
    }

    let mut report = NotifyReport {
        notices: Vec::new(),
        suppress_server_start: suppresses_server_start(directives),
    };

    for directive in ordered {
        if !directive.severity.needs_confirmation() {
            info!(cause = %directive.cause, "{}", directive.message);
            report.notices.push(directive.message.clone());
            continue;
        }
        let Some(interaction) = interaction else {
            continue;
        };

        let prompt = directive_prompt(transition, directive);
        let choice = interaction.confirm(&prompt);
        info!(
            cause = %directive.cause,
            severity = directive.severity.as_str(),
            choice = choice.as_str(),
            "directive confirmation"
        );
        if choice != ConfirmOption::Continue {
            return Err(UpgradeError::Canceled.into());
        }
    }

    if report.suppress_server_start {
        info!("automatic server start suppressed until manual actions are performed");
    }
    Ok(report)
}

fn directive_prompt(transition: Transition, directive: &CompatibilityDirective) -> ConfirmPrompt {
    let (title, severity, default) = match directive.severity {
        Severity::ActionRequired => (
            "Action Required",
            PromptSeverity::Error,
            ConfirmOption::Cancel,
        ),
        _ => ("Warning", PromptSeverity::Warning, ConfirmOption::Continue),
    };
    let effects = directive
        .effects
        .iter()
        .map(|effect| effect.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    ConfirmPrompt {
        title: title.to_string(),
        summary: directive.message.clone(),
        details: format!(
            "introduced by build {}; {} effects: {}",
            directive.cause,
            transition.as_str(),
            effects
        ),
        severity,
        options: vec![ConfirmOption::Continue, ConfirmOption::Cancel],
        default,
    }
}
