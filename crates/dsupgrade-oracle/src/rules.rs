use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use dsupgrade_core::BuildIdentifier;
use serde::{Deserialize, Serialize};

const BUILTIN_RULES: &str = include_str!("../rules/builtin.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    DataExportReimportRequired,
    ManualActionRequired,
    ShowWarning,
    ShowInfo,
    TransitionNotPossible,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataExportReimportRequired => "data_export_reimport_required",
            Self::ManualActionRequired => "manual_action_required",
            Self::ShowWarning => "show_warning",
            Self::ShowInfo => "show_info",
            Self::TransitionNotPossible => "transition_not_possible",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityRule {
    pub cause: BuildIdentifier,
    pub message: String,
    pub upgrade_effects: BTreeSet<Effect>,
    pub reversion_effects: BTreeSet<Effect>,
    pub automatable_remedy: bool,
}

#[derive(Debug, Deserialize)]
struct RuleTableFile {
    #[serde(default, rename = "rule")]
    rules: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    cause: String,
    message: String,
    #[serde(default)]
    upgrade: Vec<Effect>,
    #[serde(default)]
    reversion: Vec<Effect>,
    #[serde(default)]
    automatable_remedy: bool,
}

/// Static, versioned table of compatibility rules ordered by cause build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    rules: Vec<CompatibilityRule>,
}

impl RuleTable {
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_RULES).context("failed parsing built-in compatibility rules")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read rule table: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("failed parsing rule table: {}", path.display()))
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        let parsed: RuleTableFile = toml::from_str(input).context("invalid rule table")?;
        let mut rules = Vec::with_capacity(parsed.rules.len());
        for entry in parsed.rules {
            if entry.message.trim().is_empty() {
                return Err(anyhow!("rule for cause {} has an empty message", entry.cause));
            }
            let cause = BuildIdentifier::parse(&entry.cause)
                .with_context(|| format!("invalid rule cause '{}'", entry.cause))?;
            rules.push(CompatibilityRule {
                cause,
                message: entry.message,
                upgrade_effects: entry.upgrade.into_iter().collect(),
                reversion_effects: entry.reversion.into_iter().collect(),
                automatable_remedy: entry.automatable_remedy,
            });
        }
        rules.sort_by(|a, b| a.cause.cmp(&b.cause));
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[CompatibilityRule] {
        &self.rules
    }

    /// Rules whose cause lies in `(older, newer]`, oldest first.
    pub fn between<'a>(
        &'a self,
        older: &'a BuildIdentifier,
        newer: &'a BuildIdentifier,
    ) -> impl Iterator<Item = &'a CompatibilityRule> + 'a {
        self.rules
            .iter()
            .filter(move |rule| rule.cause > *older && rule.cause <= *newer)
    }
}
