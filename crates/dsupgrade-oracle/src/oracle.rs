use dsupgrade_core::BuildIdentifier;

use crate::directive::{CompatibilityDirective, Severity};
use crate::rules::RuleTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Upgrade,
    Reversion,
    NoOp,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upgrade => "upgrade",
            Self::Reversion => "reversion",
            Self::NoOp => "no-op",
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            Self::Upgrade => "upgrade",
            Self::Reversion => "revert",
            Self::NoOp => "stay",
        }
    }
}

pub fn classify(current: &BuildIdentifier, target: &BuildIdentifier) -> Transition {
    match target.cmp(current) {
        std::cmp::Ordering::Greater => Transition::Upgrade,
        std::cmp::Ordering::Less => Transition::Reversion,
        std::cmp::Ordering::Equal => Transition::NoOp,
    }
}

pub fn is_supported(directives: &[CompatibilityDirective]) -> bool {
    !directives
        .iter()
        .any(|directive| directive.severity == Severity::Unsupported)
}

/// True when a directive asks for manual work the tool cannot do, in which case the
/// server must not be started automatically at the end of the run.
pub fn suppresses_server_start(directives: &[CompatibilityDirective]) -> bool {
    directives
        .iter()
        .any(CompatibilityDirective::requires_manual_step)
}

#[derive(Debug, Clone)]
pub struct VersionOracle {
    table: RuleTable,
}

impl VersionOracle {
    pub fn new(table: RuleTable) -> Self {
        Self { table }
    }

    pub fn builtin() -> anyhow::Result<Self> {
        Ok(Self::new(RuleTable::builtin()?))
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    pub fn classify(&self, current: &BuildIdentifier, target: &BuildIdentifier) -> Transition {
        classify(current, target)
    }

    /// Directives for every cause crossed between the two builds, oldest cause first.
    ///
    /// Upgrades read each rule's upgrade effects, reversions its reversion effects;
    /// rules with nothing to say in that direction are dropped.
    pub fn evaluate(
        &self,
        current: &BuildIdentifier,
        target: &BuildIdentifier,
    ) -> Vec<CompatibilityDirective> {
        let transition = classify(current, target);
        let (older, newer) = match transition {
            Transition::Upgrade => (current, target),
            Transition::Reversion => (target, current),
            Transition::NoOp => return Vec::new(),
        };

        self.table
            .between(older, newer)
            .filter_map(|rule| {
                let effects = match transition {
                    Transition::Upgrade => &rule.upgrade_effects,
                    _ => &rule.reversion_effects,
                };
                if effects.is_empty() {
                    return None;
                }
                Some(CompatibilityDirective::new(
                    rule.cause.clone(),
                    rule.message.clone(),
                    effects.clone(),
                    rule.automatable_remedy,
                ))
            })
            .collect()
    }
}
