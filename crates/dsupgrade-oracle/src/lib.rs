mod directive;
mod notifier;
mod oracle;
mod rules;

pub use directive::{CompatibilityDirective, Severity};
pub use notifier::{present_directives, NotifyReport};
pub use oracle::{classify, is_supported, suppresses_server_start, Transition, VersionOracle};
pub use rules::{CompatibilityRule, Effect, RuleTable};
