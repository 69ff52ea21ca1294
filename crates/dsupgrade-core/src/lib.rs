mod archive;
mod build;
mod diff;
mod error;
mod interaction;
mod ldif;

pub use archive::PackageFormat;
pub use build::{BuildIdentifier, BuildInfo};
pub use diff::{diff_attributes, diff_entries, entries_equivalent, merge_entries, same_dn};
pub use error::{ErrorKind, UpgradeError};
pub use interaction::{ConfirmOption, ConfirmPrompt, PromptSeverity, UserInteraction};
pub use ldif::{
    normalize_dn, parent_dn, parse_change_records, parse_entries, write_change_records,
    write_entries, Attribute, ChangeOperation, ChangeRecord, Entry, LdifReader, Modification,
    ModificationKind,
};

#[cfg(test)]
mod tests;
