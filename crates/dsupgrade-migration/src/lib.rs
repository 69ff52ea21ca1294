mod diff_tool;
mod manager;
mod properties;
mod store;

pub use diff_tool::{DiffTool, LdifDiffTool};
pub use manager::{
    applied_marker_path, CustomizationKind, MigrationManager, MigrationReport, SkippedRecord,
};
pub use properties::{missing_properties, property_keys};
pub use store::{ConfigStore, LdifFileStore, SchemaStore, SCHEMA_DN};

#[cfg(test)]
mod tests;
